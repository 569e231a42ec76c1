//! Edgeward Identity CLI
//!
//! Generates the certificates the controller and its devices authenticate with.

use clap::{Args, Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

use edgeward_identity::{IdentityPaths, IdentityProvisioner, Result};

#[derive(Parser, Debug)]
#[command(name = "edgeward", version, about = "Edgeward device controller tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate certs for the controller and its devices
    #[command(subcommand)]
    Generate(Generate),
}

#[derive(Subcommand, Debug)]
enum Generate {
    /// Generate the server cert and key
    Server(ServerArgs),
    /// Generate an onboarding cert, named by its CN, e.g. onboard/company-a.pem
    Onboard(OnboardArgs),
    /// Generate an individual device cert, named by its CN, e.g. device/device-1234.pem
    Device(DeviceArgs),
}

#[derive(Args, Debug)]
struct ServerArgs {
    /// Hostnames and/or IPs to use in the certificate, separated by ','
    #[arg(long, value_delimiter = ',', required = true)]
    hosts: Vec<String>,

    /// Path to server certificate
    #[arg(long, default_value = "run/config/server.pem")]
    certfile: PathBuf,

    /// Path to server key
    #[arg(long, default_value = "run/config/server-key.pem")]
    keyfile: PathBuf,

    /// Replace existing files
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct OnboardArgs {
    /// Directory where generated onboarding certificates are stored
    #[arg(long = "onboard-db")]
    onboard_db: PathBuf,

    /// CN to use in the certificate
    #[arg(long)]
    cn: String,

    /// Replace existing files
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct DeviceArgs {
    /// Directory where generated device certificates are stored
    #[arg(long = "device-db")]
    device_db: PathBuf,

    /// CN to use in the certificate
    #[arg(long)]
    cn: String,

    /// Replace existing files
    #[arg(long)]
    force: bool,
}

fn main() -> ExitCode {
    let log_level = env::var("EDGEWARD_LOG_LEVEL")
        .unwrap_or_else(|_| "info".into())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install log subscriber: {}", e);
    }

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Error generating key/cert");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<()> {
    let provisioner = IdentityProvisioner::default();

    match command {
        Command::Generate(Generate::Server(args)) => {
            let paths = IdentityPaths::new(args.certfile, args.keyfile);
            provisioner.generate_server_identity(&args.hosts, &paths, args.force)?;
        }
        Command::Generate(Generate::Onboard(args)) => {
            provisioner.generate_onboard_identity(&args.onboard_db, &args.cn, args.force)?;
        }
        Command::Generate(Generate::Device(args)) => {
            provisioner.generate_device_identity(&args.device_db, &args.cn, args.force)?;
        }
    }
    Ok(())
}
