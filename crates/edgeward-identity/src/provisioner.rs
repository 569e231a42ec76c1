//! Identity provisioning
//!
//! Writes server, onboarding and device certificate/key pairs to disk.
//! Existing identities are never replaced unless `force` is set, and a
//! client identity is never replaced by one for a different common name
//! that happens to squash to the same file pair.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{IdentityError, Result};
use crate::generator::{
    certificate_common_name, CertificateGenerator, GeneratedIdentity, SelfSignedGenerator,
};
use crate::naming::{ensure_directory, IdentityPaths};

/// Writes identities minted by a [`CertificateGenerator`]
#[derive(Debug, Clone)]
pub struct IdentityProvisioner {
    generator: Arc<dyn CertificateGenerator>,
}

impl Default for IdentityProvisioner {
    fn default() -> Self {
        Self::new(Arc::new(SelfSignedGenerator::default()))
    }
}

impl IdentityProvisioner {
    pub fn new(generator: Arc<dyn CertificateGenerator>) -> Self {
        Self { generator }
    }

    /// Server certificate covering `hosts` (hostnames and/or IPs)
    pub fn generate_server_identity(
        &self,
        hosts: &[String],
        paths: &IdentityPaths,
        force: bool,
    ) -> Result<GeneratedIdentity> {
        ensure_directories(paths)?;
        self.refuse_overwrite(paths, force)?;

        let identity = self.generator.generate("", hosts)?;
        write_identity(paths, &identity)?;

        info!(
            cert = %paths.cert.display(),
            hosts = ?hosts,
            "Generated server identity"
        );
        Ok(identity)
    }

    /// Client certificate for a common name at explicit paths
    pub fn generate_client_identity(
        &self,
        common_name: &str,
        paths: &IdentityPaths,
        force: bool,
    ) -> Result<GeneratedIdentity> {
        ensure_directories(paths)?;
        self.refuse_collision(common_name, paths)?;
        self.refuse_overwrite(paths, force)?;

        let identity = self.generator.generate(common_name, &[])?;
        write_identity(paths, &identity)?;

        info!(
            cn = %common_name,
            cert = %paths.cert.display(),
            "Generated client identity"
        );
        Ok(identity)
    }

    /// Onboarding certificate stored under its sanitized common name
    pub fn generate_onboard_identity(
        &self,
        onboard_db: &Path,
        common_name: &str,
        force: bool,
    ) -> Result<GeneratedIdentity> {
        let paths = IdentityPaths::in_directory(onboard_db, common_name)?;
        self.generate_client_identity(common_name, &paths, force)
    }

    /// Device certificate stored under its sanitized common name
    pub fn generate_device_identity(
        &self,
        device_db: &Path,
        common_name: &str,
        force: bool,
    ) -> Result<GeneratedIdentity> {
        let paths = IdentityPaths::in_directory(device_db, common_name)?;
        self.generate_client_identity(common_name, &paths, force)
    }

    fn refuse_overwrite(&self, paths: &IdentityPaths, force: bool) -> Result<()> {
        match paths.existing() {
            Some(existing) if !force => {
                warn!(path = %existing.display(), "Refusing to overwrite existing identity");
                Err(IdentityError::AlreadyExists(existing.to_path_buf()))
            }
            Some(existing) => {
                warn!(path = %existing.display(), "Overwriting existing identity");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// An existing certificate issued to a different CN is never replaced
    ///
    /// A certificate that cannot be parsed names nobody, so only the
    /// overwrite policy applies to it.
    fn refuse_collision(&self, common_name: &str, paths: &IdentityPaths) -> Result<()> {
        if !paths.cert.exists() {
            return Ok(());
        }

        let pem = fs::read(&paths.cert)?;
        let existing = match certificate_common_name(&String::from_utf8_lossy(&pem)) {
            Ok(cn) => cn.unwrap_or_default(),
            Err(e) => {
                warn!(
                    path = %paths.cert.display(),
                    error = %e,
                    "Existing certificate is unreadable"
                );
                return Ok(());
            }
        };
        if existing == common_name {
            return Ok(());
        }

        warn!(
            requested = %common_name,
            existing = %existing,
            path = %paths.cert.display(),
            "SECURITY: Common name collides with existing identity"
        );
        Err(IdentityError::NameCollision {
            requested: common_name.to_string(),
            existing,
            path: paths.cert.clone(),
        })
    }
}

fn ensure_directories(paths: &IdentityPaths) -> Result<()> {
    ensure_directory(paths.cert_dir())?;
    ensure_directory(paths.key_dir())
}

/// Writes the pair; a certificate is never left behind without its key
fn write_identity(paths: &IdentityPaths, identity: &GeneratedIdentity) -> Result<()> {
    fs::write(&paths.cert, &identity.cert_pem)?;
    if let Err(e) = write_private(&paths.key, identity.key_pem.as_bytes()) {
        warn!(
            key = %paths.key.display(),
            error = %e,
            "Key write failed, removing certificate"
        );
        if let Err(cleanup) = fs::remove_file(&paths.cert) {
            warn!(cert = %paths.cert.display(), error = %cleanup, "Could not remove certificate");
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(contents)?;
    Ok(())
}
