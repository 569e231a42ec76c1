//! # Edgeward Identity
//!
//! Certificate provisioning for the edgeward controller: the server
//! certificate, onboarding certificates handed to new devices, and
//! per-device operational certificates.
//!
//! Client identities are stored as `{name}.pem` / `{name}-key.pem` where
//! `name` is the common name with every character outside `[A-Za-z0-9.-]`
//! replaced by `_`. The same common name therefore always maps to the same
//! file pair, whether it is used for onboarding or for a device.
//!
//! ```ignore
//! use edgeward_identity::IdentityProvisioner;
//!
//! let provisioner = IdentityProvisioner::default();
//! provisioner.generate_onboard_identity(Path::new("run/onboard"), "company-a", false)?;
//! ```

pub mod error;
pub mod generator;
pub mod naming;
pub mod provisioner;

pub use error::{IdentityError, Result};
pub use generator::{
    certificate_common_name, CertificateGenerator, GeneratedIdentity, SelfSignedGenerator,
};
pub use naming::{ensure_directory, sanitize_common_name, IdentityPaths};
pub use provisioner::IdentityProvisioner;
