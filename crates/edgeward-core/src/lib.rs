//! # Edgeward Core
//!
//! Attestation data model and policy for the edgeward device-fleet controller.
//!
//! ## Key Concepts
//!
//! - **PCR template**: the expected measurement set for an EVE/firmware version pair,
//!   where a value of `*` accepts any measurement at that index
//! - **Global options**: controller-wide policy, an ordered template list plus the
//!   enforcement switch
//! - **Device options**: one device's attestation session (nonce, reported
//!   measurements, event log, integrity token, state)
//! - **Integrity token**: signed proof handed to a device once it has attested
//!
//! ## Attestation Invariants
//!
//! 1. **First match**: templates are scanned in policy order and the first match wins
//! 2. **Single-use nonce**: issuing a nonce invalidates the previous one
//! 3. **Sticky attestation**: `attested` is only set by a template match and only
//!    cleared by an explicit re-evaluation

pub mod attestation;
pub mod crypto;
pub mod error;
pub mod types;

pub use attestation::{find_matching_template, template_matches, AttestationSession, AttestationState};
pub use crypto::{generate_nonce, IntegrityGrant, KeyPair, PublicKey, SignedGrant};
pub use error::{EdgewardError, Result};
pub use types::{
    create_base_config, create_base_device_options, create_base_global_options, ApiRequest,
    DeviceCertificate, DeviceIdentity, DeviceOptions, GlobalOptions, PcrTemplate, PcrValue,
    TpmEventDigest, TpmEventLogEntry, PCR_WILDCARD,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get the library version
pub fn version() -> &'static str {
    VERSION
}
