//! Certificate generation
//!
//! [`CertificateGenerator`] is the seam to whatever authority mints
//! certificates. The default [`SelfSignedGenerator`] produces a fresh ECDSA
//! P-256 key and a self-signed certificate for it.

use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use std::fmt::Debug;
use time::{Duration, OffsetDateTime};
use x509_parser::pem::parse_x509_pem;

use crate::error::{IdentityError, Result};

const DEFAULT_VALIDITY_DAYS: i64 = 365;

/// PEM-encoded certificate and private key
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedIdentity {
    pub cert_pem: String,
    pub key_pem: String,
}

impl std::fmt::Debug for GeneratedIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedIdentity")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"[redacted]")
            .finish()
    }
}

/// Mints a certificate/key pair
///
/// An empty `common_name` produces a certificate without a CN attribute.
/// `hosts` become subject alternative names; entries that parse as IP
/// addresses are encoded as IP SANs, the rest as DNS names.
pub trait CertificateGenerator: Send + Sync + Debug {
    fn generate(&self, common_name: &str, hosts: &[String]) -> Result<GeneratedIdentity>;
}

/// Self-signed certificates from a freshly generated key
#[derive(Debug, Clone)]
pub struct SelfSignedGenerator {
    validity: Duration,
}

impl Default for SelfSignedGenerator {
    fn default() -> Self {
        Self {
            validity: Duration::days(DEFAULT_VALIDITY_DAYS),
        }
    }
}

impl SelfSignedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validity_days(mut self, days: i64) -> Self {
        self.validity = Duration::days(days);
        self
    }
}

impl CertificateGenerator for SelfSignedGenerator {
    fn generate(&self, common_name: &str, hosts: &[String]) -> Result<GeneratedIdentity> {
        let mut params = CertificateParams::new(hosts.to_vec())?;

        let mut dn = DistinguishedName::new();
        if !common_name.is_empty() {
            dn.push(DnType::CommonName, common_name.to_string());
        }
        params.distinguished_name = dn;

        // Backdated to tolerate clock skew on freshly booted devices
        let not_before = OffsetDateTime::now_utc() - Duration::minutes(5);
        params.not_before = not_before;
        params.not_after = not_before + self.validity;

        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = if hosts.is_empty() {
            vec![ExtendedKeyUsagePurpose::ClientAuth]
        } else {
            vec![
                ExtendedKeyUsagePurpose::ServerAuth,
                ExtendedKeyUsagePurpose::ClientAuth,
            ]
        };

        let key = KeyPair::generate()?;
        let cert = params.self_signed(&key)?;

        Ok(GeneratedIdentity {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }
}

/// Common name of a PEM certificate, `None` if it carries none
pub fn certificate_common_name(pem: &str) -> Result<Option<String>> {
    let (_, pem) = parse_x509_pem(pem.as_bytes())
        .map_err(|e| IdentityError::CertParsing(e.to_string()))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| IdentityError::CertParsing(e.to_string()))?;

    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    Ok(cn)
}
