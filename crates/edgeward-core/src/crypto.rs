//! Nonce generation and integrity-token signing
//!
//! Integrity tokens are COSE_Sign1 structures signed with the controller's
//! Ed25519 key, carrying an [`IntegrityGrant`] payload and transported as
//! standard base64 text.
//!
//! Key types:
//! - `KeyPair`: Ed25519 key pair that issues tokens
//! - `PublicKey`: Ed25519 public key that verifies tokens
//! - `SignedGrant`: COSE_Sign1 wrapped grant

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use coset::{iana, CborSerializable, CoseSign1, CoseSign1Builder, HeaderBuilder};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EdgewardError, Result};

/// COSE algorithm identifier for EdDSA (Ed25519)
const EDDSA_ALG: iana::Algorithm = iana::Algorithm::EdDSA;

/// Number of random bytes in an attestation nonce
pub const NONCE_LEN: usize = 32;

const GRANT_ID_LEN: usize = 16;

fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

/// Generate a fresh, unpredictable attestation nonce (hex encoded)
pub fn generate_nonce() -> String {
    random_hex(NONCE_LEN)
}

/// What a device was granted when it passed attestation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityGrant {
    /// Device the grant was issued to
    pub device: Uuid,

    /// Nonce the accepted measurements answered
    pub nonce: String,

    /// Position of the matching template in the policy, `None` when
    /// template enforcement was off
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_index: Option<usize>,

    pub eve_version: String,
    pub firmware_version: String,
    pub issued_at: DateTime<Utc>,

    /// Random identifier, unique per grant
    pub grant_id: String,
}

impl IntegrityGrant {
    /// Create a grant stamped with the current time and a fresh id
    pub fn new(
        device: Uuid,
        nonce: impl Into<String>,
        template_index: Option<usize>,
        eve_version: impl Into<String>,
        firmware_version: impl Into<String>,
    ) -> Self {
        Self {
            device,
            nonce: nonce.into(),
            template_index,
            eve_version: eve_version.into(),
            firmware_version: firmware_version.into(),
            issued_at: Utc::now(),
            grant_id: random_hex(GRANT_ID_LEN),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A signed COSE_Sign1 structure
#[derive(Debug, Clone)]
pub struct CoseSigned<T> {
    cose: CoseSign1,
    _marker: std::marker::PhantomData<T>,
}

/// Signed integrity grant (COSE_Sign1 wrapped)
pub type SignedGrant = CoseSigned<IntegrityGrant>;

impl<T> CoseSigned<T> {
    /// Get the key ID from the protected header
    pub fn kid(&self) -> Option<String> {
        let kid = &self.cose.protected.header.key_id;
        if kid.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(kid).to_string())
        }
    }

    /// Serialize to CBOR bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.cose.clone().to_vec().map_err(EdgewardError::from)
    }

    /// Deserialize from CBOR bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let cose = CoseSign1::from_slice(bytes).map_err(EdgewardError::from)?;
        Ok(Self {
            cose,
            _marker: std::marker::PhantomData,
        })
    }
}

impl SignedGrant {
    /// Extract the grant from the payload
    ///
    /// Note: This does NOT verify the signature. Use `PublicKey::verify_token` for that.
    pub fn extract_grant(&self) -> Result<IntegrityGrant> {
        let payload = self
            .cose
            .payload
            .as_ref()
            .ok_or(EdgewardError::MissingField("payload".into()))?;
        IntegrityGrant::from_bytes(payload)
    }

    /// Encode as an integrity token string
    pub fn to_token(&self) -> Result<String> {
        Ok(STANDARD.encode(self.to_bytes()?))
    }

    /// Decode an integrity token string
    pub fn from_token(token: &str) -> Result<Self> {
        let bytes = STANDARD.decode(token)?;
        Self::from_bytes(&bytes)
    }
}

/// Ed25519 key pair that issues integrity tokens
#[derive(Clone)]
pub struct KeyPair {
    kid: String,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("kid", &self.kid)
            .field("verifying_key", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate(kid: impl Into<String>) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(kid, signing_key)
    }

    /// Create a key pair from an existing signing key
    pub fn from_signing_key(kid: impl Into<String>, signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            kid: kid.into(),
            signing_key,
            verifying_key,
        }
    }

    /// Create a key pair from raw secret key bytes
    pub fn from_bytes(kid: impl Into<String>, bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(kid, SigningKey::from_bytes(bytes))
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            kid: self.kid.clone(),
            verifying_key: self.verifying_key,
        }
    }

    /// Sign a grant and wrap it in COSE_Sign1
    pub fn sign_grant(&self, grant: &IntegrityGrant) -> Result<SignedGrant> {
        let payload = grant.to_bytes()?;
        let cose = self.sign_cose(&payload)?;
        Ok(CoseSigned {
            cose,
            _marker: std::marker::PhantomData,
        })
    }

    /// Sign a grant and encode it as an integrity token
    pub fn issue_token(&self, grant: &IntegrityGrant) -> Result<String> {
        self.sign_grant(grant)?.to_token()
    }

    fn sign_cose(&self, payload: &[u8]) -> Result<CoseSign1> {
        let protected = HeaderBuilder::new()
            .algorithm(EDDSA_ALG)
            .key_id(self.kid.as_bytes().to_vec())
            .build();

        let signed_builder = CoseSign1Builder::new()
            .protected(protected)
            .payload(payload.to_vec())
            .try_create_signature(&[], |data| {
                let signature = self.signing_key.sign(data);
                Ok::<_, EdgewardError>(signature.to_bytes().to_vec())
            })?;

        Ok(signed_builder.build())
    }
}

/// Ed25519 public key that verifies integrity tokens
#[derive(Clone)]
pub struct PublicKey {
    kid: String,
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey").field("kid", &self.kid).finish()
    }
}

impl PublicKey {
    /// Create a public key from raw bytes
    pub fn from_bytes(kid: impl Into<String>, bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)?;
        Ok(Self {
            kid: kid.into(),
            verifying_key,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Verify a signed grant and extract the payload
    pub fn verify_grant(&self, signed: &SignedGrant) -> Result<IntegrityGrant> {
        self.verify_cose(&signed.cose)?;
        signed.extract_grant()
    }

    /// Decode and verify an integrity token
    pub fn verify_token(&self, token: &str) -> Result<IntegrityGrant> {
        let signed = SignedGrant::from_token(token)?;
        self.verify_grant(&signed)
            .map_err(|e| EdgewardError::InvalidToken(e.to_string()))
    }

    fn verify_cose(&self, cose: &CoseSign1) -> Result<()> {
        let kid = &cose.protected.header.key_id;
        if !kid.is_empty() {
            let kid_str = String::from_utf8_lossy(kid);
            if kid_str != self.kid {
                return Err(EdgewardError::CryptoError(format!(
                    "Key ID mismatch: expected '{}', got '{}'",
                    self.kid, kid_str
                )));
            }
        }

        let sig_structure = cose.tbs_data(&[]);

        let signature_bytes: [u8; 64] = cose
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| EdgewardError::CryptoError("Invalid signature length".into()))?;
        let signature = Signature::from_bytes(&signature_bytes);

        self.verifying_key
            .verify(&sig_structure, &signature)
            .map_err(|e| EdgewardError::CryptoError(e.to_string()))
    }
}
