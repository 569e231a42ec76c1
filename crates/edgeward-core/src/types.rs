//! Common types shared between the controller's storage and attestation layers
//!
//! The serialized (JSON) form of these records is what gets persisted in a
//! device's `Options` blob and exchanged with policy tooling, so field names
//! follow the controller's wire names (`PCRValues`, `PCRTemplates`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::attestation::AttestationState;
use crate::error::Result;

/// Template value that accepts any measurement at its index
pub const PCR_WILDCARD: &str = "*";

/// Version stamped into a freshly created device configuration
pub const BASE_CONFIG_VERSION: &str = "4";

/// Policy files written by older controllers carry `null` for empty lists.
fn nullable_vec<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One PCR value from a TPM hash bank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcrValue {
    /// PCR index
    pub index: u32,

    /// Measurement, or `*` in a template to accept any value
    pub value: String,
}

impl PcrValue {
    /// Create a PCR value
    pub fn new(index: u32, value: impl Into<String>) -> Self {
        Self {
            index,
            value: value.into(),
        }
    }

    /// Create a wildcard entry for the given index
    pub fn wildcard(index: u32) -> Self {
        Self::new(index, PCR_WILDCARD)
    }

    /// Whether this entry accepts any measurement
    pub fn is_wildcard(&self) -> bool {
        self.value == PCR_WILDCARD
    }

    /// Whether a reported measurement satisfies this (template) entry
    pub fn is_satisfied_by(&self, reported: &str) -> bool {
        self.is_wildcard() || self.value == reported
    }
}

/// Expected (or reported) measurement set for a software/firmware version pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcrTemplate {
    #[serde(rename = "eveVersion")]
    pub eve_version: String,

    #[serde(rename = "firmwareVersion")]
    pub firmware_version: String,

    #[serde(
        rename = "PCRValues",
        alias = "values",
        default,
        deserialize_with = "nullable_vec"
    )]
    pub values: Vec<PcrValue>,
}

impl PcrTemplate {
    /// Create an empty template for a version pair
    pub fn new(eve_version: impl Into<String>, firmware_version: impl Into<String>) -> Self {
        Self {
            eve_version: eve_version.into(),
            firmware_version: firmware_version.into(),
            values: Vec::new(),
        }
    }

    /// Add a PCR value (builder pattern)
    pub fn with_value(mut self, index: u32, value: impl Into<String>) -> Self {
        self.values.push(PcrValue::new(index, value));
        self
    }

    /// Look up the value recorded for a PCR index
    ///
    /// When an index appears more than once the first entry wins.
    pub fn value_at(&self, index: u32) -> Option<&str> {
        self.values
            .iter()
            .find(|v| v.index == index)
            .map(|v| v.value.as_str())
    }

    /// Whether the version pair equals another template's
    pub fn same_versions(&self, other: &PcrTemplate) -> bool {
        self.eve_version == other.eve_version && self.firmware_version == other.firmware_version
    }
}

/// Controller-wide attestation policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalOptions {
    #[serde(rename = "enforceTemplateAttestation", default)]
    pub enforce_template_attestation: bool,

    /// Templates in precedence order, first match wins
    #[serde(
        rename = "PCRTemplates",
        alias = "templates",
        default,
        deserialize_with = "nullable_vec"
    )]
    pub templates: Vec<PcrTemplate>,
}

impl GlobalOptions {
    /// Policy with template enforcement switched on
    pub fn enforcing(templates: Vec<PcrTemplate>) -> Self {
        Self {
            enforce_template_attestation: true,
            templates,
        }
    }

    /// Decode from JSON bytes
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Encode to JSON bytes
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Digest recorded by one TPM event for one hash bank
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TpmEventDigest {
    /// TCG algorithm identifier (e.g. 0x000B for SHA-256)
    pub hash_algo: u16,

    /// Hex-encoded digest
    pub digest: String,
}

/// One entry from a device's TPM event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TpmEventLogEntry {
    /// Position in the device's log
    pub index: u32,
    pub pcr_index: u32,
    pub event_type: u32,
    #[serde(default)]
    pub digests: Vec<TpmEventDigest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<String>,
}

/// Per-device attestation session state, persisted as the device's `Options` blob
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOptions {
    /// Challenge most recently issued to the device
    #[serde(default)]
    pub nonce: String,

    /// Proof of attestation, empty unless attested
    #[serde(rename = "integrityToken", default)]
    pub integrity_token: String,

    /// Latest measurements reported by the device
    #[serde(rename = "receivedPCRTemplate", default)]
    pub received_pcr_template: Option<PcrTemplate>,

    #[serde(default)]
    pub attested: bool,

    /// Raw event log entries backing the reported measurements (append-only)
    #[serde(
        rename = "eventLog",
        default,
        deserialize_with = "nullable_vec",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub event_log: Vec<TpmEventLogEntry>,

    #[serde(default)]
    pub state: AttestationState,
}

impl DeviceOptions {
    /// Decode from the JSON blob stored on a device
    ///
    /// Blobs written before the state machine existed carry only the
    /// `attested` flag; those are read back as `Attested`.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let mut options: DeviceOptions = serde_json::from_slice(bytes)?;
        if options.attested && options.state == AttestationState::Unchallenged {
            options.state = AttestationState::Attested;
        }
        Ok(options)
    }

    /// Encode to the JSON blob stored on a device
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Record of one API request received from a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,

    #[serde(rename = "client-ip")]
    pub client_ip: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwarded: Option<String>,

    pub method: String,
    pub url: String,
}

impl ApiRequest {
    /// Create a request record stamped with the current time
    pub fn new(
        client_ip: impl Into<String>,
        method: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            uuid: None,
            client_ip: client_ip.into(),
            forwarded: None,
            method: method.into(),
            url: url.into(),
        }
    }

    /// Attach the device UUID
    pub fn for_device(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Attach the `Forwarded` header value
    pub fn forwarded_for(mut self, forwarded: impl Into<String>) -> Self {
        self.forwarded = Some(forwarded.into());
        self
    }

    /// Encode to the JSON form appended to a device's requests stream
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A PEM-encoded certificate held as an opaque identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCertificate {
    pem: String,
}

impl DeviceCertificate {
    pub fn from_pem(pem: impl Into<String>) -> Self {
        Self { pem: pem.into() }
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }
}

/// Identity material bound to exactly one device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// The device's own certificate
    pub cert: Option<DeviceCertificate>,

    /// Onboarding certificate the device bootstrapped with
    pub onboard: Option<DeviceCertificate>,

    /// Free-form serial reported by the device
    pub serial: String,
}

impl DeviceIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cert(mut self, cert: DeviceCertificate) -> Self {
        self.cert = Some(cert);
        self
    }

    pub fn with_onboard(mut self, onboard: DeviceCertificate) -> Self {
        self.onboard = Some(onboard);
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = serial.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigIdentity {
    pub uuid: String,
    pub version: String,
}

/// Identity/version record a new device's configuration starts from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseDeviceConfig {
    pub id: ConfigIdentity,
}

/// Configuration blob a newly provisioned device starts with
pub fn create_base_config(device: Uuid) -> Result<Vec<u8>> {
    let config = BaseDeviceConfig {
        id: ConfigIdentity {
            uuid: device.to_string(),
            version: BASE_CONFIG_VERSION.to_string(),
        },
    };
    Ok(serde_json::to_vec(&config)?)
}

/// Options blob a newly provisioned device starts with
pub fn create_base_device_options(_device: Uuid) -> Result<Vec<u8>> {
    DeviceOptions::default().to_json()
}

/// Policy blob a new controller starts with
pub fn create_base_global_options() -> Result<Vec<u8>> {
    GlobalOptions::default().to_json()
}
