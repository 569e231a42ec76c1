//! Device registry
//!
//! Owns every provisioned [`DeviceStorage`], the controller-wide attestation
//! policy, and the key integrity tokens are signed with.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use edgeward_core::{
    create_base_config, create_base_device_options, AttestationState, DeviceIdentity,
    EdgewardError, GlobalOptions, IntegrityGrant, KeyPair, PcrTemplate, PublicKey,
    TpmEventLogEntry,
};

use super::{DeviceError, DeviceStorage};
use crate::config::StoreConfig;
use crate::storage::{ChunkedStream, MemoryStreamFactory, StorageError, StreamFactory, StreamKind};

/// Registry of provisioned devices
#[derive(Debug)]
pub struct DeviceRegistry {
    /// Device UUID -> storage aggregate
    devices: RwLock<HashMap<Uuid, Arc<DeviceStorage>>>,

    /// Backend for new streams
    factory: Arc<dyn StreamFactory>,

    /// Attestation policy applied to every device
    global: RwLock<GlobalOptions>,

    /// Signs integrity tokens
    token_key: KeyPair,
}

impl DeviceRegistry {
    pub fn new(factory: Arc<dyn StreamFactory>, token_key: KeyPair) -> Self {
        info!(kid = %token_key.kid(), "Device registry initialized");
        Self {
            devices: RwLock::new(HashMap::new()),
            factory,
            global: RwLock::new(GlobalOptions::default()),
            token_key,
        }
    }

    /// Registry backed by in-memory streams and a freshly generated token key
    pub fn in_memory(config: &StoreConfig) -> Self {
        Self::new(
            Arc::new(MemoryStreamFactory::new(config.max_sizes)),
            KeyPair::generate("edgeward-integrity"),
        )
    }

    // =========================================================================
    // Devices
    // =========================================================================

    /// Provision storage for a new device
    ///
    /// Creates every named stream, seeds the base config and empty
    /// attestation options.
    pub fn provision(
        &self,
        id: Uuid,
        identity: DeviceIdentity,
    ) -> Result<Arc<DeviceStorage>, StorageError> {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        if devices.contains_key(&id) {
            return Err(StorageError::AlreadyExists(format!("device {}", id)));
        }

        let device = DeviceStorage::builder(id)
            .identity(identity)
            .streams_from(self.factory.as_ref())?
            .config(create_base_config(id)?)
            .options(create_base_device_options(id)?)
            .build();
        let device = Arc::new(device);

        devices.insert(id, Arc::clone(&device));
        info!(device = %id, serial = %device.serial(), "Provisioned device storage");
        Ok(device)
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<DeviceStorage>, StorageError> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices
            .get(&id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("device {}", id)))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices.contains_key(&id)
    }

    pub fn device_count(&self) -> usize {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices.len()
    }

    pub fn list_devices(&self) -> Vec<Uuid> {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        devices.keys().copied().collect()
    }

    /// Ensure an application instance on a device has a log substream
    pub fn provision_app_log(
        &self,
        id: Uuid,
        instance: Uuid,
    ) -> Result<Arc<dyn ChunkedStream>, StorageError> {
        let device = self.get(id)?;
        device.create_app_log(instance, || {
            self.factory.create_stream(id, StreamKind::AppLog(instance))
        })
    }

    // =========================================================================
    // Attestation policy
    // =========================================================================

    pub fn global_options(&self) -> GlobalOptions {
        self.global
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the attestation policy
    ///
    /// Devices already attested keep their tokens until
    /// [`DeviceRegistry::reevaluate_attested`] is run.
    pub fn set_global_options(&self, options: GlobalOptions) {
        info!(
            enforce = options.enforce_template_attestation,
            templates = options.templates.len(),
            "Updated attestation policy"
        );
        *self.global.write().unwrap_or_else(PoisonError::into_inner) = options;
    }

    // =========================================================================
    // Attestation
    // =========================================================================

    pub fn issue_nonce(&self, id: Uuid) -> Result<String, DeviceError> {
        self.get(id)?.with_attestation(|session| session.issue_nonce())
    }

    pub fn record_measurement(
        &self,
        id: Uuid,
        reported: PcrTemplate,
        events: Vec<TpmEventLogEntry>,
    ) -> Result<(), DeviceError> {
        self.get(id)?
            .with_attestation(|session| session.record_measurement(reported, events))
    }

    /// Evaluate a device's recorded measurements against the current policy
    pub fn evaluate(&self, id: Uuid) -> Result<bool, DeviceError> {
        let global = self.global_options();
        self.get(id)?
            .with_attestation(|session| session.evaluate(&global, &self.token_key))
    }

    /// Re-check every attested device against the current policy
    ///
    /// Returns the devices that lost their attestation.
    pub fn reevaluate_attested(&self) -> Result<Vec<Uuid>, DeviceError> {
        let global = self.global_options();
        let devices: Vec<Arc<DeviceStorage>> = {
            let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
            devices.values().cloned().collect()
        };

        let mut revoked = Vec::new();
        for device in &devices {
            let still_attested = device.with_attestation(|session| {
                if session.state() != AttestationState::Attested {
                    return Ok(None);
                }
                session.reevaluate(&global, &self.token_key).map(Some)
            })?;
            if still_attested == Some(false) {
                revoked.push(device.id());
            }
        }

        if !revoked.is_empty() {
            warn!(count = revoked.len(), "SECURITY: Attestation revoked after policy change");
        }
        Ok(revoked)
    }

    // =========================================================================
    // Integrity tokens
    // =========================================================================

    pub fn token_public_key(&self) -> PublicKey {
        self.token_key.public_key()
    }

    /// Check a token presented by a device
    ///
    /// The signature must verify, the grant must name this device, and the
    /// token must be the one currently stored for it.
    pub fn verify_integrity_token(
        &self,
        id: Uuid,
        token: &str,
    ) -> Result<IntegrityGrant, DeviceError> {
        let grant = self.token_key.public_key().verify_token(token)?;

        if grant.device != id {
            warn!(device = %id, granted = %grant.device, "SECURITY: Integrity token presented by wrong device");
            return Err(EdgewardError::InvalidToken("token issued to another device".into()).into());
        }

        let options = self.get(id)?.device_options()?;
        if !options.attested || options.integrity_token != token {
            warn!(device = %id, "SECURITY: Stale integrity token");
            return Err(EdgewardError::InvalidToken("token is not current".into()).into());
        }

        Ok(grant)
    }
}
