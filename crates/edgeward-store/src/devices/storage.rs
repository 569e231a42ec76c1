//! Per-device storage aggregate
//!
//! One [`DeviceStorage`] exists per device UUID. It binds the device's
//! identity to its named streams, its dynamic set of application-log
//! substreams, and the small scalar blobs (config, attestation artifacts,
//! options).
//!
//! Locking is per concern: each stream serializes its own writes, the
//! app-log map has its own lock, and the options blob is guarded separately
//! so attestation transitions on one device never wait on stream writes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use edgeward_core::{
    AttestationSession, DeviceCertificate, DeviceIdentity, DeviceOptions,
};

use super::DeviceError;
use crate::storage::{ChunkedStream, StorageError, StreamFactory, StreamKind};

type StreamHandle = Arc<dyn ChunkedStream>;

/// Storage aggregate for one device
#[derive(Debug)]
pub struct DeviceStorage {
    id: Uuid,

    info: Option<StreamHandle>,
    metrics: Option<StreamHandle>,
    logs: Option<StreamHandle>,
    requests: Option<StreamHandle>,
    flow_message: Option<StreamHandle>,
    certs: Option<StreamHandle>,

    /// Application instance UUID -> log stream
    app_logs: Option<RwLock<HashMap<Uuid, StreamHandle>>>,

    identity: RwLock<DeviceIdentity>,

    /// Caller-maintained log cursor, independent of chunk rotation
    current_log: AtomicUsize,
    config: RwLock<Vec<u8>>,
    attest_certs: RwLock<Vec<u8>>,
    storage_keys: RwLock<Vec<u8>>,

    /// JSON-encoded `DeviceOptions`
    options: Mutex<Vec<u8>>,
}

impl DeviceStorage {
    /// Create an aggregate with no streams provisioned
    ///
    /// Every `add_*` call on it fails with `Uninitialized`.
    pub fn new(id: Uuid) -> Self {
        DeviceStorageBuilder::new(id).build()
    }

    /// Start building an aggregate for a device
    pub fn builder(id: Uuid) -> DeviceStorageBuilder {
        DeviceStorageBuilder::new(id)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    // =========================================================================
    // Stream writes
    // =========================================================================

    async fn append(
        stream: &Option<StreamHandle>,
        operation: &str,
        name: &str,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let stream = stream.as_ref().ok_or_else(|| {
            StorageError::Uninitialized(format!("{}: {} stream not yet initialized", operation, name))
        })?;
        stream.write(data).await?;
        Ok(())
    }

    pub async fn add_logs(&self, data: &[u8]) -> Result<(), StorageError> {
        Self::append(&self.logs, "AddLogs", "logs", data).await
    }

    pub async fn add_info(&self, data: &[u8]) -> Result<(), StorageError> {
        Self::append(&self.info, "AddInfo", "info", data).await
    }

    pub async fn add_metrics(&self, data: &[u8]) -> Result<(), StorageError> {
        Self::append(&self.metrics, "AddMetrics", "metrics", data).await
    }

    pub async fn add_request(&self, data: &[u8]) -> Result<(), StorageError> {
        Self::append(&self.requests, "AddRequest", "requests", data).await
    }

    pub async fn add_flow_record(&self, data: &[u8]) -> Result<(), StorageError> {
        Self::append(&self.flow_message, "AddFlowRecord", "flow message", data).await
    }

    pub async fn add_certs(&self, data: &[u8]) -> Result<(), StorageError> {
        Self::append(&self.certs, "AddCerts", "certs", data).await
    }

    /// Append to an application instance's log
    ///
    /// The substream must already exist; see [`DeviceStorage::create_app_log`].
    pub async fn add_app_log(&self, instance: Uuid, data: &[u8]) -> Result<(), StorageError> {
        let stream = self.app_log(instance)?;
        debug!(device = %self.id, instance = %instance, bytes = data.len(), "Appending app log");
        stream.write(data).await?;
        Ok(())
    }

    // =========================================================================
    // App-log substreams
    // =========================================================================

    fn app_log_map(&self) -> Result<&RwLock<HashMap<Uuid, StreamHandle>>, StorageError> {
        self.app_logs.as_ref().ok_or_else(|| {
            StorageError::Uninitialized("AddAppLog: app logs not yet initialized".into())
        })
    }

    /// Register the log substream for an application instance
    ///
    /// Idempotent: when the instance already has a stream, that stream is
    /// returned and `create` is not called. Creation happens under the map's
    /// write lock so two callers can never install different streams for the
    /// same instance.
    pub fn create_app_log<F>(
        &self,
        instance: Uuid,
        create: F,
    ) -> Result<StreamHandle, StorageError>
    where
        F: FnOnce() -> Result<StreamHandle, StorageError>,
    {
        let mut app_logs = self
            .app_log_map()?
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = app_logs.get(&instance) {
            return Ok(Arc::clone(existing));
        }

        let stream = create()?;
        app_logs.insert(instance, Arc::clone(&stream));
        info!(device = %self.id, instance = %instance, "Created app log substream");
        Ok(stream)
    }

    /// Log stream of one application instance
    pub fn app_log(&self, instance: Uuid) -> Result<StreamHandle, StorageError> {
        let app_logs = self
            .app_log_map()?
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        app_logs.get(&instance).cloned().ok_or_else(|| {
            StorageError::NotFound(format!(
                "AddAppLog: app logs for instance {} not yet initialized",
                instance
            ))
        })
    }

    /// Application instances that have a log substream
    pub fn app_log_instances(&self) -> Vec<Uuid> {
        match &self.app_logs {
            Some(app_logs) => app_logs
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }

    // =========================================================================
    // Stream handles for readers
    // =========================================================================

    fn handle(stream: &Option<StreamHandle>, name: &str) -> Result<StreamHandle, StorageError> {
        stream
            .clone()
            .ok_or_else(|| StorageError::Uninitialized(format!("{} stream not yet initialized", name)))
    }

    pub fn logs(&self) -> Result<StreamHandle, StorageError> {
        Self::handle(&self.logs, "logs")
    }

    pub fn info(&self) -> Result<StreamHandle, StorageError> {
        Self::handle(&self.info, "info")
    }

    pub fn metrics(&self) -> Result<StreamHandle, StorageError> {
        Self::handle(&self.metrics, "metrics")
    }

    pub fn requests(&self) -> Result<StreamHandle, StorageError> {
        Self::handle(&self.requests, "requests")
    }

    pub fn flow_messages(&self) -> Result<StreamHandle, StorageError> {
        Self::handle(&self.flow_message, "flow message")
    }

    pub fn certs(&self) -> Result<StreamHandle, StorageError> {
        Self::handle(&self.certs, "certs")
    }

    // =========================================================================
    // Identity and scalar fields
    // =========================================================================

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn cert(&self) -> Option<DeviceCertificate> {
        self.identity().cert
    }

    /// Record the device's operational certificate
    pub fn set_cert(&self, cert: DeviceCertificate) {
        self.identity
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .cert = Some(cert);
    }

    pub fn onboard(&self) -> Option<DeviceCertificate> {
        self.identity().onboard
    }

    pub fn serial(&self) -> String {
        self.identity().serial
    }

    /// Last-applied configuration blob
    pub fn config(&self) -> Vec<u8> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the configuration blob wholesale
    pub fn set_config(&self, config: Vec<u8>) {
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        info!(device = %self.id, "Updated device config");
    }

    pub fn attest_certs(&self) -> Vec<u8> {
        self.attest_certs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_attest_certs(&self, certs: Vec<u8>) {
        *self.attest_certs.write().unwrap_or_else(PoisonError::into_inner) = certs;
    }

    pub fn storage_keys(&self) -> Vec<u8> {
        self.storage_keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_storage_keys(&self, keys: Vec<u8>) {
        *self.storage_keys.write().unwrap_or_else(PoisonError::into_inner) = keys;
    }

    /// Log position recorded by the caller
    ///
    /// Bookkeeping only: appending to the logs stream never moves it, so a
    /// caller that tracks which chunk it is shipping sets it explicitly.
    pub fn current_log(&self) -> usize {
        self.current_log.load(Ordering::SeqCst)
    }

    pub fn set_current_log(&self, index: usize) {
        self.current_log.store(index, Ordering::SeqCst);
    }

    // =========================================================================
    // Attestation options
    // =========================================================================

    /// Raw JSON options blob
    ///
    /// Options only change through [`DeviceStorage::with_attestation`].
    pub fn options(&self) -> Vec<u8> {
        self.options
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Decoded attestation options
    pub fn device_options(&self) -> Result<DeviceOptions, DeviceError> {
        let blob = self.options();
        Self::decode_options(self.id, &blob)
    }

    /// Whether the device currently holds a successful attestation
    pub fn is_attested(&self) -> bool {
        match self.device_options() {
            Ok(options) => options.attested,
            Err(e) => {
                warn!(device = %self.id, error = %e, "Unreadable attestation options");
                false
            }
        }
    }

    fn decode_options(id: Uuid, blob: &[u8]) -> Result<DeviceOptions, DeviceError> {
        if blob.is_empty() {
            return Err(StorageError::Uninitialized(format!(
                "options for device {} not yet initialized",
                id
            ))
            .into());
        }
        Ok(DeviceOptions::from_json(blob)?)
    }

    /// Run one attestation transition atomically
    ///
    /// The options blob is locked, decoded, handed to `f` as an
    /// [`AttestationSession`], and written back only if `f` succeeds.
    /// Transitions on the same device are serialized; other devices are
    /// unaffected.
    pub fn with_attestation<T, F>(&self, f: F) -> Result<T, DeviceError>
    where
        F: FnOnce(&mut AttestationSession<'_>) -> edgeward_core::Result<T>,
    {
        let mut blob = self.options.lock().unwrap_or_else(PoisonError::into_inner);
        let mut options = Self::decode_options(self.id, &blob)?;

        let result = {
            let mut session = AttestationSession::new(self.id, &mut options);
            f(&mut session)?
        };

        *blob = options.to_json()?;
        Ok(result)
    }
}

/// Builder for [`DeviceStorage`]
#[derive(Debug)]
pub struct DeviceStorageBuilder {
    id: Uuid,
    identity: DeviceIdentity,
    info: Option<StreamHandle>,
    metrics: Option<StreamHandle>,
    logs: Option<StreamHandle>,
    requests: Option<StreamHandle>,
    flow_message: Option<StreamHandle>,
    certs: Option<StreamHandle>,
    app_logs: bool,
    config: Vec<u8>,
    options: Vec<u8>,
}

impl DeviceStorageBuilder {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            identity: DeviceIdentity::default(),
            info: None,
            metrics: None,
            logs: None,
            requests: None,
            flow_message: None,
            certs: None,
            app_logs: false,
            config: Vec::new(),
            options: Vec::new(),
        }
    }

    pub fn identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn info(mut self, stream: StreamHandle) -> Self {
        self.info = Some(stream);
        self
    }

    pub fn metrics(mut self, stream: StreamHandle) -> Self {
        self.metrics = Some(stream);
        self
    }

    pub fn logs(mut self, stream: StreamHandle) -> Self {
        self.logs = Some(stream);
        self
    }

    pub fn requests(mut self, stream: StreamHandle) -> Self {
        self.requests = Some(stream);
        self
    }

    pub fn flow_message(mut self, stream: StreamHandle) -> Self {
        self.flow_message = Some(stream);
        self
    }

    pub fn certs(mut self, stream: StreamHandle) -> Self {
        self.certs = Some(stream);
        self
    }

    /// Enable the (initially empty) app-log substream map
    pub fn with_app_logs(mut self) -> Self {
        self.app_logs = true;
        self
    }

    pub fn config(mut self, config: Vec<u8>) -> Self {
        self.config = config;
        self
    }

    pub fn options(mut self, options: Vec<u8>) -> Self {
        self.options = options;
        self
    }

    /// Create every named stream from a factory and enable app logs
    pub fn streams_from(self, factory: &dyn StreamFactory) -> Result<Self, StorageError> {
        let id = self.id;
        Ok(self
            .info(factory.create_stream(id, StreamKind::Info)?)
            .metrics(factory.create_stream(id, StreamKind::Metrics)?)
            .logs(factory.create_stream(id, StreamKind::Logs)?)
            .requests(factory.create_stream(id, StreamKind::Requests)?)
            .flow_message(factory.create_stream(id, StreamKind::FlowMessage)?)
            .certs(factory.create_stream(id, StreamKind::Certs)?)
            .with_app_logs())
    }

    pub fn build(self) -> DeviceStorage {
        DeviceStorage {
            id: self.id,
            info: self.info,
            metrics: self.metrics,
            logs: self.logs,
            requests: self.requests,
            flow_message: self.flow_message,
            certs: self.certs,
            app_logs: self.app_logs.then(|| RwLock::new(HashMap::new())),
            identity: RwLock::new(self.identity),
            current_log: AtomicUsize::new(0),
            config: RwLock::new(self.config),
            attest_certs: RwLock::new(Vec::new()),
            storage_keys: RwLock::new(Vec::new()),
            options: Mutex::new(self.options),
        }
    }
}
