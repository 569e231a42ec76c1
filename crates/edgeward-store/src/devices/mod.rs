//! Device-level storage: the per-device aggregate and the registry of devices

pub mod registry;
pub mod storage;

pub use registry::DeviceRegistry;
pub use storage::{DeviceStorage, DeviceStorageBuilder};

use edgeward_core::EdgewardError;

use crate::storage::StorageError;

/// Error from a device operation that touches both storage and attestation
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Attestation(#[from] EdgewardError),
}
