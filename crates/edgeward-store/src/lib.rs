//! # Edgeward Store
//!
//! Device data storage for the edgeward controller.
//!
//! - [`storage`]: the append-only chunked stream contract and its in-memory backend
//! - [`devices`]: the per-device storage aggregate and the device registry
//! - [`config`]: chunk size limits read from the environment
//!
//! ## Storage Invariants
//!
//! 1. **Write order**: chunks of a stream are returned in the order they were written
//! 2. **Immutability**: a chunk already handed to a reader never changes
//! 3. **Isolation**: each application instance's log lives in its own substream

pub mod config;
pub mod devices;
pub mod storage;

pub use config::{MaxSizes, StoreConfig};
pub use devices::{DeviceError, DeviceRegistry, DeviceStorage, DeviceStorageBuilder};
pub use storage::{
    read_chunks, Chunk, ChunkReader, ChunkedStream, MemoryStream, MemoryStreamFactory,
    StorageError, StreamFactory, StreamKind,
};
