//! Chunked stream abstraction for device data
//!
//! Every append-only data stream a device produces (logs, metrics, info,
//! requests, flow records, certs, per-application logs) is stored as a
//! [`ChunkedStream`]: an ordered sequence of opaque byte chunks. Where one
//! chunk ends and the next begins is backend policy (size or time based);
//! the contract only guarantees write order and that chunks already handed
//! out never change.
//!
//! Chunks are never edited or removed through this interface.

pub mod memory;

pub use memory::{MemoryStream, MemoryStreamFactory};

use async_trait::async_trait;
use std::fmt::Debug;
use std::io::Cursor;
use std::sync::Arc;
use uuid::Uuid;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not initialized: {0}")]
    Uninitialized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Backend write error: {0}")]
    BackendWrite(String),

    #[error("Backend read error: {0}")]
    BackendRead(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<edgeward_core::EdgewardError> for StorageError {
    fn from(err: edgeward_core::EdgewardError) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// One immutable segment of a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    data: Vec<u8>,
}

impl Chunk {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Size of the chunk in bytes
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Reader over the chunk's bytes
    pub fn reader(&self) -> Cursor<&[u8]> {
        Cursor::new(&self.data)
    }
}

/// Lazy, forward-only iteration over a stream's chunks
///
/// A reader cannot be restarted; ask the stream for a new one instead.
#[async_trait]
pub trait ChunkReader: Send {
    /// Fetch the next chunk
    ///
    /// Returns `Ok(None)` once the chunks are exhausted; an `Err` is a read
    /// failure, not the end of the stream.
    async fn next_chunk(&mut self) -> Result<Option<Chunk>, StorageError>;
}

/// Append-only stream of byte chunks
///
/// Implementations must be thread-safe. Concurrent writes to the same stream
/// are serialized by the implementation so that chunk order is write order.
#[async_trait]
pub trait ChunkedStream: Send + Sync + Debug {
    /// Append data, possibly starting a new chunk. Returns bytes written.
    async fn write(&self, data: &[u8]) -> Result<usize, StorageError>;

    /// Fetch one chunk by position; `NotFound` when the index is out of range
    async fn get(&self, index: usize) -> Result<Vec<u8>, StorageError>;

    /// Start a sequential read from the first chunk
    async fn reader(&self) -> Result<Box<dyn ChunkReader>, StorageError>;
}

/// Drain a stream into memory, in order
pub async fn read_chunks(stream: &dyn ChunkedStream) -> Result<Vec<Chunk>, StorageError> {
    let mut reader = stream.reader().await?;
    let mut chunks = Vec::new();
    while let Some(chunk) = reader.next_chunk().await? {
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// The named streams a device owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Logs,
    Info,
    Metrics,
    Requests,
    FlowMessage,
    Certs,
    /// Log stream of one application instance
    AppLog(Uuid),
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Logs => f.write_str("logs"),
            StreamKind::Info => f.write_str("info"),
            StreamKind::Metrics => f.write_str("metrics"),
            StreamKind::Requests => f.write_str("requests"),
            StreamKind::FlowMessage => f.write_str("flow-message"),
            StreamKind::Certs => f.write_str("certs"),
            StreamKind::AppLog(instance) => write!(f, "app-log/{}", instance),
        }
    }
}

/// Creates backend streams for devices
///
/// Which backend a controller uses is decided by whoever constructs the
/// factory; the device layer only sees [`ChunkedStream`] handles.
pub trait StreamFactory: Send + Sync + Debug {
    fn create_stream(
        &self,
        device: Uuid,
        kind: StreamKind,
    ) -> Result<Arc<dyn ChunkedStream>, StorageError>;
}
