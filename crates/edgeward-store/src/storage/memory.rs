//! In-memory storage backend
//!
//! Default stream implementation holding chunks in memory.
//! Suitable for development, tests and single-instance deployments.
//! Data is lost on restart.
//!
//! Writes are appended to the open tail chunk until it would grow past the
//! configured maximum, at which point a new chunk is started. A single write
//! is never split across chunks. Once the tail chunk has been handed out by
//! `get` or a reader it is sealed, so later writes go to a fresh chunk and
//! bytes already returned never change.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::{Chunk, ChunkReader, ChunkedStream, StorageError, StreamFactory, StreamKind};
use crate::config::MaxSizes;

#[derive(Debug, Default)]
struct ChunkLog {
    chunks: Vec<Vec<u8>>,
    tail_sealed: bool,
}

impl ChunkLog {
    /// Copy out one chunk, sealing it if it is the tail
    fn take(&mut self, index: usize) -> Option<Vec<u8>> {
        let chunk = self.chunks.get(index)?.clone();
        if index + 1 == self.chunks.len() {
            self.tail_sealed = true;
        }
        Some(chunk)
    }
}

/// In-memory chunked stream
#[derive(Debug, Clone)]
pub struct MemoryStream {
    max_chunk_size: usize,
    log: Arc<Mutex<ChunkLog>>,
}

impl MemoryStream {
    /// Create an empty stream rotating chunks at `max_chunk_size` bytes
    pub fn new(max_chunk_size: usize) -> Self {
        Self {
            max_chunk_size,
            log: Arc::new(Mutex::new(ChunkLog::default())),
        }
    }

    /// Number of chunks currently held
    pub fn chunk_count(&self) -> usize {
        self.log.lock().map(|log| log.chunks.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChunkLog>, StorageError> {
        self.log
            .lock()
            .map_err(|_| StorageError::BackendWrite("memory stream lock poisoned".into()))
    }
}

#[async_trait]
impl ChunkedStream for MemoryStream {
    async fn write(&self, data: &[u8]) -> Result<usize, StorageError> {
        // an empty write stores no chunk
        if data.is_empty() {
            return Ok(0);
        }

        let mut guard = self.lock()?;
        let log = &mut *guard;
        let appendable = !log.tail_sealed
            && log
                .chunks
                .last()
                .map_or(false, |tail| tail.len() + data.len() <= self.max_chunk_size);

        match log.chunks.last_mut() {
            Some(tail) if appendable => tail.extend_from_slice(data),
            _ => {
                log.chunks.push(data.to_vec());
                log.tail_sealed = false;
                debug!(chunk = log.chunks.len() - 1, "Started new chunk");
            }
        }
        Ok(data.len())
    }

    async fn get(&self, index: usize) -> Result<Vec<u8>, StorageError> {
        let mut log = self.lock()?;
        let count = log.chunks.len();
        log.take(index).ok_or_else(|| {
            StorageError::NotFound(format!("chunk {} (stream has {} chunks)", index, count))
        })
    }

    async fn reader(&self) -> Result<Box<dyn ChunkReader>, StorageError> {
        Ok(Box::new(MemoryChunkReader {
            log: Arc::clone(&self.log),
            next: 0,
        }))
    }
}

/// Reader over a [`MemoryStream`], fetching each chunk when asked for it
struct MemoryChunkReader {
    log: Arc<Mutex<ChunkLog>>,
    next: usize,
}

#[async_trait]
impl ChunkReader for MemoryChunkReader {
    async fn next_chunk(&mut self) -> Result<Option<Chunk>, StorageError> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| StorageError::BackendRead("memory stream lock poisoned".into()))?;

        match log.take(self.next) {
            Some(data) => {
                self.next += 1;
                Ok(Some(Chunk::new(data)))
            }
            None => Ok(None),
        }
    }
}

/// Creates [`MemoryStream`]s sized from [`MaxSizes`]
#[derive(Debug, Clone, Default)]
pub struct MemoryStreamFactory {
    sizes: MaxSizes,
}

impl MemoryStreamFactory {
    pub fn new(sizes: MaxSizes) -> Self {
        Self { sizes }
    }
}

impl StreamFactory for MemoryStreamFactory {
    fn create_stream(
        &self,
        device: Uuid,
        kind: StreamKind,
    ) -> Result<Arc<dyn ChunkedStream>, StorageError> {
        let max = self.sizes.for_kind(kind);
        debug!(device = %device, stream = %kind, max_chunk_size = max, "Creating memory stream");
        Ok(Arc::new(MemoryStream::new(max)))
    }
}
