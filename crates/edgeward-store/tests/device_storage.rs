//! Device Storage Integration Tests
//!
//! These tests drive the device aggregate through the registry the way the
//! controller's request handlers do:
//! - Writes before and after provisioning
//! - Chunk ordering and immutability across readers
//! - App-log isolation under concurrent writers
//! - Per-stream isolation of backend failures

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use edgeward_core::{create_base_device_options, DeviceIdentity};
use edgeward_store::{
    read_chunks, ChunkReader, ChunkedStream, DeviceRegistry, DeviceStorage, MaxSizes,
    MemoryStream, StorageError, StoreConfig,
};
use uuid::Uuid;

// =============================================================================
// Test Helpers
// =============================================================================

fn small_chunks() -> StoreConfig {
    StoreConfig {
        max_sizes: MaxSizes {
            max_log_size: 8,
            max_app_logs_size: 8,
            ..MaxSizes::default()
        },
    }
}

fn concat(chunks: &[edgeward_store::Chunk]) -> Vec<u8> {
    chunks.iter().flat_map(|c| c.as_bytes().to_vec()).collect()
}

/// Stream whose writes can be switched to fail
#[derive(Debug)]
struct FlakyStream {
    failing: AtomicBool,
    inner: MemoryStream,
}

impl FlakyStream {
    fn new() -> Self {
        Self {
            failing: AtomicBool::new(false),
            inner: MemoryStream::new(1024),
        }
    }
}

#[async_trait]
impl ChunkedStream for FlakyStream {
    async fn write(&self, data: &[u8]) -> Result<usize, StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::BackendWrite("disk full".into()));
        }
        self.inner.write(data).await
    }

    async fn get(&self, index: usize) -> Result<Vec<u8>, StorageError> {
        self.inner.get(index).await
    }

    async fn reader(&self) -> Result<Box<dyn ChunkReader>, StorageError> {
        self.inner.reader().await
    }
}

// =============================================================================
// Provisioning
// =============================================================================

#[tokio::test]
async fn test_write_succeeds_only_after_provisioning() {
    let id = Uuid::new_v4();
    let data = b"boot: kernel started";

    let unprovisioned = DeviceStorage::new(id);
    let result = unprovisioned.add_logs(data).await;
    assert!(matches!(result, Err(StorageError::Uninitialized(_))));

    let registry = DeviceRegistry::in_memory(&StoreConfig::default());
    let device = registry.provision(id, DeviceIdentity::new()).unwrap();
    device.add_logs(data).await.unwrap();

    let chunks = read_chunks(device.logs().unwrap().as_ref()).await.unwrap();
    assert_eq!(chunks.last().unwrap().as_bytes(), data);
}

// =============================================================================
// Chunk Ordering
// =============================================================================

#[tokio::test]
async fn test_chunks_follow_write_order() {
    let registry = DeviceRegistry::in_memory(&small_chunks());
    let device = registry.provision(Uuid::new_v4(), DeviceIdentity::new()).unwrap();

    let writes: Vec<Vec<u8>> = (0..10).map(|i| format!("line-{}", i).into_bytes()).collect();
    for data in &writes {
        device.add_logs(data).await.unwrap();
    }

    let logs = device.logs().unwrap();
    let first = read_chunks(logs.as_ref()).await.unwrap();
    assert!(first.len() > 1, "small limit should rotate chunks");
    assert_eq!(concat(&first), writes.concat());

    device.add_logs(b"late").await.unwrap();

    let second = read_chunks(logs.as_ref()).await.unwrap();
    assert_eq!(&second[..first.len()], &first[..]);
    assert_eq!(second.last().unwrap().as_bytes(), b"late");
}

#[tokio::test]
async fn test_random_access_matches_reader() {
    let registry = DeviceRegistry::in_memory(&small_chunks());
    let device = registry.provision(Uuid::new_v4(), DeviceIdentity::new()).unwrap();

    for data in [b"aaaaaa", b"bbbbbb", b"cccccc"] {
        device.add_logs(data).await.unwrap();
    }

    let logs = device.logs().unwrap();
    let chunks = read_chunks(logs.as_ref()).await.unwrap();
    for (index, chunk) in chunks.iter().enumerate() {
        assert_eq!(logs.get(index).await.unwrap(), chunk.as_bytes());
    }
    assert!(matches!(
        logs.get(chunks.len()).await,
        Err(StorageError::NotFound(_))
    ));
}

// =============================================================================
// App-Log Isolation
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_app_logs_isolated_under_concurrency() {
    let registry = Arc::new(DeviceRegistry::in_memory(&small_chunks()));
    let id = Uuid::new_v4();
    let device = registry.provision(id, DeviceIdentity::new()).unwrap();

    let instances: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
    let mut handles = Vec::new();
    for (n, instance) in instances.iter().copied().enumerate() {
        let registry = Arc::clone(&registry);
        let device = Arc::clone(&device);
        handles.push(tokio::spawn(async move {
            registry.provision_app_log(id, instance).unwrap();
            for i in 0..25 {
                let line = format!("{}:{};", n, i);
                device.add_app_log(instance, line.as_bytes()).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut seen = device.app_log_instances();
    seen.sort();
    let mut expected = instances.clone();
    expected.sort();
    assert_eq!(seen, expected);

    for (n, instance) in instances.iter().enumerate() {
        let stream = device.app_log(*instance).unwrap();
        let content = String::from_utf8(concat(&read_chunks(stream.as_ref()).await.unwrap())).unwrap();
        let wanted: String = (0..25).map(|i| format!("{}:{};", n, i)).collect();
        assert_eq!(content, wanted);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_substream_creation_single_winner() {
    let registry = Arc::new(DeviceRegistry::in_memory(&StoreConfig::default()));
    let id = Uuid::new_v4();
    let instance = Uuid::new_v4();
    let device = registry.provision(id, DeviceIdentity::new()).unwrap();

    let mut handles = Vec::new();
    for n in 0u8..8 {
        let registry = Arc::clone(&registry);
        let device = Arc::clone(&device);
        handles.push(tokio::spawn(async move {
            registry.provision_app_log(id, instance).unwrap();
            device.add_app_log(instance, &[n]).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(device.app_log_instances().len(), 1);
    let stream = device.app_log(instance).unwrap();
    let mut bytes = concat(&read_chunks(stream.as_ref()).await.unwrap());
    bytes.sort();
    assert_eq!(bytes, (0..8).collect::<Vec<u8>>());
}

// =============================================================================
// Stream Isolation
// =============================================================================

#[tokio::test]
async fn test_backend_failure_confined_to_one_stream() {
    let id = Uuid::new_v4();
    let flaky = Arc::new(FlakyStream::new());
    let device = DeviceStorage::builder(id)
        .logs(flaky.clone())
        .metrics(Arc::new(MemoryStream::new(1024)))
        .options(create_base_device_options(id).unwrap())
        .build();

    flaky.failing.store(true, Ordering::SeqCst);

    let result = device.add_logs(b"lost").await;
    assert!(matches!(result, Err(StorageError::BackendWrite(_))));

    device.add_metrics(b"cpu=3").await.unwrap();
    let metrics = read_chunks(device.metrics().unwrap().as_ref()).await.unwrap();
    assert_eq!(metrics[0].as_bytes(), b"cpu=3");

    let logs = read_chunks(device.logs().unwrap().as_ref()).await.unwrap();
    assert!(logs.is_empty());
}

#[tokio::test]
async fn test_devices_do_not_share_streams() {
    let registry = DeviceRegistry::in_memory(&StoreConfig::default());
    let a = registry.provision(Uuid::new_v4(), DeviceIdentity::new()).unwrap();
    let b = registry.provision(Uuid::new_v4(), DeviceIdentity::new()).unwrap();

    a.add_info(b"device-a").await.unwrap();

    assert!(read_chunks(b.info().unwrap().as_ref()).await.unwrap().is_empty());
    assert_eq!(registry.list_devices().len(), 2);
}
