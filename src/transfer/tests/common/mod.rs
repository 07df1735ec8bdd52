//! Shared fixtures for the engine integration tests.
//!
//! Everything runs against in-memory stores; no registry is needed.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use a3s_transfer::oci::digest::sha256_digest;
use a3s_transfer::{BlobSource, BlobTarget, Descriptor, Manifest, ManifestSource, MemoryStore};
use a3s_transfer_core::progress::ProgressSink;
use a3s_transfer_core::{OciError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

/// Source store holding `files` as titled layers plus a config blob.
pub fn source_store(files: &[(&str, Vec<u8>)], config: &[u8]) -> (Arc<MemoryStore>, Manifest) {
    let store = MemoryStore::new("source");
    let config = store.add_blob(CONFIG_MEDIA_TYPE, config);
    let layers = files
        .iter()
        .map(|(title, data)| store.add_file(title, data))
        .collect();
    let manifest = Manifest::new(config, layers);
    store.set_root(manifest.clone());
    (Arc::new(store), manifest)
}

/// `n` bytes of deterministic, layer-specific content.
pub fn content(seed: u8, n: usize) -> Vec<u8> {
    (0..n).map(|i| seed.wrapping_add(i as u8)).collect()
}

/// Every blob in `store` hashes to the digest it is stored under.
pub fn assert_all_verified(store: &MemoryStore, descriptors: &[Descriptor]) {
    for desc in descriptors {
        if let Some(data) = store.get(&desc.digest) {
            assert_eq!(sha256_digest(&data), desc.digest, "corrupt blob {}", desc.digest);
            assert_eq!(data.len() as u64, desc.size);
        }
    }
}

/// Sink that records byte counts and status lines.
#[derive(Default)]
pub struct RecordingProgress {
    bytes: AtomicU64,
    messages: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl ProgressSink for RecordingProgress {
    fn advance(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    fn update(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }

    fn success(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }

    fn failure(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}

/// Source that cancels `token` when its `cancel_on`-th fetch starts and
/// then never finishes that fetch.
pub struct CancelingSource {
    pub inner: Arc<MemoryStore>,
    pub token: CancellationToken,
    pub cancel_on: usize,
    started: AtomicUsize,
}

impl CancelingSource {
    pub fn new(inner: Arc<MemoryStore>, token: CancellationToken, cancel_on: usize) -> Self {
        Self {
            inner,
            token,
            cancel_on,
            started: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BlobSource for CancelingSource {
    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        self.inner.exists(desc).await
    }

    async fn fetch(
        &self,
        desc: &Descriptor,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let n = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.cancel_on {
            // Half the content, then stall until the engine gives up.
            let data = self.inner.get(&desc.digest).unwrap_or_default();
            out.write_all(&data[..data.len() / 2]).await?;
            self.token.cancel();
            std::future::pending::<()>().await;
        }
        self.inner.fetch(desc, out).await
    }

    fn name(&self) -> String {
        "canceling".to_string()
    }
}

#[async_trait]
impl ManifestSource for CancelingSource {
    async fn fetch_root(&self) -> Result<Manifest> {
        self.inner.fetch_root().await
    }
}

/// Source that tracks how many fetches run at the same time.
pub struct ConcurrencyProbe {
    pub inner: Arc<MemoryStore>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobSource for ConcurrencyProbe {
    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        self.inner.exists(desc).await
    }

    async fn fetch(
        &self,
        desc: &Descriptor,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = self.inner.fetch(desc, out).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> String {
        "probe".to_string()
    }
}

#[async_trait]
impl ManifestSource for ConcurrencyProbe {
    async fn fetch_root(&self) -> Result<Manifest> {
        self.inner.fetch_root().await
    }
}

/// Source whose blobs come back with every byte flipped and no verification.
pub struct CorruptSource {
    pub inner: Arc<MemoryStore>,
}

#[async_trait]
impl BlobSource for CorruptSource {
    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        self.inner.exists(desc).await
    }

    async fn fetch(
        &self,
        desc: &Descriptor,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let data = self
            .inner
            .get(&desc.digest)
            .ok_or_else(|| OciError::NotFound(desc.digest.clone()))?;
        let flipped: Vec<u8> = data.iter().map(|b| !b).collect();
        out.write_all(&flipped).await?;
        Ok(flipped.len() as u64)
    }

    fn name(&self) -> String {
        "corrupt".to_string()
    }
}

#[async_trait]
impl ManifestSource for CorruptSource {
    async fn fetch_root(&self) -> Result<Manifest> {
        self.inner.fetch_root().await
    }
}

/// How a [`FailingTarget`] misbehaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    /// `exists` fails for every blob
    Exists,
    /// `push` fails for the blob with this size
    PushSize(u64),
}

/// Destination that fails on purpose, delegating everything else.
pub struct FailingTarget {
    pub inner: Arc<MemoryStore>,
    pub failure: Failure,
}

#[async_trait]
impl BlobSource for FailingTarget {
    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        if self.failure == Failure::Exists {
            return Err(OciError::Network {
                registry: "failing".to_string(),
                message: "HEAD failed".to_string(),
            });
        }
        self.inner.exists(desc).await
    }

    async fn fetch(
        &self,
        desc: &Descriptor,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        self.inner.fetch(desc, out).await
    }

    fn name(&self) -> String {
        "failing".to_string()
    }
}

#[async_trait]
impl BlobTarget for FailingTarget {
    async fn push(
        &self,
        desc: &Descriptor,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        if self.failure == Failure::PushSize(desc.size) {
            return Err(OciError::Network {
                registry: "failing".to_string(),
                message: io::Error::new(io::ErrorKind::ConnectionReset, "reset").to_string(),
            });
        }
        self.inner.push(desc, content).await
    }
}
