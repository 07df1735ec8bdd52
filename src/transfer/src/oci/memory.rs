//! In-memory content store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use a3s_transfer_core::error::{OciError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::descriptor::Descriptor;
use super::digest::{sha256_digest, DigestVerifier, VerifyingReader};
use super::manifest::Manifest;
use super::target::{BlobSource, BlobTarget, ManifestSource, ManifestTarget};

/// Media type used by [`MemoryStore::add_file`].
const MEDIA_TYPE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";

/// Concurrent digest → bytes map with an optional root manifest.
///
/// Counts fetches and pushes so callers can check what a transfer actually did.
#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    blobs: DashMap<String, Arc<Vec<u8>>>,
    root: RwLock<Option<Manifest>>,
    fetches: AtomicUsize,
    pushes: AtomicUsize,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Insert a blob directly, bypassing verification.
    pub fn insert(&self, digest: impl Into<String>, data: Vec<u8>) {
        self.blobs.insert(digest.into(), Arc::new(data));
    }

    /// Store `data` and return its descriptor.
    pub fn add_blob(&self, media_type: &str, data: &[u8]) -> Descriptor {
        let desc = Descriptor::new(media_type, sha256_digest(data), data.len() as u64);
        self.insert(desc.digest.clone(), data.to_vec());
        desc
    }

    /// Store `data` as a file layer titled `title`.
    pub fn add_file(&self, title: &str, data: &[u8]) -> Descriptor {
        self.add_blob(MEDIA_TYPE_LAYER, data).with_title(title)
    }

    pub fn set_root(&self, manifest: Manifest) {
        *self.root.write() = Some(manifest);
    }

    pub fn root(&self) -> Option<Manifest> {
        self.root.read().clone()
    }

    pub fn get(&self, digest: &str) -> Option<Arc<Vec<u8>>> {
        self.blobs.get(digest).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.blobs.contains_key(digest)
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Number of `fetch` calls that found their blob.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of committed pushes.
    pub fn pushes(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobSource for MemoryStore {
    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        Ok(self.blobs.contains_key(&desc.digest))
    }

    async fn fetch(
        &self,
        desc: &Descriptor,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let data = self
            .get(&desc.digest)
            .ok_or_else(|| OciError::NotFound(format!("{} in {}", desc.digest, self.name)))?;
        self.fetches.fetch_add(1, Ordering::SeqCst);

        out.write_all(&data).await?;
        out.flush().await?;

        let mut verifier = DigestVerifier::new();
        verifier.update(&data);
        verifier.verify(desc)?;
        Ok(verifier.size())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

#[async_trait]
impl BlobTarget for MemoryStore {
    async fn push(
        &self,
        desc: &Descriptor,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        let mut reader = VerifyingReader::new(content);
        let mut data = Vec::with_capacity(desc.size as usize);
        reader.read_to_end(&mut data).await?;
        reader.verifier().verify(desc)?;

        self.blobs.insert(desc.digest.clone(), Arc::new(data));
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ManifestSource for MemoryStore {
    async fn fetch_root(&self) -> Result<Manifest> {
        self.root()
            .ok_or_else(|| OciError::NotFound(format!("root manifest in {}", self.name)))
    }
}

#[async_trait]
impl ManifestTarget for MemoryStore {
    async fn push_root(&self, manifest: &Manifest) -> Result<()> {
        let data = manifest.to_json()?;
        self.insert(sha256_digest(&data), data);
        self.set_root(manifest.clone());
        Ok(())
    }
}
