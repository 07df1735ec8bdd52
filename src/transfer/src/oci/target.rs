//! Content target traits.
//!
//! The copy and pull engines only talk to these traits, so a registry, a
//! local OCI layout and an in-memory store are interchangeable on either
//! side of a transfer.

use a3s_transfer_core::error::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use super::descriptor::Descriptor;
use super::manifest::Manifest;

/// Somewhere blobs can be read from.
#[async_trait]
pub trait BlobSource: Send + Sync {
    /// Whether a blob with this digest is already stored.
    async fn exists(&self, desc: &Descriptor) -> Result<bool>;

    /// Stream the blob into `out`. Content is size- and digest-verified
    /// before `Ok` is returned; the byte count is returned on success.
    async fn fetch(&self, desc: &Descriptor, out: &mut (dyn AsyncWrite + Send + Unpin))
        -> Result<u64>;

    /// Name used in logs and error messages.
    fn name(&self) -> String;
}

/// Somewhere blobs can be written to.
#[async_trait]
pub trait BlobTarget: BlobSource {
    /// Store the blob read from `content`. Nothing becomes visible unless
    /// the full content was read and matches `desc`.
    async fn push(&self, desc: &Descriptor, content: &mut (dyn AsyncRead + Send + Unpin))
        -> Result<()>;
}

/// Something with a root manifest.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch_root(&self) -> Result<Manifest>;
}

/// Something a root manifest can be written to.
#[async_trait]
pub trait ManifestTarget: Send + Sync {
    async fn push_root(&self, manifest: &Manifest) -> Result<()>;
}
