//! Local OCI image layout store.
//!
//! Directory layout:
//! - `oci-layout`
//! - `index.json`
//! - `blobs/sha256/<hex>`
//!
//! Used as a local copy destination and as the read-through cache of a
//! [`Remote`](super::remote::Remote).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use a3s_transfer_core::error::{OciError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::descriptor::{Descriptor, ANNOTATION_REF_NAME};
use super::digest::{parse_digest, sha256_digest, VerifyingReader, VerifyingWriter};
use super::manifest::{Manifest, MEDIA_TYPE_IMAGE_MANIFEST};
use super::target::{BlobSource, BlobTarget, ManifestSource, ManifestTarget};

const OCI_LAYOUT_FILE: &str = "oci-layout";
const OCI_LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;
const INDEX_FILE: &str = "index.json";
const DEFAULT_TAG: &str = "latest";

/// Distinguishes concurrent temporary files for the same digest.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `index.json` contents.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutIndex {
    schema_version: u32,
    #[serde(default)]
    manifests: Vec<Descriptor>,
}

/// Removes a temporary file unless it was committed.
pub(crate) struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Content store backed by an OCI image layout directory.
#[derive(Debug, Clone)]
pub struct OciLayoutStore {
    root: PathBuf,
    tag: String,
}

impl OciLayoutStore {
    /// Open (creating if needed) a layout at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let blobs_dir = root.join("blobs").join("sha256");
        std::fs::create_dir_all(&blobs_dir).map_err(|e| {
            OciError::Other(format!(
                "Failed to create blobs directory {}: {}",
                blobs_dir.display(),
                e
            ))
        })?;

        let layout_file = root.join(OCI_LAYOUT_FILE);
        if !layout_file.exists() {
            std::fs::write(&layout_file, OCI_LAYOUT_CONTENT).map_err(|e| {
                OciError::Other(format!("Failed to write {}: {}", layout_file.display(), e))
            })?;
        }

        Ok(Self {
            root: root.to_path_buf(),
            tag: DEFAULT_TAG.to_string(),
        })
    }

    /// Tag used for the root manifest in `index.json`.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a blob. Rejects digests that are not `sha256:<64 hex>`.
    pub fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let (alg, hex) = parse_digest(digest)?;
        Ok(self.root.join("blobs").join(alg).join(hex))
    }

    async fn read_index(&self) -> Result<LayoutIndex> {
        let path = self.root.join(INDEX_FILE);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LayoutIndex {
                schema_version: 2,
                manifests: Vec::new(),
            }),
            Err(e) => Err(OciError::Other(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn write_index(&self, index: &LayoutIndex) -> Result<()> {
        let path = self.root.join(INDEX_FILE);
        let tmp = self.root.join(format!("{}.tmp", INDEX_FILE));
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(index)?).await?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| {
            OciError::Other(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(())
    }
}

#[async_trait]
impl BlobSource for OciLayoutStore {
    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        let path = self.blob_path(&desc.digest)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file() && meta.len() == desc.size),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch(
        &self,
        desc: &Descriptor,
        out: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let path = self.blob_path(&desc.digest)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OciError::NotFound(format!(
                    "{} in {}",
                    desc.digest,
                    self.root.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let mut writer = VerifyingWriter::new(out);
        tokio::io::copy(&mut file, &mut writer).await?;
        writer.flush().await?;
        writer.verifier().verify(desc)?;
        Ok(writer.verifier().size())
    }

    fn name(&self) -> String {
        self.root.display().to_string()
    }
}

#[async_trait]
impl BlobTarget for OciLayoutStore {
    async fn push(
        &self,
        desc: &Descriptor,
        content: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<()> {
        let path = self.blob_path(&desc.digest)?;
        let tmp_path = path.with_extension(format!(
            "{}.tmp",
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let mut guard = TempFileGuard::new(tmp_path.clone());

        let mut file = tokio::fs::File::create(&tmp_path).await.map_err(|e| {
            OciError::Other(format!("Failed to create {}: {}", tmp_path.display(), e))
        })?;
        let mut reader = VerifyingReader::new(content);
        tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        reader.verifier().verify(desc)?;

        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
            OciError::Other(format!(
                "Failed to rename {} -> {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })?;
        guard.disarm();

        tracing::debug!(digest = %desc.digest, size = desc.size, "Stored blob in layout");
        Ok(())
    }
}

#[async_trait]
impl ManifestSource for OciLayoutStore {
    async fn fetch_root(&self) -> Result<Manifest> {
        let index = self.read_index().await?;
        let entry = index
            .manifests
            .iter()
            .find(|m| m.annotations.get(ANNOTATION_REF_NAME) == Some(&self.tag))
            .ok_or_else(|| {
                OciError::NotFound(format!("{}:{}", self.root.display(), self.tag))
            })?;

        let mut data: Vec<u8> = Vec::new();
        self.fetch(entry, &mut data).await?;
        Manifest::from_json(&data)
    }
}

#[async_trait]
impl ManifestTarget for OciLayoutStore {
    async fn push_root(&self, manifest: &Manifest) -> Result<()> {
        let data = manifest.to_json()?;
        let mut desc = Descriptor::new(
            manifest
                .media_type
                .clone()
                .unwrap_or_else(|| MEDIA_TYPE_IMAGE_MANIFEST.to_string()),
            sha256_digest(&data),
            data.len() as u64,
        );
        let mut content: &[u8] = &data;
        self.push(&desc, &mut content).await?;

        desc.annotations
            .insert(ANNOTATION_REF_NAME.to_string(), self.tag.clone());
        let mut index = self.read_index().await?;
        index.schema_version = 2;
        index
            .manifests
            .retain(|m| m.annotations.get(ANNOTATION_REF_NAME) != Some(&self.tag));
        index.manifests.push(desc);
        self.write_index(&index).await
    }
}
