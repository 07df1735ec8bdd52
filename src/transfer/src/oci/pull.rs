//! Selective file pulls.
//!
//! Pulls the layers whose title annotation names a requested path and writes
//! each one to `destination_dir/<title>`. Files already on disk with the
//! right size and SHA-256 are left alone, so an interrupted pull can simply
//! be run again.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use a3s_transfer_core::error::{OciError, Result};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::descriptor::Descriptor;
use super::digest::{sha256_file, SHA256};
use super::layout::TempFileGuard;
use super::target::{BlobSource, ManifestSource};

/// Permission bits for directories created under the destination.
#[cfg(unix)]
const DIR_MODE: u32 = 0o755;

/// Resolve a title annotation to a path relative to the destination.
///
/// Titles are POSIX paths. Absolute titles and titles with `..` segments
/// are rejected.
fn title_to_relative(title: &str) -> Result<PathBuf> {
    let invalid = || OciError::InvalidPath(title.to_string());
    if title.starts_with('/') || Path::new(title).is_absolute() {
        return Err(invalid());
    }

    let mut relative = PathBuf::new();
    for segment in title.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(invalid()),
            s => {
                let mut components = Path::new(s).components();
                match (components.next(), components.next()) {
                    (Some(Component::Normal(c)), None) => relative.push(c),
                    _ => return Err(invalid()),
                }
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(invalid());
    }
    Ok(relative)
}

/// Whether `destination_dir/<title>` is a regular file matching `desc`'s
/// size and SHA-256 digest.
///
/// Any failure along the way (no title, unreadable file, other digest
/// algorithm) counts as "not present".
pub async fn file_descriptor_exists(desc: &Descriptor, destination_dir: &Path) -> bool {
    let Some(title) = desc.title() else {
        return false;
    };
    let Ok(relative) = title_to_relative(title) else {
        return false;
    };
    if desc.algorithm() != SHA256 {
        return false;
    }

    let path = destination_dir.join(relative);
    match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() && meta.len() == desc.size => {}
        _ => return false,
    }

    match sha256_file(&path).await {
        Ok((size, hex)) => size == desc.size && hex == desc.encoded(),
        Err(_) => false,
    }
}

async fn create_parent_dirs(dir: &Path) -> Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_MODE);
    builder.create(dir).await.map_err(|e| {
        OciError::Other(format!(
            "Failed to create directory {}: {}",
            dir.display(),
            e
        ))
    })
}

/// Fetch one file layer into `destination_dir/<title>`.
///
/// The content is written to a hidden sibling file, re-hashed, and only then
/// renamed into place. On any failure the partial file is removed.
pub async fn pull_path<S>(
    cancel: &CancellationToken,
    source: &S,
    destination_dir: &Path,
    desc: &Descriptor,
) -> Result<()>
where
    S: BlobSource + ?Sized,
{
    let title = desc
        .title()
        .ok_or_else(|| OciError::NotAFile(desc.digest.clone()))?;
    let path = destination_dir.join(title_to_relative(title)?);

    if let Some(parent) = path.parent() {
        create_parent_dirs(parent).await?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| OciError::InvalidPath(title.to_string()))?;
    let tmp_path = path.with_file_name(format!(".{}.partial", file_name));
    let mut guard = TempFileGuard::new(tmp_path.clone());

    let mut file = tokio::fs::File::create(&tmp_path).await.map_err(|e| {
        OciError::Other(format!("Failed to create {}: {}", tmp_path.display(), e))
    })?;

    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(OciError::Canceled),
        fetched = source.fetch(desc, &mut file) => { fetched?; }
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    let (size, hex) = sha256_file(&tmp_path).await?;
    let actual = format!("{}:{}", SHA256, hex);
    if size != desc.size || actual != desc.digest {
        return Err(OciError::Integrity {
            subject: title.to_string(),
            expected: format!("{} ({} bytes)", desc.digest, desc.size),
            actual: format!("{} ({} bytes)", actual, size),
        });
    }

    tokio::fs::rename(&tmp_path, &path).await.map_err(|e| {
        OciError::Other(format!(
            "Failed to rename {} -> {}: {}",
            tmp_path.display(),
            path.display(),
            e
        ))
    })?;
    guard.disarm();

    tracing::debug!(layer = %desc.label(), operation = "pulled", "Layer written");
    Ok(())
}

/// Pull the layers titled by `paths` into `destination_dir`.
///
/// Duplicate paths are pulled once. Paths that match no layer are skipped.
/// Returns the matched descriptors in request order, including those that
/// were already present on disk.
pub async fn pull_paths<S>(
    cancel: &CancellationToken,
    source: &S,
    destination_dir: &Path,
    paths: &[String],
) -> Result<Vec<Descriptor>>
where
    S: ManifestSource + BlobSource + ?Sized,
{
    let mut seen = HashSet::new();
    let paths: Vec<&str> = paths
        .iter()
        .map(String::as_str)
        .filter(|p| seen.insert(*p))
        .collect();

    let root = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(OciError::Canceled),
        root = source.fetch_root() => root?,
    };

    let mut layers = Vec::with_capacity(paths.len());
    for path in paths {
        let desc = root.locate(path);
        if desc.is_empty() {
            tracing::debug!(path, "Path not found in artifact, skipping");
            continue;
        }
        layers.push(desc);
    }

    for desc in &layers {
        if cancel.is_cancelled() {
            return Err(OciError::Canceled);
        }

        if file_descriptor_exists(desc, destination_dir).await {
            tracing::debug!(layer = %desc.label(), operation = "skipped", "File already present");
            continue;
        }

        tracing::debug!(layer = %desc.label(), size = desc.size, "Pulling file");
        pull_path(cancel, source, destination_dir, desc).await?;
    }

    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::digest::sha256_digest;
    use crate::oci::memory::MemoryStore;
    use tempfile::TempDir;

    #[test]
    fn test_title_to_relative() {
        assert_eq!(
            title_to_relative("a/b/c.txt").unwrap(),
            Path::new("a").join("b").join("c.txt")
        );
        assert_eq!(title_to_relative("./a.txt").unwrap(), PathBuf::from("a.txt"));
        assert!(title_to_relative("/etc/passwd").is_err());
        assert!(title_to_relative("../escape").is_err());
        assert!(title_to_relative("a/../../escape").is_err());
        assert!(title_to_relative("").is_err());
        assert!(title_to_relative("./").is_err());
    }

    #[tokio::test]
    async fn test_file_descriptor_exists() {
        let dir = TempDir::new().unwrap();
        let desc = Descriptor::new("", sha256_digest(b"hello"), 5).with_title("sub/f.txt");
        assert!(!file_descriptor_exists(&desc, dir.path()).await);

        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/f.txt"), b"jello").unwrap();
        assert!(!file_descriptor_exists(&desc, dir.path()).await);

        std::fs::write(dir.path().join("sub/f.txt"), b"hello").unwrap();
        assert!(file_descriptor_exists(&desc, dir.path()).await);
    }

    #[tokio::test]
    async fn test_file_descriptor_exists_without_title() {
        let dir = TempDir::new().unwrap();
        let desc = Descriptor::new("", sha256_digest(b"hello"), 5);
        assert!(!file_descriptor_exists(&desc, dir.path()).await);
    }

    #[tokio::test]
    async fn test_pull_path_writes_file() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new("src");
        let desc = store.add_file("nested/dir/data.bin", b"payload");

        pull_path(&CancellationToken::new(), &store, dir.path(), &desc)
            .await
            .unwrap();

        let path = dir.path().join("nested/dir/data.bin");
        assert_eq!(std::fs::read(&path).unwrap(), b"payload");
        assert!(!dir.path().join("nested/dir/.data.bin.partial").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pull_path_dir_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new("src");
        let desc = store.add_file("made/file", b"x");
        pull_path(&CancellationToken::new(), &store, dir.path(), &desc)
            .await
            .unwrap();

        let mode = std::fs::metadata(dir.path().join("made"))
            .unwrap()
            .permissions()
            .mode();
        // umask can only clear bits
        assert_eq!(mode & 0o700, 0o700);
        assert_eq!(mode & 0o777 & !0o755, 0);
    }

    #[tokio::test]
    async fn test_pull_path_not_a_file() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new("src");
        let desc = store.add_blob("application/json", b"{}");

        let err = pull_path(&CancellationToken::new(), &store, dir.path(), &desc)
            .await
            .unwrap_err();
        assert!(matches!(err, OciError::NotAFile(_)));
        assert_eq!(store.fetches(), 0);
    }

    #[tokio::test]
    async fn test_pull_path_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new("src");
        let desc = store.add_file("../outside.txt", b"x");

        let err = pull_path(&CancellationToken::new(), &store, dir.path(), &desc)
            .await
            .unwrap_err();
        assert!(matches!(err, OciError::InvalidPath(_)));
        assert_eq!(store.fetches(), 0);
    }

    #[tokio::test]
    async fn test_pull_path_canceled() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new("src");
        let desc = store.add_file("f", b"x");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pull_path(&cancel, &store, dir.path(), &desc)
            .await
            .unwrap_err();
        assert!(matches!(err, OciError::Canceled));
        assert!(!dir.path().join("f").exists());
        assert!(!dir.path().join(".f.partial").exists());
    }
}
