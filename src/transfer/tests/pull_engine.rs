//! Selective pull scenarios against in-memory stores.

mod common;

use std::sync::Arc;

use a3s_transfer::{pull_paths, Descriptor, MemoryStore};
use a3s_transfer_core::OciError;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::{content, source_store, CorruptSource};

fn paths(items: &[&str]) -> Vec<String> {
    items.iter().map(|p| p.to_string()).collect()
}

fn artifact() -> (Arc<MemoryStore>, a3s_transfer::Manifest) {
    source_store(
        &[
            ("package.yaml", content(1, 120)),
            ("images/app.tar", content(2, 70 * 1024)),
            ("components/web/values.yaml", content(3, 33)),
            ("checksums.txt", content(4, 64)),
        ],
        b"{}",
    )
}

#[tokio::test]
async fn test_pull_nested_paths() {
    let dir = TempDir::new().unwrap();
    let (src, _) = artifact();

    let pulled = pull_paths(
        &CancellationToken::new(),
        src.as_ref(),
        dir.path(),
        &paths(&["images/app.tar", "components/web/values.yaml"]),
    )
    .await
    .unwrap();

    assert_eq!(pulled.len(), 2);
    assert_eq!(
        std::fs::read(dir.path().join("images/app.tar")).unwrap(),
        content(2, 70 * 1024)
    );
    assert_eq!(
        std::fs::read(dir.path().join("components/web/values.yaml")).unwrap(),
        content(3, 33)
    );
    assert!(!dir.path().join("package.yaml").exists());
}

#[tokio::test]
async fn test_duplicate_paths_pulled_once() {
    let dir = TempDir::new().unwrap();
    let (src, _) = artifact();

    let pulled = pull_paths(
        &CancellationToken::new(),
        src.as_ref(),
        dir.path(),
        &paths(&["package.yaml", "package.yaml", "checksums.txt"]),
    )
    .await
    .unwrap();

    let titles: Vec<_> = pulled.iter().filter_map(Descriptor::title).collect();
    assert_eq!(titles, vec!["package.yaml", "checksums.txt"]);
    assert_eq!(src.fetches(), 2);
}

#[tokio::test]
async fn test_unknown_path_is_skipped() {
    let dir = TempDir::new().unwrap();
    let (src, _) = artifact();

    let pulled = pull_paths(
        &CancellationToken::new(),
        src.as_ref(),
        dir.path(),
        &paths(&["missing.txt", "package.yaml"]),
    )
    .await
    .unwrap();

    assert_eq!(pulled.len(), 1);
    assert_eq!(pulled[0].title(), Some("package.yaml"));
    assert!(!dir.path().join("missing.txt").exists());
}

#[tokio::test]
async fn test_matching_file_is_not_fetched() {
    let dir = TempDir::new().unwrap();
    let (src, _) = artifact();
    std::fs::write(dir.path().join("package.yaml"), content(1, 120)).unwrap();

    let pulled = pull_paths(
        &CancellationToken::new(),
        src.as_ref(),
        dir.path(),
        &paths(&["package.yaml"]),
    )
    .await
    .unwrap();

    assert_eq!(pulled.len(), 1);
    assert_eq!(src.fetches(), 0);
}

#[tokio::test]
async fn test_same_size_wrong_content_is_refetched() {
    let dir = TempDir::new().unwrap();
    let (src, _) = artifact();
    std::fs::write(dir.path().join("package.yaml"), content(9, 120)).unwrap();

    pull_paths(
        &CancellationToken::new(),
        src.as_ref(),
        dir.path(),
        &paths(&["package.yaml"]),
    )
    .await
    .unwrap();

    assert_eq!(src.fetches(), 1);
    assert_eq!(
        std::fs::read(dir.path().join("package.yaml")).unwrap(),
        content(1, 120)
    );
}

#[tokio::test]
async fn test_second_pull_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    let (src, _) = artifact();
    let wanted = paths(&["package.yaml", "images/app.tar"]);

    pull_paths(&CancellationToken::new(), src.as_ref(), dir.path(), &wanted)
        .await
        .unwrap();
    assert_eq!(src.fetches(), 2);

    pull_paths(&CancellationToken::new(), src.as_ref(), dir.path(), &wanted)
        .await
        .unwrap();
    assert_eq!(src.fetches(), 2);
}

#[tokio::test]
async fn test_traversal_title_is_rejected() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("dest");
    std::fs::create_dir(&dest).unwrap();
    let (src, _) = source_store(&[("../escape.txt", content(1, 10))], b"{}");

    let err = pull_paths(
        &CancellationToken::new(),
        src.as_ref(),
        &dest,
        &paths(&["../escape.txt"]),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, OciError::InvalidPath(_)), "unexpected error: {err}");
    assert_eq!(src.fetches(), 0);
    assert!(!dir.path().join("escape.txt").exists());
}

#[tokio::test]
async fn test_corrupt_content_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let (store, _) = artifact();
    let src = CorruptSource { inner: store };

    let err = pull_paths(
        &CancellationToken::new(),
        &src,
        dir.path(),
        &paths(&["checksums.txt"]),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, OciError::Integrity { .. }), "unexpected error: {err}");
    assert!(!dir.path().join("checksums.txt").exists());
    assert!(!dir.path().join(".checksums.txt.partial").exists());
}

#[tokio::test]
async fn test_pull_canceled_before_start() {
    let dir = TempDir::new().unwrap();
    let (src, _) = artifact();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = pull_paths(&cancel, src.as_ref(), dir.path(), &paths(&["package.yaml"]))
        .await
        .unwrap_err();

    assert!(matches!(err, OciError::Canceled));
    assert_eq!(src.fetches(), 0);
}

#[tokio::test]
async fn test_pull_by_encoded_digest() {
    let dir = TempDir::new().unwrap();
    let (src, manifest) = artifact();
    let checksums = manifest.locate("checksums.txt");

    let pulled = pull_paths(
        &CancellationToken::new(),
        src.as_ref(),
        dir.path(),
        &[checksums.encoded().to_string()],
    )
    .await
    .unwrap();

    assert_eq!(pulled, vec![checksums]);
    assert!(dir.path().join("checksums.txt").is_file());
}

#[tokio::test]
async fn test_failed_pull_keeps_earlier_files() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("dest");
    std::fs::create_dir(&dest).unwrap();
    let (src, _) = source_store(
        &[("good.txt", content(1, 40)), ("../bad.txt", content(2, 40))],
        b"{}",
    );

    let err = pull_paths(
        &CancellationToken::new(),
        src.as_ref(),
        &dest,
        &paths(&["good.txt", "../bad.txt"]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, OciError::InvalidPath(_)), "unexpected error: {err}");
    assert_eq!(std::fs::read(dest.join("good.txt")).unwrap(), content(1, 40));
    assert_eq!(src.fetches(), 1);

    // A rerun finds the finished file and does not fetch it again
    let pulled = pull_paths(
        &CancellationToken::new(),
        src.as_ref(),
        &dest,
        &paths(&["good.txt"]),
    )
    .await
    .unwrap();
    assert_eq!(pulled.len(), 1);
    assert_eq!(src.fetches(), 1);
}
