//! Concurrent layer copy between content targets.
//!
//! Every candidate layer first checks the destination. Layers that are
//! already present only advance the progress sink. Missing layers are
//! streamed from the source into an in-memory pipe that the destination
//! reads from, so fetch and push run side by side and the bytes seen by the
//! progress sink are the bytes on the wire.
//!
//! Admission is bounded by a semaphore and follows manifest order; the
//! completion order is not defined. A single cancellation scope covers the
//! whole call: the first failure cancels it and every other layer stops.

use std::sync::Arc;
use std::time::Instant;

use a3s_transfer_core::error::{OciError, Result};
use a3s_transfer_core::progress::{or_discard, ProgressSink, ProgressWriter};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::descriptor::Descriptor;
use super::target::{BlobSource, BlobTarget, ManifestSource};

/// Buffer size of the pipe between a layer's fetch and its push.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Layer filter passed to [`copy`]. `None` selects every layer.
pub type LayerFilter<'a> = &'a (dyn Fn(&Descriptor) -> bool + Send + Sync);

/// Copy the layers of `source`'s root manifest (plus its config) into
/// `destination`.
///
/// `include` selects layers; the config blob is always copied. At most
/// `concurrency` layers (minimum one) are in flight. `progress` receives the
/// transferred bytes and a `[n/total] layers copied` line after every layer.
pub async fn copy<S, D>(
    cancel: &CancellationToken,
    source: Arc<S>,
    destination: Arc<D>,
    include: Option<LayerFilter<'_>>,
    concurrency: usize,
    progress: Option<Arc<dyn ProgressSink>>,
) -> Result<()>
where
    S: ManifestSource + BlobSource + ?Sized + 'static,
    D: BlobTarget + ?Sized + 'static,
{
    let root = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(OciError::Canceled),
        root = source.fetch_root() => root?,
    };

    let mut layers: Vec<Descriptor> = match include {
        Some(include) => root.layers.iter().filter(|&l| include(l)).cloned().collect(),
        None => root.layers.clone(),
    };
    layers.push(root.config.clone());

    copy_layers(cancel, source, destination, layers, concurrency, progress).await
}

/// Copy an explicit list of blobs from `source` to `destination`.
///
/// Same admission, skip and cancellation rules as [`copy`].
pub async fn copy_layers<S, D>(
    cancel: &CancellationToken,
    source: Arc<S>,
    destination: Arc<D>,
    layers: Vec<Descriptor>,
    concurrency: usize,
    progress: Option<Arc<dyn ProgressSink>>,
) -> Result<()>
where
    S: BlobSource + ?Sized + 'static,
    D: BlobTarget + ?Sized + 'static,
{
    let start = Instant::now();
    let progress = or_discard(progress);
    let concurrency = concurrency.max(1);
    let total = layers.len();

    let scope = cancel.child_token();
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let completed = Arc::new(Mutex::new(0usize));
    let mut tasks = JoinSet::new();

    for layer in layers {
        if let Ok(json) = serde_json::to_string(&layer) {
            tracing::debug!(layer = %json, "Copying layer");
        }

        let permit = tokio::select! {
            biased;
            _ = scope.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let source = Arc::clone(&source);
        let destination = Arc::clone(&destination);
        let progress = Arc::clone(&progress);
        let completed = Arc::clone(&completed);
        let scope = scope.clone();

        tasks.spawn(async move {
            let _permit = permit;
            let result = tokio::select! {
                biased;
                _ = scope.cancelled() => Err(OciError::Canceled),
                result = copy_layer(&*source, &*destination, &layer, &progress) => result,
            };

            if let Err(ref e) = result {
                if !e.is_cancellation() {
                    tracing::debug!(layer = %layer.label(), error = %e, "Layer failed");
                }
                scope.cancel();
            }

            let mut done = completed.lock();
            *done += 1;
            progress.update(&format!("[{}/{}] layers copied", *done, total));
            result
        });
    }

    let mut first_error: Option<OciError> = None;
    while let Some(joined) = tasks.join_next().await {
        let result = joined
            .unwrap_or_else(|e| Err(OciError::Other(format!("Layer copy task failed: {}", e))));
        if let Err(e) = result {
            scope.cancel();
            let replace = match first_error {
                None => true,
                Some(ref current) => current.is_cancellation() && !e.is_cancellation(),
            };
            if replace {
                first_error = Some(e);
            }
        }
    }

    if let Some(e) = first_error {
        return Err(e);
    }
    if cancel.is_cancelled() {
        return Err(OciError::Canceled);
    }

    tracing::debug!(
        duration = ?start.elapsed(),
        concurrency,
        layers = total,
        "Copy complete"
    );
    Ok(())
}

/// Copy one blob unless the destination already has it.
async fn copy_layer<S, D>(
    source: &S,
    destination: &D,
    layer: &Descriptor,
    progress: &Arc<dyn ProgressSink>,
) -> Result<()>
where
    S: BlobSource + ?Sized,
    D: BlobTarget + ?Sized,
{
    let wrap = |e: OciError| OciError::transfer(&layer.digest, destination.name(), e);

    if destination.exists(layer).await.map_err(wrap)? {
        progress.advance(layer.size);
        tracing::debug!(layer = %layer.label(), operation = "skipped", "Layer already exists");
        return Ok(());
    }

    let (pipe_writer, mut pipe_reader) = tokio::io::duplex(PIPE_CAPACITY);
    let fetch = async {
        let mut writer = ProgressWriter::new(pipe_writer, Arc::clone(progress));
        source.fetch(layer, &mut writer).await?;
        writer.shutdown().await?;
        Ok::<(), OciError>(())
    };
    let push = destination.push(layer, &mut pipe_reader);

    futures::future::try_join(fetch, push).await.map_err(wrap)?;

    tracing::debug!(layer = %layer.label(), operation = "copied", "Layer copied");
    Ok(())
}
