//! `a3s-transfer copy` command.

use std::sync::Arc;

use a3s_transfer::oci::LayerFilter;
use a3s_transfer::{copy, Descriptor};
use a3s_transfer_core::retry_with_backoff;
use clap::Args;

use super::{report_outcome, Context};

#[derive(Args)]
pub struct CopyArgs {
    /// Source reference (e.g., "oci://ghcr.io/org/pkg:1.0")
    pub source: String,

    /// Destination reference
    pub destination: String,

    /// Maximum layers in flight
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Copy only the layer with this title (repeatable; config is always copied)
    #[arg(long = "layer", value_name = "PATH")]
    pub layers: Vec<String>,

    /// Also push the source's root manifest under the destination tag
    #[arg(long)]
    pub tag_root: bool,
}

pub async fn execute(ctx: &Context, args: CopyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let source = Arc::new(ctx.remote(&args.source)?);
    let destination = Arc::new(ctx.remote(&args.destination)?);
    let concurrency = args.concurrency.unwrap_or_else(|| ctx.config.concurrency());

    let wanted = args.layers;
    let by_title: LayerFilter<'_> =
        &|d: &Descriptor| d.title().map_or(false, |t| wanted.iter().any(|w| w == t));
    let include = if wanted.is_empty() { None } else { Some(by_title) };

    let progress = ctx.progress();
    if let Some(ref sink) = progress {
        sink.update(&format!("Copying {} -> {}", args.source, args.destination));
    }

    let result: a3s_transfer_core::Result<()> = async {
        retry_with_backoff(&ctx.cancel, ctx.config.retries(), ctx.config.retry_delay(), || {
            copy(
                &ctx.cancel,
                Arc::clone(&source),
                Arc::clone(&destination),
                include,
                concurrency,
                progress.clone(),
            )
        })
        .await?;

        if args.tag_root {
            let root = source.fetch_root().await?;
            destination.push_root(&root).await?;
            tracing::info!(reference = %destination.reference(), "Tagged root manifest");
        }
        Ok(())
    }
    .await;

    report_outcome(
        progress.as_ref(),
        &result,
        &format!("Copied {} -> {}", args.source, args.destination),
    );
    Ok(result?)
}
