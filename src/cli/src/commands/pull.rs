//! `a3s-transfer pull` command.

use std::path::PathBuf;
use std::sync::Arc;

use a3s_transfer_core::retry_with_backoff;
use clap::Args;

use super::{report_outcome, Context};

#[derive(Args)]
pub struct PullArgs {
    /// Artifact reference (e.g., "oci://ghcr.io/org/pkg:1.0")
    pub source: String,

    /// Directory the files are written into
    pub directory: PathBuf,

    /// File paths (layer titles) or encoded digests to pull
    #[arg(required = true)]
    pub paths: Vec<String>,
}

pub async fn execute(ctx: &Context, args: PullArgs) -> Result<(), Box<dyn std::error::Error>> {
    let remote = ctx.remote(&args.source)?;
    let progress = ctx.progress();
    if let Some(ref sink) = progress {
        sink.update(&format!(
            "Pulling {} file(s) from {}",
            args.paths.len(),
            args.source
        ));
        remote.set_progress(Arc::clone(sink));
    }

    let result = retry_with_backoff(&ctx.cancel, ctx.config.retries(), ctx.config.retry_delay(), || {
        remote.pull_paths(&ctx.cancel, &args.directory, &args.paths)
    })
    .await;
    report_outcome(
        progress.as_ref(),
        &result,
        &format!("Pulled files from {}", args.source),
    );
    let pulled = result?;

    if ctx.quiet {
        return Ok(());
    }
    for desc in &pulled {
        let title = desc.title().unwrap_or(desc.digest.as_str());
        println!("{}", args.directory.join(title).display());
    }
    for path in &args.paths {
        let matched = pulled
            .iter()
            .any(|d| d.title() == Some(path.as_str()) || d.encoded() == path);
        if !matched {
            println!("Not found: {}", path);
        }
    }
    Ok(())
}
