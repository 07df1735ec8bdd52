//! `a3s-transfer inspect` command: print the root manifest as JSON.

use clap::Args;

use super::Context;

#[derive(Args)]
pub struct InspectArgs {
    /// Artifact reference
    pub source: String,
}

pub async fn execute(ctx: &Context, args: InspectArgs) -> Result<(), Box<dyn std::error::Error>> {
    let remote = ctx.remote(&args.source)?;
    let root = tokio::select! {
        _ = ctx.cancel.cancelled() => return Err(a3s_transfer_core::OciError::Canceled.into()),
        root = remote.fetch_root() => root?,
    };

    let output = serde_json::json!({
        "Reference": remote.reference().to_string(),
        "Platform": remote.platform(),
        "Size": root.total_size(),
        "LayerCount": root.layers.len(),
        "Manifest": root,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
