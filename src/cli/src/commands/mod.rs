//! CLI command definitions and dispatch.

mod copy;
mod inspect;
mod pull;

use std::path::PathBuf;
use std::sync::Arc;

use a3s_transfer::{Platform, Remote, RemoteOptions};
use a3s_transfer_core::{LogProgress, ProgressSink, TransferConfig};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

/// A3S Transfer - move OCI artifacts between registries and local disk.
#[derive(Parser)]
#[command(name = "a3s-transfer", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Talk to registries over plain HTTP
    #[arg(long, global = true)]
    pub plain_http: bool,

    /// Skip TLS certificate verification
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Target architecture for multi-platform artifacts (e.g., "amd64")
    #[arg(long, global = true)]
    pub arch: Option<String>,

    /// Configuration file (default: ~/.a3s/transfer.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Local OCI layout used as a read-through blob cache
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Whole-operation attempts before giving up
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    /// Suppress progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Copy an artifact's layers from one repository to another
    Copy(copy::CopyArgs),
    /// Pull selected files from an artifact into a directory
    Pull(pull::PullArgs),
    /// Print an artifact's root manifest as JSON
    Inspect(inspect::InspectArgs),
}

/// Settings shared by every command, resolved from the config file and
/// global flags.
pub(crate) struct Context {
    pub config: TransferConfig,
    pub quiet: bool,
    pub cancel: CancellationToken,
}

impl Context {
    /// Open a handle to `url` with the resolved options.
    pub fn remote(&self, url: &str) -> Result<Remote, Box<dyn std::error::Error>> {
        let options = RemoteOptions::from_config(&self.config)?;
        let remote = Remote::new(url, Platform::for_arch(self.config.arch()), options)?;
        Ok(remote)
    }

    /// Progress sink for engine calls, `None` when quiet.
    pub fn progress(&self) -> Option<Arc<dyn ProgressSink>> {
        if self.quiet {
            None
        } else {
            Some(Arc::new(LogProgress::new()))
        }
    }
}

/// Report how a command ended on `sink`: `success(done)` or `failure(error)`.
pub(crate) fn report_outcome<T>(
    sink: Option<&Arc<dyn ProgressSink>>,
    result: &a3s_transfer_core::Result<T>,
    done: &str,
) {
    let Some(sink) = sink else {
        return;
    };
    match result {
        Ok(_) => sink.success(done),
        Err(e) => sink.failure(&e.to_string()),
    }
}

/// Flag values as a config layer. Unset flags leave the file's values alone.
fn flag_overrides(cli: &Cli) -> TransferConfig {
    TransferConfig {
        plain_http: cli.plain_http.then_some(true),
        insecure_skip_verify: cli.insecure.then_some(true),
        arch: cli.arch.clone(),
        cache_dir: cli.cache_dir.clone(),
        retries: cli.retries,
        ..Default::default()
    }
}

fn load_config(cli: &Cli) -> Result<TransferConfig, Box<dyn std::error::Error>> {
    let base = match cli.config {
        Some(ref path) => TransferConfig::load(path)?,
        None => TransferConfig::load_default()?,
    };
    Ok(base.merge(flag_overrides(cli)))
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli)?;
    tracing::debug!(config = ?config, "Loaded configuration");

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, canceling");
            interrupt.cancel();
        }
    });

    let ctx = Context {
        config,
        quiet: cli.quiet,
        cancel,
    };

    match cli.command {
        Command::Copy(args) => copy::execute(&ctx, args).await,
        Command::Pull(args) => pull::execute(&ctx, args).await,
        Command::Inspect(args) => inspect::execute(&ctx, args).await,
    }
}
