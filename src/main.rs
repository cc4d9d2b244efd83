use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dynoscope_api::{EnvToken, HttpPlatformApi, PlatformApi};
use dynoscope_logs::{LogStreamMultiplexer, PresentationSurface};
use dynoscope_sync::{AppSetDiff, Change, ResourceCache, SnapshotStore, SyncEngine};

mod config;

use config::Config;

/// Dynoscope - streams platform app logs and keeps a live resource tree in sync
#[derive(Parser, Debug)]
#[command(name = "dynoscope")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Applications to track (overrides the config file list)
    #[arg(value_name = "APP")]
    apps: Vec<String>,

    /// Path to the TOML config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Platform API base URL
    #[arg(long)]
    api_url: Option<String>,

    /// Environment variable holding the API token
    #[arg(long)]
    token_env: Option<String>,

    /// Snapshot file for the tracked-application set
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// History lines replayed when a stream becomes visible
    #[arg(long)]
    resume_lines: Option<usize>,

    /// Ring buffer capacity per stream, in lines
    #[arg(long)]
    buffer_lines: Option<usize>,
}

/// Presentation surface rendering the visible stream to stdout
struct StdoutSurface;

impl PresentationSurface for StdoutSurface {
    fn append(&self, app: &str, line: &str) {
        println!("{app} | {line}");
    }

    fn clear(&self) {
        println!("{:-<72}", "");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debugging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let result = run_app(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

fn resolve_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(url) = &args.api_url {
        config.api.base_url = url.clone();
    }
    if let Some(env) = &args.token_env {
        config.api.token_env = env.clone();
    }
    if let Some(path) = &args.snapshot {
        config.tracking.snapshot_path = path.clone();
    }
    if let Some(lines) = args.resume_lines {
        config.streams.resume_lines = lines;
    }
    if let Some(lines) = args.buffer_lines {
        config.streams.buffer_lines = lines;
    }
    if !args.apps.is_empty() {
        config.tracking.apps = args.apps.clone();
    }
    if config.tracking.apps.is_empty() {
        bail!("no applications to track; pass app names or set [tracking] apps in the config");
    }
    Ok(config)
}

async fn run_app(args: Args) -> Result<()> {
    let config = resolve_config(&args)?;

    let tokens = Arc::new(EnvToken::new(config.api.token_env.clone()));
    let api: Arc<dyn PlatformApi> = Arc::new(
        HttpPlatformApi::new(config.api.base_url.clone(), tokens)
            .context("failed to build platform client")?,
    );

    let (mux, stream_events) = LogStreamMultiplexer::new(
        Arc::clone(&api),
        Arc::new(StdoutSurface),
        config.streams.resume_lines,
        config.streams.buffer_lines,
    );

    let cache = Arc::new(ResourceCache::new(Arc::clone(&api)));
    let cancel = CancellationToken::new();
    let snapshot = SnapshotStore::new(&config.tracking.snapshot_path);
    let (engine, mut changes) = SyncEngine::new(api, Arc::clone(&cache), snapshot, cancel.clone());

    // Render the previous tracked set immediately; the diff below
    // re-validates it against the platform
    engine.restore_snapshot();

    let (diff_tx, diff_rx) = mpsc::unbounded_channel();
    let engine_task = tokio::spawn(Arc::clone(&engine).run(stream_events, diff_rx));

    diff_tx
        .send(AppSetDiff::adding(config.tracking.apps.iter().cloned()))
        .ok();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,

            change = changes.recv() => match change {
                Some(Change::Everything) => {
                    // The tracked set settled: line up stream sessions with
                    // the apps that actually resolved
                    let apps = cache.apps();
                    mux.set_tracked_applications(&apps).await;
                    if mux.arbiter().visible_app().is_none() {
                        if let Some(first) = apps.first() {
                            mux.set_visible(&first.name);
                        }
                    }
                }
                Some(change) => {
                    tracing::debug!(?change, "resource changed");
                }
                None => break,
            }
        }
    }

    // Cleanup
    mux.shutdown();
    cancel.cancel();
    engine_task.await.ok();

    Ok(())
}
