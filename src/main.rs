//! Binary entrypoint for the myreal-ar viewer.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use myreal_ar::capture::CaptureSink;
use myreal_ar::config::{Configuration, ViewMode};
use myreal_ar::events::ViewerCommand;
use myreal_ar::tasks;
use myreal_ar::tasks::viewer::{Platform, Viewer};

#[derive(Debug, Parser)]
#[command(
    name = "myreal-ar",
    version,
    about = "Place a generated character into the camera view"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Run without a preview window even when the config asks for one
    #[arg(long)]
    headless: bool,
    /// Stop after this many rendered frames
    #[arg(long, value_name = "N")]
    frames: Option<u64>,
    /// Override the session token recorded with captures
    #[arg(long = "session-token", value_name = "TOKEN")]
    session_token: Option<String>,
    /// Read commands from this file instead of stdin
    #[arg(long, value_name = "FILE")]
    script: Option<PathBuf>,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "info",
        1 => "info,myreal_ar=debug",
        _ => "info,myreal_ar=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        headless,
        frames,
        session_token,
        script,
        verbose,
    } = Args::parse();
    init_tracing(verbose);

    let mut cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?;
    if let Some(token) = session_token {
        cfg.session_token = token;
    }
    let cfg = cfg.validated().context("invalid configuration values")?;
    tracing::info!("Loaded configuration from {}:\n{:#?}", config.display(), cfg);

    let sink = CaptureSink::new(&cfg.capture, cfg.session_token.clone())
        .context("failed to open capture gallery")?;
    let platform = Platform::from_config(&cfg);
    let preview = cfg.preview && !headless;

    // Decoding and decomposition are CPU-bound.
    let (viewer, inputs) = tokio::task::spawn_blocking({
        let cfg = cfg.clone();
        move || Viewer::start(cfg, platform, sink)
    })
    .await
    .context("viewer setup task failed")?
    .context("viewer setup failed")?;

    let (control_tx, control_rx) = mpsc::channel::<ViewerCommand>(16); // External -> Viewer
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let mut tasks = JoinSet::new();

    match script {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open command script {}", path.display()))?;
            let control_tx = control_tx.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                tasks::control::run(BufReader::new(file), control_tx, cancel)
                    .await
                    .context("command script task failed")
            });
        }
        None => tasks::control::spawn_stdin_reader(control_tx.clone())
            .context("failed to start stdin command reader")?,
    }

    if viewer.mode() == ViewMode::Immersive {
        control_tx
            .send(ViewerCommand::StartSession)
            .await
            .context("viewer command channel closed")?;
    }
    drop(control_tx);

    let summary = if preview {
        // The window owns the main thread until it closes.
        tasks::preview::run_windowed(viewer, inputs, control_rx, cancel.clone(), frames)
            .context("preview failed")
    } else {
        tasks::viewer::run(viewer, inputs, control_rx, cancel.clone(), frames)
            .await
            .context("viewer failed")
    };
    match &summary {
        Ok(summary) => tracing::info!(
            frames = summary.frames,
            captures = summary.captures.len(),
            status = ?summary.status,
            "viewer stopped"
        ),
        Err(e) => tracing::error!("{e:?}"),
    }
    cancel.cancel();

    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
    }

    summary.map(|_| ())
}
