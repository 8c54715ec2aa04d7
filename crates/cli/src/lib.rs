use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pdf_annotator_core::{EditorConfig, Frame, LayerEntry};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub mod script;

use script::{Replay, Script, SkippedStep};

/// Environment variable holding the log filter
const LOG_ENV: &str = "ANNOTATOR_LOG";

/// Upper bound on waiting for raster decodes before the final frame
const DECODE_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "annotator")]
#[command(about = "Replay annotation edit scripts and inspect the result")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replay a script and print the rendered frame as JSON.
    Replay {
        #[arg(value_name = "SCRIPT")]
        script: PathBuf,
        /// Page to render (1-based).
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 1.0)]
        zoom: f32,
        /// Editor configuration TOML; ANNOTATOR_* variables apply otherwise.
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Replay a script and print a page's layers, highest first.
    Layers {
        #[arg(value_name = "SCRIPT")]
        script: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct ReplayOutput<'a> {
    frame: &'a Frame,
    annotation_count: usize,
    history: HistoryOutput,
    discarded: usize,
    skipped: &'a [SkippedStep],
}

#[derive(Debug, Serialize)]
struct HistoryOutput {
    index: Option<usize>,
    length: usize,
    can_undo: bool,
    can_redo: bool,
}

#[derive(Debug, Serialize)]
struct LayersOutput<'a> {
    page: u32,
    layers: &'a [LayerEntry],
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging();

    match cli.command {
        Commands::Replay { script, page, zoom, config } => run_replay(&script, page, zoom, config.as_deref()),
        Commands::Layers { script, page, config } => run_layers(&script, page, config.as_deref()),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Log to stderr so stdout stays machine-readable
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init();
}

fn run_replay(script_path: &Path, page: u32, zoom: f32, config: Option<&Path>) -> Result<()> {
    if !(zoom.is_finite() && zoom > 0.0) {
        anyhow::bail!("--zoom must be a positive number");
    }

    let mut replay = replay_script(script_path, config)?;

    // The first pass starts raster decodes; render again once they settle
    let mut frame = replay
        .session
        .render(page, zoom)
        .with_context(|| format!("failed to render page {page}"))?;
    if !frame.deferred.is_empty() {
        replay.session.wait_for_decodes(DECODE_WAIT);
        frame = replay.session.render(page, zoom)?;
    }

    let history = replay.session.store().history();
    let payload = ReplayOutput {
        frame: &*frame,
        annotation_count: replay.session.store().len(),
        history: HistoryOutput {
            index: history.index(),
            length: history.len(),
            can_undo: history.can_undo(),
            can_redo: history.can_redo(),
        },
        discarded: replay.discarded,
        skipped: &replay.skipped,
    };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");
    Ok(())
}

fn run_layers(script_path: &Path, page: u32, config: Option<&Path>) -> Result<()> {
    let replay = replay_script(script_path, config)?;
    if page == 0 || page > replay.session.page_count() {
        anyhow::bail!("page {page} is out of range (document has {} pages)", replay.session.page_count());
    }

    let layers = replay.session.layer_listing(page);
    let json = serde_json::to_string_pretty(&LayersOutput { page, layers: &layers })?;
    println!("{json}");
    Ok(())
}

fn replay_script(script_path: &Path, config: Option<&Path>) -> Result<Replay> {
    let config = load_config(config)?;
    let script = Script::from_file(script_path)?;

    let mut replay = Replay::new(&script, config);
    replay.run(&script.steps);

    info!(
        steps = script.steps.len(),
        skipped = replay.skipped.len(),
        annotations = replay.session.store().len(),
        "script replayed"
    );
    Ok(replay)
}

fn load_config(path: Option<&Path>) -> Result<EditorConfig> {
    match path {
        Some(path) => EditorConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => EditorConfig::from_env().context("invalid ANNOTATOR_* environment configuration"),
    }
}
