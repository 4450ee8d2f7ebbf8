//! clicktext - read the text line under a point of interest
//!
//! Captures a fixed-size window around a point in a screenshot and prints the
//! most confident transcription. With `--stdin`, each `X,Y` line is a trigger;
//! triggers arriving while a run is in flight are dropped.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use clicktext::capture::ScreenCapture;
use clicktext::config::{self, AppConfig};
use clicktext::runner::{spawn_listener, PipelineRunner, RunOutcome};
use clicktext::storage;
use clicktext::vision::{PipelineResult, TesseractRecognizer, VisionPipeline};

/// clicktext - find and recognize the text around a point
#[derive(Parser, Debug)]
#[command(name = "clicktext")]
#[command(about = "Locate and recognize the text line around a point in a screenshot")]
struct Args {
    /// Screenshot to capture from
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Point of interest as X,Y (default: screenshot center)
    #[arg(short, long, value_parser = parse_point)]
    point: Option<(i32, i32)>,

    /// Read X,Y trigger lines from stdin
    #[arg(long)]
    stdin: bool,

    /// Configuration file (default: config.toml in the config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root directory for diagnostic artifacts
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Do not write diagnostic artifacts
    #[arg(long)]
    no_diagnostics: bool,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Write the default configuration to this path and exit
    #[arg(long, value_name = "PATH")]
    write_default_config: Option<PathBuf>,
}

fn parse_point(s: &str) -> Result<(i32, i32), String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{s}'"))?;
    let x = x.trim().parse().map_err(|e| format!("invalid X '{x}': {e}"))?;
    let y = y.trim().parse().map_err(|e| format!("invalid Y '{y}': {e}"))?;
    Ok((x, y))
}

fn main() -> Result<()> {
    // Initialize logging; stdout is reserved for results
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    if let Some(path) = &args.write_default_config {
        config::save_config(&AppConfig::default(), path)?;
        info!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let input = args
        .input
        .as_deref()
        .context("--input <screenshot> is required")?;

    let mut config = load_or_create_config(args.config.as_deref())?;
    if args.no_diagnostics {
        config.diagnostics.enabled = false;
    }
    let output_root = resolve_output_root(&args, &config);

    let recognizer = TesseractRecognizer::new(config.recognizer.clone())?;
    info!("Recognizer: {}", recognizer.executable().display());
    let capture = ScreenCapture::from_file(input, config.capture.clone())?;
    let pipeline = VisionPipeline::new(config, Arc::new(recognizer))?.with_output_root(output_root);
    let runner = PipelineRunner::new(pipeline);
    match runner.pipeline().output_root() {
        Some(root) => info!("Diagnostics under {}", root.display()),
        None => info!("Diagnostics disabled"),
    }

    if args.stdin {
        run_stdin(runner, capture, args.json)
    } else {
        let point = args.point.unwrap_or_else(|| capture.center());
        let frame = capture.capture_at(point);
        match runner.try_run(&frame) {
            RunOutcome::Completed(result) => print_result(&result, args.json),
            RunOutcome::Dropped => Ok(()),
        }
    }
}

/// Load configuration from file or fall back to defaults
fn load_or_create_config(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        let config = config::load_config(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_path) = storage::default_config_path() {
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return Ok(config);
                }
                Err(e) => warn!("Ignoring {:?}: {:#}", config_path, e),
            }
        }
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

/// `--output`, then the configured root, then the data directory
fn resolve_output_root(args: &Args, config: &AppConfig) -> Option<PathBuf> {
    if !config.diagnostics.enabled {
        return None;
    }
    if let Some(root) = args.output.clone().or_else(|| config.diagnostics.output_root.clone()) {
        return Some(root);
    }
    match storage::get_output_dir() {
        Ok(dir) => Some(dir),
        Err(e) => {
            warn!("Diagnostics disabled: {:#}", e);
            None
        }
    }
}

fn run_stdin(runner: PipelineRunner, capture: ScreenCapture, json: bool) -> Result<()> {
    let (results_tx, results_rx) = unbounded::<PipelineResult>();
    let printer = std::thread::spawn(move || {
        for result in results_rx.iter() {
            if let Err(e) = print_result(&result, json) {
                warn!("Failed to print result: {:#}", e);
            }
        }
    });

    let listener = spawn_listener(runner, capture, results_tx);
    info!("Reading X,Y triggers from stdin");
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_point(&line) {
            Ok((x, y)) => listener.send(x, y),
            Err(e) => warn!("{}", e),
        }
    }

    let dropped = listener.shutdown();
    let _ = printer.join();
    info!("Input closed, {} triggers dropped while busy", dropped);
    Ok(())
}

fn print_result(result: &PipelineResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(&result.summary())?);
        return Ok(());
    }

    if result.has_text() {
        println!("{}", result.best_text);
        println!("  cleaned:    {}", result.cleaned_text);
        println!("  confidence: {:.1}", result.best_confidence);
        if let Some(region) = result.best_region_source {
            println!("  region:     {}", region);
        }
    } else {
        println!("(no text found)");
    }
    println!(
        "  candidates: {} in {} ms",
        result.candidate_regions.len(),
        result.processing_time_ms
    );
    if let Some(first) = result.diagnostic_artifact_paths.first() {
        println!(
            "  artifacts:  {} (first: {})",
            result.diagnostic_artifact_paths.len(),
            first.display()
        );
    }
    Ok(())
}
