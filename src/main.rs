use faceset::capture::{CaptureSession, KeyboardControls, V4lCamera};
use faceset::common::Config;
use faceset::core::detection::FixedRegionDetector;
use faceset::core::{Preprocessor, QualityGate};
use faceset::storage::{PhotoStore, Registry};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "faceset")]
#[command(about = "Face enrollment dataset builder")]
struct Cli {
    /// Path to a TOML config file (defaults to configs/faceset.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an interactive capture session for one subject
    Capture {
        /// Subject identifier, e.g. STU001
        #[arg(short, long)]
        subject: String,
        /// Target photo count (defaults to the configured value)
        #[arg(short, long)]
        target: Option<u64>,
        /// Use the built-in fixed-region detector instead of a real model.
        /// Only for exercising the pipeline; it accepts whatever is in frame.
        #[arg(long)]
        dev_detector: bool,
    },
    /// Preprocess a whole raw dataset into a mirrored output tree
    Preprocess {
        /// Dataset root (defaults to the configured raw directory)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Output root (defaults to the configured processed directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Preprocess a single directory of images
    PreprocessDir {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Report blur scores for every image in a directory
    Check {
        #[arg(short, long)]
        dir: PathBuf,
    },
    /// Show registry statistics for the raw dataset
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Capture {
            subject,
            target,
            dev_detector,
        } => {
            let target = target.unwrap_or(config.capture.target_photos);
            run_capture(&config, &subject, target, dev_detector)?;
        }
        Commands::Preprocess { input, output } => {
            let input = input.unwrap_or_else(|| config.dataset.raw_dir.clone());
            let output = output.unwrap_or_else(|| config.dataset.processed_dir.clone());

            println!("Preprocessing dataset {} -> {}", input.display(), output.display());
            let preprocessor = Preprocessor::new(&config.preprocess);
            let stats = preprocessor.process_dataset(&input, &output)?;

            println!("\n=== Dataset summary ===");
            println!("Subjects:         {}", stats.subjects);
            println!("Total images:     {}", stats.total_images);
            println!("Processed images: {}", stats.processed_images);
        }
        Commands::PreprocessDir { input, output } => {
            let preprocessor = Preprocessor::new(&config.preprocess);
            let batch = preprocessor.process_directory(&input, &output)?;

            println!("\n=== Batch summary ===");
            println!("Total files:        {}", batch.total_files);
            println!("Processed:          {}", batch.processed);
            println!("Rejected (blur):    {}", batch.rejected_blur);
            println!("Rejected (other):   {}", batch.rejected_other);
            println!("Unreadable:         {}", batch.unreadable);
        }
        Commands::Check { dir } => {
            let preprocessor = Preprocessor::new(&config.preprocess);
            let entries = preprocessor.blur_report(&dir)?;

            let mut blurry = 0;
            for entry in &entries {
                let status = if entry.sharp { "OK     " } else { "BLURRY " };
                let name = entry
                    .path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("?");
                println!("{} {} ({:.2})", status, name, entry.score);
                if !entry.sharp {
                    blurry += 1;
                }
            }

            println!("\nTotal: {}, sharp: {}, blurry: {}", entries.len(), entries.len() - blurry, blurry);
        }
        Commands::Stats => {
            let registry = Registry::load(&config.dataset.raw_dir)?;
            if registry.is_empty() {
                println!("No subjects captured yet");
            } else {
                println!("=== Capture statistics ===");
                for (subject, count) in registry.counts() {
                    println!("  {}: {} photos", subject, count);
                }
                println!("Subjects: {}", registry.counts().len());
                println!("Total photos: {}", registry.total_photos());
            }
        }
    }

    Ok(())
}

fn run_capture(config: &Config, subject: &str, target: u64, dev_detector: bool) -> Result<()> {
    if !dev_detector {
        bail!(
            "no face detector backend is configured; pass --dev-detector to \
             exercise the capture pipeline with the built-in stand-in"
        );
    }

    std::fs::create_dir_all(&config.dataset.raw_dir)?;
    let mut registry = Registry::load(&config.dataset.raw_dir)?;
    let store = PhotoStore::new(&config.dataset.raw_dir);
    let gate = QualityGate::new(&config.quality);

    println!("=== Capturing for {} ===", subject);
    println!("Dataset: {}", store.root().display());
    println!("Target: {} photos", target);
    println!("Already captured: {}", registry.count(subject));
    println!("Press 'q' or Esc to stop\n");

    let mut camera = V4lCamera::open(&config.camera)?;
    let mut stream = camera.start()?;
    let mut detector = FixedRegionDetector;
    let mut controls = KeyboardControls;

    let mut session = CaptureSession::new(gate, &mut registry, &store, &config.capture);
    let summary = session.run(&mut stream, &mut detector, &mut controls, subject, target)?;

    println!("\nCapture finished for {}", summary.subject);
    println!(
        "Captured {} photos this session ({}/{} total)",
        summary.captured, summary.total_for_subject, target
    );
    if let Some(reason) = summary.last_reject {
        println!("Last rejection: {}", reason);
    }

    Ok(())
}

fn setup_logging(verbose: bool) {
    if verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }
}
