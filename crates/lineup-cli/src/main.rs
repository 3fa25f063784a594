use anyhow::{bail, Context, Result};
use clap::Parser;
use lineup_core::FaceEngine;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod annotate;
mod config;
mod gallery;
mod pipeline;

use annotate::Annotator;
use config::Config;
use gallery::ReferenceFacePolicy;
use pipeline::RunSummary;

#[derive(Parser)]
#[command(
    name = "lineup",
    about = "Batch face identification: annotate unknown photos with names from a reference folder"
)]
struct Cli {
    /// Folder of reference photos; the file name before the first '.' is the person's label
    known_folder: PathBuf,
    /// Folder of photos to identify
    unknown_folder: PathBuf,
    /// Folder for the annotated copies (created if missing)
    #[arg(long, alias = "results_folder", default_value = "results")]
    results_folder: PathBuf,
    /// How to handle reference photos containing more than one face
    #[arg(
        long,
        alias = "reference_face_policy",
        value_enum,
        default_value_t = ReferenceFacePolicy::First
    )]
    reference_face_policy: ReferenceFacePolicy,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match run(&cli) {
        Ok(summary) if summary.all_succeeded() => {
            tracing::info!(processed = summary.processed, "run complete");
            ExitCode::SUCCESS
        }
        Ok(summary) => {
            tracing::error!(
                processed = summary.processed,
                failed = summary.failures.len(),
                "run completed with failures"
            );
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<RunSummary> {
    // Validate both input folders before loading any model or touching the
    // results folder.
    if !cli.known_folder.exists() {
        bail!("known folder not found: {}", cli.known_folder.display());
    }
    if !cli.unknown_folder.exists() {
        bail!("unknown folder not found: {}", cli.unknown_folder.display());
    }

    let config = Config::from_env();

    let annotator = Annotator::load(&config.font_path).context("loading label font")?;
    let mut engine = FaceEngine::load(&config.model_dir).context("loading face models")?;

    let gallery = gallery::build_gallery(&mut engine, &cli.known_folder, cli.reference_face_policy)
        .context("building reference gallery")?;

    let summary = pipeline::run_batch(
        &mut engine,
        &gallery,
        &annotator,
        &cli.unknown_folder,
        &cli.results_folder,
    )
    .context("processing query images")?;

    Ok(summary)
}
