use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceknn_core::{
    check_distance_threshold, persist, predict, train, workspace, DatasetBuilder, IndexSource,
    TrainOptions,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod command_provider;
mod config;

use command_provider::CommandProvider;
use config::Config;

#[derive(Parser)]
#[command(name = "faceknn", about = "Train and run a nearest-neighbor face classifier")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a dataset from <dir>/<label>/<image> and train a classifier
    Train {
        /// Root directory with one subdirectory per person
        dataset: PathBuf,
        /// Where to write the trained model
        #[arg(short, long)]
        model: Option<PathBuf>,
        /// Neighbor count (default: round(sqrt(samples)))
        #[arg(short, long)]
        k: Option<usize>,
        /// Search structure: brute, kd_tree, ball_tree or auto
        #[arg(long)]
        search: Option<String>,
        /// Leaf size for tree search structures
        #[arg(long)]
        leaf_size: Option<usize>,
        /// Report every skipped image
        #[arg(short, long)]
        verbose: bool,
    },
    /// Label the faces in an image
    Predict {
        image: PathBuf,
        #[arg(short, long)]
        model: Option<PathBuf>,
        /// Nearest-neighbor distance above which a face is "unknown"
        #[arg(short, long, value_parser = parse_threshold)]
        threshold: Option<f64>,
        /// Print predictions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a summary of a trained model
    Inspect {
        #[arg(short, long)]
        model: Option<PathBuf>,
    },
    /// Remove everything inside a scratch directory
    Clean { dir: PathBuf },
}

fn parse_threshold(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    check_distance_threshold(value).map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;

    match cli.command {
        Commands::Train {
            dataset,
            model,
            k,
            search,
            leaf_size,
            verbose,
        } => {
            if let Some(search) = search {
                config.search = search;
            }
            if let Some(leaf_size) = leaf_size {
                config.leaf_size = leaf_size;
            }
            let strategy = config.search_strategy()?;
            let model = model.unwrap_or(config.model_path);

            let provider = CommandProvider::from_argv(&config.provider_command)?;
            let report = DatasetBuilder::new(provider)
                .verbose(verbose)
                .build(&dataset)
                .with_context(|| format!("building dataset from {}", dataset.display()))?;

            if verbose {
                for skipped in &report.skipped {
                    println!("skipped {}: {}", skipped.path.display(), skipped.reason);
                }
            } else {
                for dir in report.unreadable_dirs() {
                    println!("skipped {}: {}", dir.path.display(), dir.reason);
                }
            }

            let options = TrainOptions {
                k,
                strategy,
                save_path: Some(model.clone()),
                verbose,
            };
            let index = train(&report.training_set, &options).context("training classifier")?;

            println!(
                "Trained on {} of {} images ({} labels), k={}, search={}",
                index.len(),
                report.images_seen(),
                report.training_set.labels().len(),
                index.effective_k(),
                index.strategy().name(),
            );
            println!("Model saved to {}", model.display());
        }
        Commands::Predict {
            image,
            model,
            threshold,
            json,
        } => {
            let model = model.unwrap_or(config.model_path);
            let threshold = threshold.unwrap_or(config.distance_threshold);

            let frame = image::open(&image)
                .with_context(|| format!("opening {}", image.display()))?
                .to_rgb8();
            let mut provider = CommandProvider::from_argv(&config.provider_command)?;
            let predictions = predict(
                &frame,
                &mut provider,
                Some(IndexSource::Path(&model)),
                threshold,
            )?;

            if json {
                println!("{}", serde_json::to_string_pretty(&predictions)?);
            } else if predictions.is_empty() {
                println!("No faces found");
            } else {
                for p in &predictions {
                    let r = p.region;
                    println!("{} {},{},{},{}", p.label, r.top, r.right, r.bottom, r.left);
                }
                let known = predictions.iter().filter(|p| p.is_known()).count();
                println!("{known} of {} faces recognized", predictions.len());
            }
        }
        Commands::Inspect { model } => {
            let model = model.unwrap_or(config.model_path);
            let index = persist::load(&model)
                .with_context(|| format!("loading model {}", model.display()))?;
            println!("{}", serde_json::to_string_pretty(&index.summary())?);
        }
        Commands::Clean { dir } => {
            let removed = workspace::clear_directory(&dir)
                .with_context(|| format!("clearing {}", dir.display()))?;
            println!("Removed {removed} entries from {}", dir.display());
        }
    }

    Ok(())
}
