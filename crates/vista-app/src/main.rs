use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vista_app::backend;
use vista_app::commands::{self, PredictOptions, TrainOptions};
use vista_app::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "vista", version, about = "Train, serve, monitor and retrain an image classifier")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        #[arg(long, env = "VISTA_PORT")]
        port: Option<u16>,
    },
    /// Train a new model on the training directory
    Train {
        #[arg(long, default_value_t = 20)]
        epochs: usize,
        /// Fine-tune epochs after the first pass, with part of the feature extractor unfrozen
        #[arg(long, default_value_t = 0)]
        fine_tune_epochs: usize,
        /// First feature block to unfreeze when fine-tuning
        #[arg(long, default_value_t = 2)]
        unfreeze_from: usize,
        /// Weight the loss by inverse class frequency
        #[arg(long)]
        balance_classes: bool,
    },
    /// Retrain the serving model on the current training directory
    Retrain,
    /// Classify one or more images
    Predict {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Dataset and prediction log statistics
    Stats,
    /// Create the data, model and log directories
    Scaffold {
        #[arg(long, value_delimiter = ',', default_value = "healthy,diseased")]
        classes: Vec<String>,
        /// Synthetic images to write per class
        #[arg(long, default_value_t = 0)]
        samples: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.port = port;
            }
            backend::serve(config).await
        }
        Command::Train {
            epochs,
            fine_tune_epochs,
            unfreeze_from,
            balance_classes,
        } => {
            let options = TrainOptions {
                epochs,
                fine_tune_epochs,
                unfreeze_from,
                balance_classes,
            };
            tokio::task::spawn_blocking(move || commands::train(&config, &options)).await?
        }
        Command::Retrain => commands::retrain(&config).await,
        Command::Predict {
            images,
            top_k,
            threshold,
        } => {
            let options = PredictOptions { top_k, threshold };
            tokio::task::spawn_blocking(move || commands::predict(&config, &images, &options))
                .await?
        }
        Command::Stats => commands::stats(&config),
        Command::Scaffold { classes, samples } => {
            tokio::task::spawn_blocking(move || commands::scaffold(&config, &classes, samples))
                .await?
        }
    }
}
