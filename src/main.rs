use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use portal_image_etl::checkpoint::{CheckpointStore, FileCheckpoint};
use portal_image_etl::config::JobConfig;
use portal_image_etl::job::{self, RunOptions};
use portal_image_etl::util::env as env_util;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "portal-image-etl",
    version,
    about = "Annotate a product CSV with 360° images pulled from the vendor portal"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Process the dataset, resuming after the stored checkpoint
    Run {
        /// Override ETL_INPUT_CSV
        #[arg(long)]
        input: Option<PathBuf>,
        /// Ignore the stored checkpoint and process every row
        #[arg(long, default_value_t = false)]
        from_start: bool,
    },
    /// Inspect or clear the stored checkpoint
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },
    /// Resolve one product name to its catalog token and image url
    Lookup {
        /// Human-readable product name as it appears in the dataset
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum CheckpointAction {
    /// Print the last processed sku
    Show,
    /// Delete the checkpoint so the next run starts from the first row
    Reset,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_util::init_env();
    let log_file = env_util::env_opt("LOG_FILE").map(PathBuf::from);
    portal_image_etl::logging::init_tracing("info", log_file.as_deref())?;

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { input, from_start } => {
            let mut cfg = JobConfig::from_env()?;
            if let Some(path) = input {
                cfg.paths.input_csv = path;
            }
            let summary = job::run(&cfg, RunOptions { from_start }).await?;
            info!(
                processed = summary.processed,
                skipped = summary.skipped,
                resolved = summary.resolved,
                inherited = summary.inherited,
                "done"
            );
        }
        Commands::Checkpoint { action } => {
            let paths = JobConfig::paths_from_env();
            let store = FileCheckpoint::new(&paths.checkpoint_file);
            match action {
                CheckpointAction::Show => match store.load()? {
                    Some(sku) => println!("{sku}"),
                    None => println!("(no checkpoint at {})", store.path().display()),
                },
                CheckpointAction::Reset => {
                    if store.reset()? {
                        println!("removed {}", store.path().display());
                    } else {
                        println!("no checkpoint at {}", store.path().display());
                    }
                }
            }
        }
        Commands::Lookup { name } => {
            let cfg = JobConfig::from_env()?;
            let report = job::lookup(&cfg, &name).await?;
            println!("token: {}", report.token.as_deref().unwrap_or("-"));
            println!("image: {}", report.image_url.as_deref().unwrap_or("-"));
        }
    }
    Ok(())
}
