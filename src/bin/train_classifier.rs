use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use disaster_response::cli::{self, TRAIN_USAGE};
use disaster_response::train::{self, TrainOptions};

/// Train and save the disaster message classifier
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// SQLite database holding the cleaned messages table
    database: PathBuf,

    /// Where to write the trained model
    model: PathBuf,

    /// Fit the base pipeline without a hyperparameter search
    #[arg(long)]
    no_grid_search: bool,

    /// Write the evaluation report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Extra configuration file layered over the defaults
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(_) => {
            cli::print_usage(TRAIN_USAGE);
            return Ok(());
        }
    };

    let runtime = cli::init(cli.config.as_deref())?;
    let options = TrainOptions {
        no_grid_search: cli.no_grid_search,
        report_path: cli.report,
    };
    let outcome = train::run(&cli.database, &cli.model, &runtime.config, &options)?;
    info!(
        train_samples = outcome.train_samples,
        test_samples = outcome.test_samples,
        mean_weighted_f1 = outcome.report.mean_weighted_f1,
        "Training finished"
    );
    Ok(())
}
