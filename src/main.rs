use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use disaster_response::cli;
use disaster_response::db::Database;
use disaster_response::ingest;
use disaster_response::logging::OperationTimer;
use disaster_response::persist::load_model;
use disaster_response::train::{self, TrainOptions};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Extra configuration file layered over the defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge message and category files into the database
    Process {
        /// Messages CSV file
        messages: PathBuf,

        /// Categories CSV file
        categories: PathBuf,

        /// SQLite database to write
        database: PathBuf,
    },
    /// Train a classifier on the cleaned table and save it
    Train {
        /// SQLite database holding the cleaned table
        database: PathBuf,

        /// Where to write the model
        model: PathBuf,

        /// Fit the base pipeline without a hyperparameter search
        #[arg(long)]
        no_grid_search: bool,

        /// Write the evaluation report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Classify messages with a saved model and print JSON
    Classify {
        /// Saved model file
        #[arg(short, long)]
        model: PathBuf,

        /// Messages to classify
        #[arg(required = true)]
        messages: Vec<String>,
    },
    /// Show row count and category prevalence of the cleaned table
    Inspect {
        /// SQLite database holding the cleaned table
        #[arg(short, long)]
        database: PathBuf,
    },
}

#[derive(Serialize)]
struct Classification<'a> {
    message: &'a str,
    categories: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = cli::init(cli.config.as_deref())?;
    let config = &runtime.config;

    info!("Starting disaster-response");

    let result = match &cli.command {
        Commands::Process {
            messages,
            categories,
            database,
        } => ingest::run(messages, categories, database, &config.database.table_name)
            .map(|_| ())
            .map_err(anyhow::Error::from),
        Commands::Train {
            database,
            model,
            no_grid_search,
            report,
        } => {
            let options = TrainOptions {
                no_grid_search: *no_grid_search,
                report_path: report.clone(),
            };
            train::run(database, model, config, &options).map(|_| ())
        }
        Commands::Classify { model, messages } => classify(model, messages),
        Commands::Inspect { database } => inspect(database, &config.database.table_name),
    };

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}

#[allow(clippy::print_stdout)]
fn classify(model_path: &Path, messages: &[String]) -> Result<()> {
    let timer = OperationTimer::new("classify");
    let model = load_model(model_path)
        .with_context(|| format!("Failed to load model from {}", model_path.display()))?;

    let categories = model.classify(messages)?;
    let output: Vec<Classification<'_>> = messages
        .iter()
        .zip(categories)
        .map(|(message, categories)| Classification {
            message: message.as_str(),
            categories,
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&output)?);
    timer.finish();
    Ok(())
}

#[allow(clippy::print_stdout)]
fn inspect(database: &Path, table_name: &str) -> Result<()> {
    let db = Database::open(database)
        .with_context(|| format!("Failed to open database {}", database.display()))?;

    let rows = db.row_count(table_name)?;
    println!("Table {table_name}: {rows} rows");

    for (category, positive) in db.category_prevalence(table_name)? {
        let share = if rows == 0 { 0.0 } else { positive as f64 / rows as f64 };
        println!("{category:>24} {positive:>8} {:>7.2}%", share * 100.0);
    }
    Ok(())
}
