use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use disaster_response::cli::{self, PROCESS_USAGE};
use disaster_response::ingest;

/// Merge, clean and store disaster response messages
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Messages CSV file
    messages: PathBuf,

    /// Categories CSV file
    categories: PathBuf,

    /// SQLite database to write the cleaned table to
    database: PathBuf,

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
            cli::print_usage(PROCESS_USAGE);
            return Ok(());
        }
    };

    let runtime = cli::init(cli.config.as_deref())?;
    let stats = ingest::run(
        &cli.messages,
        &cli.categories,
        &cli.database,
        &runtime.config.database.table_name,
    )?;
    info!(?stats, "Ingestion finished");
    Ok(())
}
