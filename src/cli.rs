use anyhow::Result;
use std::path::Path;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::AppConfig;
use crate::logging::init_logging;
use crate::metrics::MetricsCollector;

/// Printed when `process_data` gets the wrong arguments
pub const PROCESS_USAGE: &str = "Please provide the filepaths of the messages and categories \
datasets as the first and second argument respectively, as well as the filepath of the \
database to save the cleaned data to as the third argument. \n\nExample: process_data \
disaster_messages.csv disaster_categories.csv DisasterResponse.db";

/// Printed when `train_classifier` gets the wrong arguments
pub const TRAIN_USAGE: &str = "Please provide the filepath of the disaster messages database \
as the first argument and the filepath of the model file to save the model to as the second \
argument. \n\nExample: train_classifier ../data/DisasterResponse.db classifier.bin";

/// Keeps process-wide logging alive for the lifetime of a command
pub struct Runtime {
    pub config: AppConfig,
    _log_guard: Option<WorkerGuard>,
}

/// Load configuration, then start logging and metrics
pub fn init(config_path: Option<&Path>) -> Result<Runtime> {
    let config = AppConfig::load_from(config_path)?;

    let log_file = config.logging.file_path.as_deref().map(Path::new);
    let log_guard = init_logging(Some(&config.get_log_level()), log_file)?;

    if let Err(e) = MetricsCollector::init() {
        debug!(error = %e, "Metrics recorder already installed");
    }

    Ok(Runtime {
        config,
        _log_guard: log_guard,
    })
}

/// Print usage guidance for a command invoked with the wrong arguments
#[allow(clippy::print_stdout)]
pub fn print_usage(usage: &str) {
    println!("{usage}");
}
