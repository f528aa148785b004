use anyhow::Result;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

use crate::ingest::CleaningStats;

/// Metric names recorded by the ingestion and training pipelines
pub struct MetricsCollector {
    // Ingestion metrics
    pub rows_loaded_total: &'static str,
    pub duplicates_removed_total: &'static str,
    pub values_coerced_total: &'static str,
    pub suffix_warnings_total: &'static str,
    pub empty_categories: &'static str,
    pub rows_written_total: &'static str,

    // Training metrics
    pub training_samples: &'static str,
    pub training_duration: &'static str,
    pub category_f1: &'static str,
    pub models_saved_total: &'static str,

    // Error metrics
    pub errors_total: &'static str,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            rows_loaded_total: "disaster_response_rows_loaded_total",
            duplicates_removed_total: "disaster_response_duplicates_removed_total",
            values_coerced_total: "disaster_response_values_coerced_total",
            suffix_warnings_total: "disaster_response_suffix_warnings_total",
            empty_categories: "disaster_response_empty_categories",
            rows_written_total: "disaster_response_rows_written_total",

            training_samples: "disaster_response_training_samples",
            training_duration: "disaster_response_training_duration_seconds",
            category_f1: "disaster_response_category_f1",
            models_saved_total: "disaster_response_models_saved_total",

            errors_total: "disaster_response_errors_total",
        }
    }
}

impl MetricsCollector {
    /// Install the no-op recorder; call once per process
    pub fn init() -> Result<()> {
        metrics::set_global_recorder(metrics::NoopRecorder)
            .map_err(|e| anyhow::anyhow!("Failed to initialize metrics recorder: {}", e))?;

        Ok(())
    }

    /// Record the outcome of cleaning a merged table
    pub fn record_cleaning(&self, stats: &CleaningStats) {
        counter!(self.rows_loaded_total).increment(stats.input_rows as u64);
        counter!(self.duplicates_removed_total).increment(stats.duplicates_removed as u64);
        counter!(self.values_coerced_total).increment(stats.values_coerced as u64);
        counter!(self.suffix_warnings_total).increment(stats.suffix_warnings as u64);
        gauge!(self.empty_categories).set(stats.empty_categories as f64);
    }

    pub fn record_rows_written(&self, count: usize, table: &str) {
        counter!(self.rows_written_total, "table" => table.to_string()).increment(count as u64);
    }

    /// Record a completed fit
    pub fn record_training(&self, samples: usize, duration: Duration, grid_search: bool) {
        let mode = if grid_search { "grid_search" } else { "pipeline" };
        gauge!(self.training_samples).set(samples as f64);
        histogram!(self.training_duration, "mode" => mode).record(duration.as_secs_f64());
    }

    pub fn record_category_f1(&self, category: &str, f1: f64) {
        gauge!(self.category_f1, "category" => category.to_string()).set(f1);
    }

    pub fn record_model_saved(&self, bytes: u64) {
        counter!(self.models_saved_total).increment(1);
        tracing::debug!(bytes, "Recorded model save");
    }

    /// Record an error by type and operation
    pub fn record_error(&self, error_type: &str, operation: &str) {
        counter!(
            self.errors_total,
            "type" => error_type.to_string(),
            "operation" => operation.to_string()
        )
        .increment(1);
    }
}
