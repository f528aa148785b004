//! Error types for the disaster-response library.
//!
//! This module provides custom error types using `thiserror` for the ingestion,
//! training and model persistence code paths.

use thiserror::Error;

/// Errors that can occur while processing messages or training a model.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// CSV parsing errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary serialization errors
    #[error("Binary serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A table is absent from the database
    #[error("Missing table: {0}")]
    MissingTable(String),

    /// A required column is absent from a table or file
    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// A message row has no category string after the join
    #[error("No categories found for row {row}")]
    MissingCategories {
        /// Zero-based row index in the merged table
        row: usize,
    },

    /// A row carries a different number of category tokens than the first row
    #[error("Row {row} has {found} categories, expected {expected}")]
    CategoryCountMismatch {
        /// Zero-based row index in the merged table
        row: usize,
        /// Number of categories in the first row
        expected: usize,
        /// Number of categories in this row
        found: usize,
    },

    /// A category token does not end in a digit
    #[error("Invalid category value {token:?} in row {row}")]
    InvalidCategoryValue {
        /// Zero-based row index in the merged table
        row: usize,
        /// Offending token
        token: String,
    },

    /// A label cell in the stored table is not an integer
    #[error("Invalid label in column {column}: {value}")]
    InvalidLabel {
        /// Column name
        column: String,
        /// Rendered cell value
        value: String,
    },

    /// Nothing to work with
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    /// Invalid configuration or hyperparameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Model file written by an incompatible version
    #[error("Unsupported model format version {found}, expected {expected}")]
    UnsupportedModelVersion {
        /// Version found in the file
        found: u32,
        /// Version this build writes
        expected: u32,
    },

    /// Predict called before fit
    #[error("Model has not been fitted")]
    NotFitted,
}

/// Convenience type alias for Result with `PipelineError`
pub type Result<T> = std::result::Result<T, PipelineError>;
