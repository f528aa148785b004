//! Disaster Response - Message ETL and Multi-Label Classification
//!
//! A Rust library for turning labelled disaster-response messages into a
//! cleaned SQLite table and training a text classifier that tags new messages
//! with every category that applies.
//!
//! # Features
//!
//! - Merge message and category CSV files into one table of binary columns
//! - Tokenize and lemmatize message text
//! - TF-IDF features with one random forest per category
//! - Cross-validated grid search over pipeline hyperparameters
//! - Per-category classification reports and compressed model files

/// Shared command-line setup and usage text
pub mod cli;
/// Configuration management
pub mod config;
/// SQLite table access
pub mod db;
/// Error types
pub mod error;
/// Classification reports
pub mod evaluate;
/// Count and TF-IDF features
pub mod features;
/// Decision trees and random forests
pub mod forest;
/// Ingestion pipeline
pub mod ingest;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Estimator trait, multi-output wrapper and pipeline
pub mod model;
/// Data models and structures
pub mod models;
/// NLP processing
pub mod nlp;
/// Model file format
pub mod persist;
/// Database schema definitions
pub mod schema;
/// Hyperparameter grid search
pub mod search;
/// Training pipeline
pub mod train;

// Re-export key components for easier access
pub use db::Database;
pub use error::{PipelineError, Result};
pub use model::{build_model, Estimator, Model, Pipeline};
pub use models::{CleanedTable, Dataset};
pub use nlp::{tokenize, Tokenizer};
pub use persist::{load_model, save_model, TrainedModel};
