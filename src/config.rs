use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::forest::{MaxFeatures, RandomForest};
use crate::nlp::{Normalizer, TokenizerSettings};
use crate::search::ParamGrid;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub nlp: NlpConfig,
    pub training: TrainingConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Table the cleaned messages are written to and read from
    pub table_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlpConfig {
    pub normalizer: String, // "lemma" or "stem"
    pub remove_stopwords: bool,
    pub max_text_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub test_size: f64,
    pub seed: Option<u64>,
    pub cv_folds: usize,
    pub grid_search: bool,
    pub param_grid: BTreeMap<String, Vec<String>>,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: String,
    pub bootstrap: bool,
    pub min_df: usize,
    pub max_df: f64,
    pub use_idf: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Gzip level for the serialized model, 0-9
    pub compression_level: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        let mut param_grid = BTreeMap::new();
        param_grid.insert(
            "clf__estimator__max_features".to_string(),
            vec!["sqrt".to_string(), "log2".to_string()],
        );

        Self {
            database: DatabaseConfig {
                table_name: crate::schema::messages::TABLE.to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
            },
            nlp: NlpConfig {
                normalizer: "lemma".to_string(),
                remove_stopwords: false,
                max_text_length: 10000,
            },
            training: TrainingConfig {
                test_size: 0.2,
                seed: Some(42),
                cv_folds: 5,
                grid_search: true,
                param_grid,
                n_estimators: 100,
                max_depth: None,
                min_samples_split: 2,
                min_samples_leaf: 1,
                max_features: "sqrt".to_string(),
                bootstrap: true,
                min_df: 1,
                max_df: 1.0,
                use_idf: true,
            },
            model: ModelConfig { compression_level: 1 },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, optionally layering an explicit file on top of the defaults
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let defaults = Config::try_from(&Self::default())
            .context("Failed to build default configuration")?;

        let mut builder = Config::builder()
            // Start with default values
            .add_source(defaults)
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("config").required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            // Add environment variables with prefix, e.g. DISASTER_RESPONSE_TRAINING__TEST_SIZE
            .add_source(Environment::with_prefix("DISASTER_RESPONSE").separator("__"))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.database.table_name.trim().is_empty() {
            return Err(anyhow::anyhow!("table_name cannot be empty"));
        }

        // Validate logging config
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        // Validate NLP config
        self.nlp.tokenizer_settings()?;
        if self.nlp.max_text_length == 0 {
            return Err(anyhow::anyhow!("max_text_length must be greater than 0"));
        }

        // Validate training config
        let training = &self.training;
        if !(training.test_size > 0.0 && training.test_size < 1.0) {
            return Err(anyhow::anyhow!(
                "test_size must be between 0 and 1 (exclusive), got {}",
                training.test_size
            ));
        }
        if training.cv_folds < 2 {
            return Err(anyhow::anyhow!("cv_folds must be at least 2"));
        }
        if training.n_estimators == 0 {
            return Err(anyhow::anyhow!("n_estimators must be greater than 0"));
        }
        if training.min_samples_split < 2 {
            return Err(anyhow::anyhow!("min_samples_split must be at least 2"));
        }
        if training.min_samples_leaf == 0 {
            return Err(anyhow::anyhow!("min_samples_leaf must be greater than 0"));
        }
        if training.min_df == 0 {
            return Err(anyhow::anyhow!("min_df must be greater than 0"));
        }
        if !(training.max_df > 0.0 && training.max_df <= 1.0) {
            return Err(anyhow::anyhow!("max_df must be in (0, 1], got {}", training.max_df));
        }
        training
            .max_features
            .parse::<MaxFeatures>()
            .map_err(|e| anyhow::anyhow!("Invalid max_features: {}", e))?;
        if training.grid_search {
            training.param_grid()?;
        }

        // Validate model config
        if self.model.compression_level > 9 {
            return Err(anyhow::anyhow!(
                "compression_level must be between 0 and 9, got {}",
                self.model.compression_level
            ));
        }

        Ok(())
    }

    /// Get log level from environment or config
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}

impl NlpConfig {
    /// Tokenizer settings described by this section
    pub fn tokenizer_settings(&self) -> Result<TokenizerSettings> {
        let normalizer = self
            .normalizer
            .parse::<Normalizer>()
            .map_err(|e| anyhow::anyhow!("Invalid normalizer: {}", e))?;

        Ok(TokenizerSettings {
            normalizer,
            remove_stopwords: self.remove_stopwords,
            max_text_length: self.max_text_length,
        })
    }
}

impl TrainingConfig {
    /// Base random forest described by this section
    pub fn forest(&self) -> Result<RandomForest> {
        let max_features = self
            .max_features
            .parse::<MaxFeatures>()
            .map_err(|e| anyhow::anyhow!("Invalid max_features: {}", e))?;

        Ok(RandomForest::new(crate::forest::ForestParams {
            n_estimators: self.n_estimators,
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split,
            min_samples_leaf: self.min_samples_leaf,
            max_features,
            bootstrap: self.bootstrap,
            seed: self.seed,
        }))
    }

    /// Hyperparameter grid, or `None` when grid search is disabled or the grid is empty
    pub fn param_grid(&self) -> Result<Option<ParamGrid>> {
        if !self.grid_search || self.param_grid.is_empty() {
            return Ok(None);
        }

        let grid = ParamGrid::new(self.param_grid.clone())
            .map_err(|e| anyhow::anyhow!("Invalid param_grid: {}", e))?;
        Ok(Some(grid))
    }
}
