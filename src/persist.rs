//! Trained model artifact: gzip-compressed bincode with a format version header.

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::forest::RandomForest;
use crate::model::Pipeline;
use crate::search::SearchSummary;

/// Bumped whenever the serialized layout changes
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Everything needed to classify new messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub format_version: u32,
    /// Category for each prediction position
    pub category_names: Vec<String>,
    pub pipeline: Pipeline<RandomForest>,
    /// Present when the pipeline was chosen by grid search
    pub search: Option<SearchSummary>,
    pub trained_at: DateTime<Utc>,
}

impl TrainedModel {
    #[must_use]
    pub fn new(
        category_names: Vec<String>,
        pipeline: Pipeline<RandomForest>,
        search: Option<SearchSummary>,
    ) -> Self {
        Self {
            format_version: MODEL_FORMAT_VERSION,
            category_names,
            pipeline,
            search,
            trained_at: Utc::now(),
        }
    }

    /// Label rows for the given messages, positions aligned with `category_names`
    pub fn predict(&self, messages: &[String]) -> Result<Vec<Vec<u8>>> {
        self.pipeline.predict(messages)
    }

    /// Names of the categories predicted positive for each message
    pub fn classify(&self, messages: &[String]) -> Result<Vec<Vec<String>>> {
        Ok(self
            .predict(messages)?
            .into_iter()
            .map(|row| {
                row.iter()
                    .zip(&self.category_names)
                    .filter(|(&value, _)| value == 1)
                    .map(|(_, name)| name.clone())
                    .collect()
            })
            .collect())
    }
}

/// Write the model to `path`, replacing any existing file. Returns bytes written.
pub fn save_model(model: &TrainedModel, path: &Path, compression_level: u32) -> Result<u64> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::new(compression_level));
    bincode::serialize_into(&mut encoder, &MODEL_FORMAT_VERSION)?;
    bincode::serialize_into(&mut encoder, model)?;
    encoder.finish()?.flush()?;

    let bytes = std::fs::metadata(path)?.len();
    info!(path = %path.display(), bytes, categories = model.category_names.len(), "Saved model");
    Ok(bytes)
}

/// Read a model written by [`save_model`]
pub fn load_model(path: &Path) -> Result<TrainedModel> {
    let file = File::open(path)?;
    let mut decoder = GzDecoder::new(BufReader::new(file));

    let version: u32 = bincode::deserialize_from(&mut decoder)?;
    if version != MODEL_FORMAT_VERSION {
        return Err(PipelineError::UnsupportedModelVersion {
            found: version,
            expected: MODEL_FORMAT_VERSION,
        });
    }

    let model: TrainedModel = bincode::deserialize_from(&mut decoder)?;
    info!(path = %path.display(), categories = model.category_names.len(), "Loaded model");
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::{ForestParams, MaxFeatures};
    use crate::nlp::TokenizerSettings;
    use tempfile::tempdir;

    fn trained() -> TrainedModel {
        let texts: Vec<String> = ["need water", "water now", "road blocked", "blocked bridge"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let labels = vec![vec![1, 0], vec![1, 0], vec![0, 1], vec![0, 1]];

        let mut pipeline = Pipeline::new(
            TokenizerSettings::default(),
            RandomForest::new(ForestParams {
                n_estimators: 5,
                max_features: MaxFeatures::All,
                bootstrap: false,
                seed: Some(1),
                ..ForestParams::default()
            }),
        );
        pipeline.fit(&texts, &labels).expect("Failed to fit pipeline");
        TrainedModel::new(vec!["water".to_string(), "infrastructure".to_string()], pipeline, None)
    }

    #[test]
    fn test_save_and_load_preserves_predictions() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("classifier.bin");
        let model = trained();

        let bytes = save_model(&model, &path, 1).expect("Failed to save model");
        assert!(bytes > 0);

        let loaded = load_model(&path).expect("Failed to load model");
        let samples = vec!["water please".to_string(), "the bridge".to_string()];
        assert_eq!(
            model.predict(&samples).expect("Failed to predict"),
            loaded.predict(&samples).expect("Failed to predict")
        );
        assert_eq!(loaded.category_names, model.category_names);
    }

    #[test]
    fn test_unknown_version_rejected() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("future.bin");

        let file = File::create(&path).expect("Failed to create file");
        let mut encoder = GzEncoder::new(file, Compression::default());
        bincode::serialize_into(&mut encoder, &(MODEL_FORMAT_VERSION + 1))
            .expect("Failed to write header");
        encoder.finish().expect("Failed to finish gzip stream");

        assert!(matches!(
            load_model(&path),
            Err(PipelineError::UnsupportedModelVersion { .. })
        ));
    }

    #[test]
    fn test_classify_names_positive_categories() {
        let model = trained();
        let names = model
            .classify(&["need water".to_string()])
            .expect("Failed to classify");
        assert_eq!(names, vec![vec!["water".to_string()]]);
    }
}
