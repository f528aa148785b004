//! The text classification pipeline: tokenize, count, TF-IDF weight, classify
//! every category with its own copy of a base estimator.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::features::{CountVectorizer, FeatureMatrix, TfidfTransformer};
use crate::forest::RandomForest;
use crate::nlp::{Tokenizer, TokenizerSettings};
use crate::search::{GridSearch, ParamGrid};

/// A binary classifier that can be cloned, configured by name and fitted on sparse rows
pub trait Estimator: Clone + Send + Sync {
    /// Fit on labels in {0, 1}
    fn fit(&mut self, x: &FeatureMatrix, y: &[u8]) -> Result<()>;

    /// Probability of the positive label
    fn predict_proba(&self, row: &[(u32, f32)]) -> Result<f32>;

    /// Predicted label
    fn predict(&self, row: &[(u32, f32)]) -> Result<u8> {
        Ok(u8::from(self.predict_proba(row)? > 0.5))
    }

    /// Set a hyperparameter from its textual value
    fn set_param(&mut self, name: &str, value: &str) -> Result<()>;

    /// Fresh copy with the same hyperparameters and no fitted state
    #[must_use]
    fn unfitted(&self) -> Self;
}

/// Fits one estimator per output column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiOutputClassifier<E> {
    estimator: E,
    estimators: Vec<E>,
}

impl<E: Estimator> MultiOutputClassifier<E> {
    #[must_use]
    pub const fn new(estimator: E) -> Self {
        Self {
            estimator,
            estimators: Vec::new(),
        }
    }

    /// The base estimator every output is cloned from
    #[must_use]
    pub const fn estimator(&self) -> &E {
        &self.estimator
    }

    /// Fitted per-output estimators, in output order
    #[must_use]
    pub fn estimators(&self) -> &[E] {
        &self.estimators
    }

    pub fn fit(&mut self, x: &FeatureMatrix, labels: &[Vec<u8>]) -> Result<()> {
        let n_outputs = labels
            .first()
            .map(Vec::len)
            .ok_or_else(|| PipelineError::EmptyDataset("no label rows".to_string()))?;
        if n_outputs == 0 {
            return Err(PipelineError::EmptyDataset("label rows have no columns".to_string()));
        }
        if labels.len() != x.n_samples() {
            return Err(PipelineError::InvalidConfig(format!(
                "{} label rows for {} samples",
                labels.len(),
                x.n_samples()
            )));
        }
        if let Some(row) = labels.iter().position(|r| r.len() != n_outputs) {
            return Err(PipelineError::InvalidConfig(format!(
                "label row {row} has {} columns, expected {n_outputs}",
                labels[row].len()
            )));
        }

        let mut estimators = Vec::with_capacity(n_outputs);
        for column in 0..n_outputs {
            let y: Vec<u8> = labels.iter().map(|r| r[column]).collect();
            let mut estimator = self.estimator.unfitted();
            estimator.fit(x, &y)?;
            debug!(column, "Fitted output estimator");
            estimators.push(estimator);
        }

        self.estimators = estimators;
        Ok(())
    }

    /// One prediction row per input row, one value per output
    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<Vec<u8>>> {
        if self.estimators.is_empty() {
            return Err(PipelineError::NotFitted);
        }
        x.rows
            .iter()
            .map(|row| self.estimators.iter().map(|e| e.predict(row)).collect())
            .collect()
    }
}

/// `vect -> tfidf -> clf` over raw message text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline<E> {
    pub tokenizer: TokenizerSettings,
    pub vect: CountVectorizer,
    pub tfidf: TfidfTransformer,
    pub clf: MultiOutputClassifier<E>,
}

impl<E: Estimator> Pipeline<E> {
    #[must_use]
    pub fn new(tokenizer: TokenizerSettings, estimator: E) -> Self {
        Self {
            tokenizer,
            vect: CountVectorizer::default(),
            tfidf: TfidfTransformer::default(),
            clf: MultiOutputClassifier::new(estimator),
        }
    }

    /// Set a parameter by its step path, e.g. `clf__estimator__max_features`
    pub fn set_param(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some(name) = key.strip_prefix("clf__estimator__") {
            return self.clf.estimator.set_param(name, value);
        }
        match key {
            "vect__min_df" => self.vect.min_df = parse_field(key, value)?,
            "vect__max_df" => self.vect.max_df = parse_field(key, value)?,
            "tfidf__use_idf" => self.tfidf.use_idf = parse_field(key, value)?,
            other => {
                return Err(PipelineError::InvalidConfig(format!(
                    "unknown pipeline parameter {other:?}"
                )));
            }
        }
        Ok(())
    }

    /// Same steps and parameters, nothing fitted
    #[must_use]
    pub fn unfitted(&self) -> Self {
        Self {
            tokenizer: self.tokenizer.clone(),
            vect: CountVectorizer::new(self.vect.min_df, self.vect.max_df),
            tfidf: TfidfTransformer::new(self.tfidf.use_idf),
            clf: MultiOutputClassifier::new(self.clf.estimator.unfitted()),
        }
    }

    /// Tokenizer matching the stored settings
    pub fn build_tokenizer(&self) -> Result<Tokenizer> {
        Tokenizer::new(self.tokenizer.clone())
    }

    pub fn fit(&mut self, texts: &[String], labels: &[Vec<u8>]) -> Result<()> {
        let tokens = self.build_tokenizer()?.tokenize_all(texts);
        self.fit_tokens(&tokens, labels)
    }

    /// Fit on already tokenized documents
    pub fn fit_tokens(&mut self, tokens: &[Vec<String>], labels: &[Vec<u8>]) -> Result<()> {
        let counts = self.vect.fit_transform(tokens)?;
        let n_features = self.vect.n_features();
        self.tfidf.fit(&counts, n_features);
        let x = FeatureMatrix::new(self.tfidf.transform(counts), n_features);
        self.clf.fit(&x, labels)
    }

    pub fn predict(&self, texts: &[String]) -> Result<Vec<Vec<u8>>> {
        let tokens = self.build_tokenizer()?.tokenize_all(texts);
        self.predict_tokens(&tokens)
    }

    /// Predict on already tokenized documents
    pub fn predict_tokens(&self, tokens: &[Vec<String>]) -> Result<Vec<Vec<u8>>> {
        let counts = self.vect.transform(tokens);
        let x = FeatureMatrix::new(self.tfidf.transform(counts), self.vect.n_features());
        self.clf.predict(&x)
    }
}

/// A bare pipeline or a pipeline wrapped in a hyperparameter search
#[derive(Debug, Clone)]
pub enum Model<E> {
    Pipeline(Pipeline<E>),
    GridSearch(GridSearch<E>),
}

impl<E: Estimator> Model<E> {
    pub fn fit(&mut self, texts: &[String], labels: &[Vec<u8>]) -> Result<()> {
        match self {
            Self::Pipeline(pipeline) => pipeline.fit(texts, labels),
            Self::GridSearch(search) => search.fit(texts, labels),
        }
    }

    pub fn predict(&self, texts: &[String]) -> Result<Vec<Vec<u8>>> {
        self.fitted_pipeline()?.predict(texts)
    }

    /// The pipeline used for predictions: the bare pipeline or the refitted best candidate
    pub fn fitted_pipeline(&self) -> Result<&Pipeline<E>> {
        match self {
            Self::Pipeline(pipeline) => Ok(pipeline),
            Self::GridSearch(search) => search.best_estimator().ok_or(PipelineError::NotFitted),
        }
    }

    /// Consume the model, keeping only the pipeline used for predictions
    pub fn into_pipeline(self) -> Result<Pipeline<E>> {
        match self {
            Self::Pipeline(pipeline) => Ok(pipeline),
            Self::GridSearch(search) => {
                search.into_best_estimator().ok_or(PipelineError::NotFitted)
            }
        }
    }
}

/// Parse a textual hyperparameter value, naming the parameter on failure
pub(crate) fn parse_field<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| PipelineError::InvalidConfig(format!("{name}: {e}")))
}

/// Compose `vect -> tfidf -> clf(estimator)`, wrapped in a grid search when a grid is given
pub fn build_model<E: Estimator>(
    tokenizer: TokenizerSettings,
    estimator: E,
    grid: Option<ParamGrid>,
    cv_folds: usize,
) -> Result<Model<E>> {
    build_model_from(Pipeline::new(tokenizer, estimator), grid, cv_folds)
}

/// Wrap an already configured pipeline, in a grid search when a grid is given
pub fn build_model_from<E: Estimator>(
    pipeline: Pipeline<E>,
    grid: Option<ParamGrid>,
    cv_folds: usize,
) -> Result<Model<E>> {
    match grid {
        Some(grid) if !grid.is_empty() => {
            info!(candidates = grid.len(), cv_folds, "Building grid search model");
            Ok(Model::GridSearch(GridSearch::new(pipeline, grid, cv_folds)?))
        }
        _ => {
            info!("Building pipeline model");
            Ok(Model::Pipeline(pipeline))
        }
    }
}

/// Default model: a 100-tree random forest per category
pub fn build_default_model(
    grid: Option<ParamGrid>,
    cv_folds: usize,
) -> Result<Model<RandomForest>> {
    build_model(TokenizerSettings::default(), RandomForest::default(), grid, cv_folds)
}
