//! Exhaustive cross-validated hyperparameter search over a pipeline.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::evaluate::subset_accuracy;
use crate::model::{Estimator, Pipeline};

/// One assignment of values to parameter names
pub type ParamSet = Vec<(String, String)>;

/// Parameter names mapped to the values to try; candidates are the Cartesian product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamGrid {
    params: Vec<(String, Vec<String>)>,
}

impl ParamGrid {
    /// Build a grid; keys are kept in sorted order and every key needs at least one value
    pub fn new(params: BTreeMap<String, Vec<String>>) -> Result<Self> {
        if let Some((key, _)) = params.iter().find(|(_, values)| values.is_empty()) {
            return Err(PipelineError::InvalidConfig(format!(
                "parameter {key:?} has no values to search"
            )));
        }
        Ok(Self {
            params: params.into_iter().collect(),
        })
    }

    /// True when there are no parameters to search
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Number of candidates
    #[must_use]
    pub fn len(&self) -> usize {
        if self.params.is_empty() {
            return 0;
        }
        self.params.iter().map(|(_, values)| values.len()).product()
    }

    /// Every candidate, the last key varying fastest
    #[must_use]
    pub fn candidates(&self) -> Vec<ParamSet> {
        if self.params.is_empty() {
            return Vec::new();
        }

        let mut candidates: Vec<ParamSet> = vec![Vec::new()];
        for (key, values) in &self.params {
            candidates = candidates
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |value| {
                        let mut candidate = prefix.clone();
                        candidate.push((key.clone(), value.clone()));
                        candidate
                    })
                })
                .collect();
        }
        candidates
    }
}

/// Cross-validation outcome for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub params: ParamSet,
    pub fold_scores: Vec<f64>,
    /// NaN when any fold failed to fit
    pub mean_score: f64,
}

/// What the search found, stored with the trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub best_params: ParamSet,
    pub best_score: f64,
    pub cv_folds: usize,
    pub results: Vec<CandidateResult>,
}

/// Train/test index pairs for contiguous, unshuffled k-fold cross-validation
#[must_use]
pub fn kfold_splits(n_samples: usize, n_folds: usize) -> Vec<(Vec<usize>, Vec<usize>)> {
    if n_folds == 0 {
        return Vec::new();
    }

    let base = n_samples / n_folds;
    let extra = n_samples % n_folds;
    let mut start = 0;
    (0..n_folds)
        .map(|fold| {
            let size = base + usize::from(fold < extra);
            let test: Vec<usize> = (start..start + size).collect();
            let train: Vec<usize> = (0..start).chain(start + size..n_samples).collect();
            start += size;
            (train, test)
        })
        .collect()
}

struct Fold {
    train_tokens: Vec<Vec<String>>,
    train_labels: Vec<Vec<u8>>,
    test_tokens: Vec<Vec<String>>,
    test_labels: Vec<Vec<u8>>,
}

/// Grid search over a pipeline, scored by subset accuracy and refitted on all data
#[derive(Debug, Clone)]
pub struct GridSearch<E> {
    pipeline: Pipeline<E>,
    grid: ParamGrid,
    cv_folds: usize,
    results: Vec<CandidateResult>,
    best_index: Option<usize>,
    best_estimator: Option<Pipeline<E>>,
}

impl<E: Estimator> GridSearch<E> {
    /// Every candidate is applied to the pipeline up front so bad keys fail here
    pub fn new(pipeline: Pipeline<E>, grid: ParamGrid, cv_folds: usize) -> Result<Self> {
        if cv_folds < 2 {
            return Err(PipelineError::InvalidConfig(format!(
                "cv_folds must be at least 2, got {cv_folds}"
            )));
        }

        let search = Self {
            pipeline,
            grid,
            cv_folds,
            results: Vec::new(),
            best_index: None,
            best_estimator: None,
        };
        for candidate in search.grid.candidates() {
            search.configured(&candidate)?;
        }
        Ok(search)
    }

    fn configured(&self, params: &[(String, String)]) -> Result<Pipeline<E>> {
        let mut pipeline = self.pipeline.unfitted();
        for (key, value) in params {
            pipeline.set_param(key, value)?;
        }
        Ok(pipeline)
    }

    pub fn fit(&mut self, texts: &[String], labels: &[Vec<u8>]) -> Result<()> {
        if texts.is_empty() {
            return Err(PipelineError::EmptyDataset("no training messages".to_string()));
        }
        if texts.len() != labels.len() {
            return Err(PipelineError::InvalidConfig(format!(
                "{} messages for {} label rows",
                texts.len(),
                labels.len()
            )));
        }

        let tokens = self.pipeline.build_tokenizer()?.tokenize_all(texts);
        let n_folds = self.cv_folds.min(tokens.len());

        if n_folds < 2 {
            warn!(
                samples = tokens.len(),
                "Too few samples for cross-validation, fitting with the base parameters"
            );
            let mut pipeline = self.pipeline.unfitted();
            pipeline.fit_tokens(&tokens, labels)?;
            self.results.clear();
            self.best_index = None;
            self.best_estimator = Some(pipeline);
            return Ok(());
        }

        let folds: Vec<Fold> = kfold_splits(tokens.len(), n_folds)
            .into_iter()
            .map(|(train, test)| Fold {
                train_tokens: train.iter().map(|&i| tokens[i].clone()).collect(),
                train_labels: train.iter().map(|&i| labels[i].clone()).collect(),
                test_tokens: test.iter().map(|&i| tokens[i].clone()).collect(),
                test_labels: test.iter().map(|&i| labels[i].clone()).collect(),
            })
            .collect();

        let candidates = self.grid.candidates();
        info!(
            candidates = candidates.len(),
            folds = n_folds,
            fits = candidates.len() * n_folds,
            "Fitting grid search"
        );

        let jobs: Vec<(usize, usize)> = (0..candidates.len())
            .flat_map(|c| (0..n_folds).map(move |f| (c, f)))
            .collect();

        let this = &*self;
        let scores: Vec<(usize, usize, f64)> = jobs
            .into_par_iter()
            .map(|(c, f)| {
                let fold = &folds[f];
                let score = this
                    .configured(&candidates[c])
                    .and_then(|mut pipeline| {
                        pipeline.fit_tokens(&fold.train_tokens, &fold.train_labels)?;
                        let predictions = pipeline.predict_tokens(&fold.test_tokens)?;
                        Ok(subset_accuracy(&fold.test_labels, &predictions))
                    })
                    .unwrap_or_else(|e| {
                        warn!(candidate = c, fold = f, error = %e, "Candidate fit failed");
                        f64::NAN
                    });
                debug!(candidate = ?candidates[c], fold = f, score, "Scored fold");
                (c, f, score)
            })
            .collect();

        let mut fold_scores = vec![vec![f64::NAN; n_folds]; candidates.len()];
        for (c, f, score) in scores {
            fold_scores[c][f] = score;
        }

        let results: Vec<CandidateResult> = candidates
            .into_iter()
            .zip(fold_scores)
            .map(|(params, fold_scores)| {
                let mean_score = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
                CandidateResult {
                    params,
                    fold_scores,
                    mean_score,
                }
            })
            .collect();

        let best_index = results
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.mean_score.is_nan())
            .fold(None, |best: Option<(usize, f64)>, (i, r)| match best {
                Some((_, score)) if score >= r.mean_score => best,
                _ => Some((i, r.mean_score)),
            })
            .map(|(i, _)| i)
            .ok_or_else(|| {
                PipelineError::InvalidConfig("every grid search candidate failed".to_string())
            })?;

        let best = &results[best_index];
        info!(params = ?best.params, score = best.mean_score, "Best grid search candidate");

        let mut pipeline = self.configured(&best.params)?;
        pipeline.fit_tokens(&tokens, labels)?;

        self.results = results;
        self.best_index = Some(best_index);
        self.best_estimator = Some(pipeline);
        Ok(())
    }

    /// The refitted best pipeline
    #[must_use]
    pub const fn best_estimator(&self) -> Option<&Pipeline<E>> {
        self.best_estimator.as_ref()
    }

    #[must_use]
    pub fn into_best_estimator(self) -> Option<Pipeline<E>> {
        self.best_estimator
    }

    /// Parameters of the winning candidate
    #[must_use]
    pub fn best_params(&self) -> Option<&ParamSet> {
        self.best_index.map(|i| &self.results[i].params)
    }

    /// Per-candidate cross-validation results
    #[must_use]
    pub fn results(&self) -> &[CandidateResult] {
        &self.results
    }

    /// Summary of a completed search; `None` when cross-validation was skipped
    #[must_use]
    pub fn summary(&self) -> Option<SearchSummary> {
        let best = &self.results[self.best_index?];
        Some(SearchSummary {
            best_params: best.params.clone(),
            best_score: best.mean_score,
            cv_folds: best.fold_scores.len(),
            results: self.results.clone(),
        })
    }
}
