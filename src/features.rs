//! Bag-of-words features: term counts and TF-IDF weighting.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{PipelineError, Result};

/// Sparse feature row as `(column, value)` pairs sorted by column
pub type SparseRow = Vec<(u32, f32)>;

/// Row-major sparse matrix shared by the classifiers
#[derive(Debug, Clone, Default)]
pub struct FeatureMatrix {
    pub n_features: usize,
    pub rows: Vec<SparseRow>,
}

impl FeatureMatrix {
    /// Build a matrix from rows produced by a fitted transformer
    #[must_use]
    pub const fn new(rows: Vec<SparseRow>, n_features: usize) -> Self {
        Self { n_features, rows }
    }

    /// Number of samples
    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.rows.len()
    }

    /// Copy of the selected rows, in the given order
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            n_features: self.n_features,
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }
}

/// Value of `feature` in a sparse row, zero when absent
#[must_use]
pub fn feature_value(row: &[(u32, f32)], feature: u32) -> f32 {
    row.binary_search_by_key(&feature, |&(col, _)| col)
        .map_or(0.0, |pos| row[pos].1)
}

/// Converts token lists into term-count vectors over a learned vocabulary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountVectorizer {
    /// Ignore terms that appear in fewer documents than this
    pub min_df: usize,
    /// Ignore terms that appear in more than this fraction of documents
    pub max_df: f64,
    vocabulary: HashMap<String, u32>,
}

impl Default for CountVectorizer {
    fn default() -> Self {
        Self {
            min_df: 1,
            max_df: 1.0,
            vocabulary: HashMap::new(),
        }
    }
}

impl CountVectorizer {
    #[must_use]
    pub fn new(min_df: usize, max_df: f64) -> Self {
        Self {
            min_df,
            max_df,
            vocabulary: HashMap::new(),
        }
    }

    /// Learn the vocabulary. Columns are assigned in sorted term order.
    pub fn fit(&mut self, documents: &[Vec<String>]) -> Result<()> {
        let mut document_frequency: BTreeMap<&str, usize> = BTreeMap::new();
        for doc in documents {
            let mut seen: Vec<&str> = doc.iter().map(String::as_str).collect();
            seen.sort_unstable();
            seen.dedup();
            for term in seen {
                *document_frequency.entry(term).or_insert(0) += 1;
            }
        }

        let max_doc_count = self.max_df * documents.len() as f64;
        let vocabulary: HashMap<String, u32> = document_frequency
            .into_iter()
            .filter(|&(_, df)| df >= self.min_df && df as f64 <= max_doc_count)
            .enumerate()
            .map(|(idx, (term, _))| (term.to_string(), idx as u32))
            .collect();

        if vocabulary.is_empty() {
            return Err(PipelineError::EmptyDataset(
                "empty vocabulary; documents contain no usable terms".to_string(),
            ));
        }

        self.vocabulary = vocabulary;
        Ok(())
    }

    /// Count known terms in each document
    #[must_use]
    pub fn transform(&self, documents: &[Vec<String>]) -> Vec<SparseRow> {
        documents
            .iter()
            .map(|doc| {
                let mut counts: BTreeMap<u32, f32> = BTreeMap::new();
                for term in doc {
                    if let Some(col) = self.column(term) {
                        *counts.entry(col).or_insert(0.0) += 1.0;
                    }
                }
                counts.into_iter().collect()
            })
            .collect()
    }

    /// Fit then transform the same documents
    pub fn fit_transform(&mut self, documents: &[Vec<String>]) -> Result<Vec<SparseRow>> {
        self.fit(documents)?;
        Ok(self.transform(documents))
    }

    /// Number of learned terms
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.vocabulary.len()
    }

    /// Column index of a term, if known
    #[must_use]
    pub fn column(&self, term: &str) -> Option<u32> {
        self.vocabulary.get(term).copied()
    }
}

/// Reweights term counts by smoothed inverse document frequency and L2-normalizes rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfidfTransformer {
    pub use_idf: bool,
    idf: Vec<f32>,
}

impl Default for TfidfTransformer {
    fn default() -> Self {
        Self {
            use_idf: true,
            idf: Vec::new(),
        }
    }
}

impl TfidfTransformer {
    #[must_use]
    pub const fn new(use_idf: bool) -> Self {
        Self {
            use_idf,
            idf: Vec::new(),
        }
    }

    /// Learn `idf = ln((1 + n) / (1 + df)) + 1` for every column
    pub fn fit(&mut self, counts: &[SparseRow], n_features: usize) {
        let mut df = vec![0usize; n_features];
        for row in counts {
            for &(col, _) in row {
                df[col as usize] += 1;
            }
        }

        let n = counts.len() as f64;
        self.idf = df
            .into_iter()
            .map(|d| (((1.0 + n) / (1.0 + d as f64)).ln() + 1.0) as f32)
            .collect();
    }

    /// Apply the weighting to count rows
    #[must_use]
    pub fn transform(&self, counts: Vec<SparseRow>) -> Vec<SparseRow> {
        counts
            .into_iter()
            .map(|mut row| {
                if self.use_idf {
                    for (col, value) in &mut row {
                        *value *= self.idf.get(*col as usize).copied().unwrap_or(1.0);
                    }
                }
                let norm = row.iter().map(|&(_, v)| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for (_, value) in &mut row {
                        *value /= norm;
                    }
                }
                row
            })
            .collect()
    }

    /// Learned IDF weights
    #[must_use]
    pub fn idf(&self) -> &[f32] {
        &self.idf
    }
}
