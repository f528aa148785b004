//! Data models for the ingestion and training pipelines
//!
//! Source records as read from the two CSV files, the merged and cleaned table
//! written to the database, and the dataset the classifier trains on.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A row of the messages file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Join key
    pub id: i64,
    /// English message text
    pub message: String,
    /// Untranslated text, absent for messages written in English
    #[serde(default)]
    pub original: Option<String>,
    /// Source channel, when the file carries one
    #[serde(default)]
    pub genre: Option<String>,
}

/// A row of the categories file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRecord {
    /// Join key
    pub id: i64,
    /// Semicolon-joined `name-value` tokens, e.g. `related-1;request-0`
    pub categories: String,
}

/// A message joined with its category string; the join key is dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub message: String,
    pub original: Option<String>,
    pub genre: Option<String>,
    /// `None` when no category row matched the message id
    pub categories: Option<String>,
}

/// A message with one binary value per category
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CleanedRow {
    pub message: String,
    pub original: Option<String>,
    pub genre: Option<String>,
    /// Aligned with [`CleanedTable::category_names`]
    pub values: Vec<u8>,
}

/// Counts produced by [`CleanedTable::normalize`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub values_coerced: usize,
    pub duplicates_removed: usize,
}

/// The cleaned messages table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanedTable {
    /// Category column names in table order
    pub category_names: Vec<String>,
    pub rows: Vec<CleanedRow>,
}

impl CleanedTable {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Coerce every category value outside {0, 1} to 1, then drop exact duplicate
    /// rows keeping the first occurrence. Running it twice changes nothing.
    pub fn normalize(&mut self) -> NormalizeStats {
        let mut stats = NormalizeStats::default();

        for row in &mut self.rows {
            for value in &mut row.values {
                if *value > 1 {
                    *value = 1;
                    stats.values_coerced += 1;
                }
            }
        }

        let before = self.rows.len();
        let mut seen: HashSet<CleanedRow> = HashSet::with_capacity(before);
        self.rows.retain(|row| seen.insert(row.clone()));
        stats.duplicates_removed = before - self.rows.len();

        stats
    }

    /// Number of rows positive for each category, in column order
    #[must_use]
    pub fn category_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.category_names.len()];
        for row in &self.rows {
            for (count, &value) in counts.iter_mut().zip(&row.values) {
                *count += usize::from(value);
            }
        }
        counts
    }
}

/// Training input: message texts and their label rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    pub messages: Vec<String>,
    /// Row-major labels, one value per category
    pub labels: Vec<Vec<u8>>,
    pub category_names: Vec<String>,
}

impl Dataset {
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Subset of rows, in the given order
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            messages: indices.iter().map(|&i| self.messages[i].clone()).collect(),
            labels: indices.iter().map(|&i| self.labels[i].clone()).collect(),
            category_names: self.category_names.clone(),
        }
    }
}
