//! Ingestion pipeline: load the two CSV files, clean them into one table of
//! binary category columns, and replace the table in SQLite.

use csv::Reader;
use rusqlite::types::Value;
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

use crate::db::{Column, ColumnType, Database};
use crate::error::{PipelineError, Result};
use crate::logging::OperationTimer;
use crate::metrics::MetricsCollector;
use crate::models::{CategoryRecord, CleanedRow, CleanedTable, MergedRecord, MessageRecord};
use crate::schema::messages;

/// Separator between category tokens
pub const CATEGORY_SEPARATOR: char = ';';

/// What cleaning did to the merged rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleaningStats {
    pub input_rows: usize,
    pub duplicates_removed: usize,
    pub values_coerced: usize,
    /// Tokens not shaped `<name>-<digit>` or whose name differs from the column name
    pub suffix_warnings: usize,
    /// Categories with no positive row after cleaning
    pub empty_categories: usize,
}

fn read_csv<T: DeserializeOwned>(path: &Path, required: &[&str]) -> Result<Vec<T>> {
    let mut reader = Reader::from_path(path)?;

    let headers = reader.headers()?.clone();
    if let Some(missing) = required.iter().find(|c| !headers.iter().any(|h| h == **c)) {
        return Err(PipelineError::MissingColumn(format!(
            "{missing} in {}",
            path.display()
        )));
    }

    reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, csv::Error>>()
        .map_err(PipelineError::from)
}

/// Read both files and left-join categories onto messages by `id`.
///
/// Every message is kept. A message matching several category rows yields one
/// merged row per match; a message without a match has no categories.
pub fn load_data(messages_path: &Path, categories_path: &Path) -> Result<Vec<MergedRecord>> {
    let message_records: Vec<MessageRecord> =
        read_csv(messages_path, &[messages::ID, messages::MESSAGE])?;
    let category_records: Vec<CategoryRecord> =
        read_csv(categories_path, &[messages::ID, messages::CATEGORIES])?;

    info!(
        messages = message_records.len(),
        categories = category_records.len(),
        "Loaded source files"
    );

    let mut by_id: HashMap<i64, Vec<String>> = HashMap::new();
    for record in category_records {
        by_id.entry(record.id).or_default().push(record.categories);
    }

    let mut merged = Vec::with_capacity(message_records.len());
    let mut unmatched = 0usize;
    for record in message_records {
        match by_id.get(&record.id) {
            Some(matches) => {
                for categories in matches {
                    merged.push(MergedRecord {
                        message: record.message.clone(),
                        original: record.original.clone(),
                        genre: record.genre.clone(),
                        categories: Some(categories.clone()),
                    });
                }
            }
            None => {
                unmatched += 1;
                merged.push(MergedRecord {
                    message: record.message,
                    original: record.original,
                    genre: record.genre,
                    categories: None,
                });
            }
        }
    }

    if unmatched > 0 {
        warn!(unmatched, "Messages without a matching categories row");
    }
    Ok(merged)
}

/// Category name of a token: everything but the last two characters
fn token_name(token: &str) -> &str {
    match token.char_indices().rev().nth(1) {
        Some((idx, _)) => &token[..idx],
        None => "",
    }
}

/// True for tokens ending in `-<digit>`
fn has_expected_suffix(token: &str) -> bool {
    let mut tail = token.chars().rev();
    matches!(
        (tail.next(), tail.next()),
        (Some(last), Some('-')) if last.is_ascii_digit()
    )
}

fn token_value(token: &str, row: usize) -> Result<u8> {
    token
        .chars()
        .last()
        .and_then(|c| c.to_digit(10))
        .and_then(|d| u8::try_from(d).ok())
        .ok_or_else(|| PipelineError::InvalidCategoryValue {
            row,
            token: token.to_string(),
        })
}

/// Expand category strings into binary columns and drop duplicate rows.
///
/// Column names come from the first row's tokens with their two-character
/// suffix removed. Values are the last character of each token; values above 1
/// become 1.
pub fn clean_data(records: Vec<MergedRecord>) -> Result<(CleanedTable, CleaningStats)> {
    let first = records
        .first()
        .ok_or_else(|| PipelineError::EmptyDataset("no merged rows to clean".to_string()))?;
    let header = first
        .categories
        .as_deref()
        .ok_or(PipelineError::MissingCategories { row: 0 })?;
    let category_names: Vec<String> = header
        .split(CATEGORY_SEPARATOR)
        .map(|token| token_name(token).to_string())
        .collect();

    let mut stats = CleaningStats {
        input_rows: records.len(),
        ..CleaningStats::default()
    };
    let mut warned_columns: HashSet<usize> = HashSet::new();
    let mut rows = Vec::with_capacity(records.len());

    for (row_idx, record) in records.into_iter().enumerate() {
        let categories = record
            .categories
            .ok_or(PipelineError::MissingCategories { row: row_idx })?;
        let tokens: Vec<&str> = categories.split(CATEGORY_SEPARATOR).collect();
        if tokens.len() != category_names.len() {
            return Err(PipelineError::CategoryCountMismatch {
                row: row_idx,
                expected: category_names.len(),
                found: tokens.len(),
            });
        }

        let mut values = Vec::with_capacity(tokens.len());
        for (column, token) in tokens.iter().enumerate() {
            if !has_expected_suffix(token) || token_name(token) != category_names[column] {
                stats.suffix_warnings += 1;
                if warned_columns.insert(column) {
                    warn!(
                        row = row_idx,
                        column = %category_names[column],
                        token = %token,
                        "Category token does not match the name-digit layout; using its position"
                    );
                }
            }
            values.push(token_value(token, row_idx)?);
        }

        rows.push(CleanedRow {
            message: record.message,
            original: record.original,
            genre: record.genre,
            values,
        });
    }

    let mut table = CleanedTable { category_names, rows };
    let normalized = table.normalize();
    stats.values_coerced = normalized.values_coerced;
    stats.duplicates_removed = normalized.duplicates_removed;

    for (name, positives) in table.category_names.iter().zip(table.category_counts()) {
        if positives == 0 {
            stats.empty_categories += 1;
            warn!(category = %name, "Category has no positive rows");
        }
    }

    info!(
        input_rows = stats.input_rows,
        output_rows = table.len(),
        categories = table.category_names.len(),
        duplicates_removed = stats.duplicates_removed,
        values_coerced = stats.values_coerced,
        suffix_warnings = stats.suffix_warnings,
        empty_categories = stats.empty_categories,
        "Cleaned data"
    );
    Ok((table, stats))
}

fn text_value(text: &str) -> Value {
    Value::Text(text.to_string())
}

/// Replace `table_name` in the database at `db_path` with the cleaned table
pub fn save_data(table: &CleanedTable, db_path: &Path, table_name: &str) -> Result<usize> {
    let columns: Vec<Column> = messages::TEXT_COLUMNS
        .iter()
        .map(|name| Column::new(*name, ColumnType::Text))
        .chain(
            table
                .category_names
                .iter()
                .map(|name| Column::new(name.as_str(), ColumnType::Integer)),
        )
        .collect();

    let rows: Vec<Vec<Value>> = table
        .rows
        .iter()
        .map(|row| {
            let mut values = vec![
                text_value(&row.message),
                row.original.as_deref().map_or(Value::Null, text_value),
                row.genre.as_deref().map_or(Value::Null, text_value),
            ];
            values.extend(row.values.iter().map(|&v| Value::Integer(i64::from(v))));
            values
        })
        .collect();

    let mut db = Database::open(db_path)?;
    db.replace_table(table_name, &columns, &rows)
}

/// Load, clean and save, printing progress the way the command line reports it
#[allow(clippy::print_stdout)]
pub fn run(
    messages_path: &Path,
    categories_path: &Path,
    db_path: &Path,
    table_name: &str,
) -> Result<CleaningStats> {
    let timer = OperationTimer::new("process_data");
    let metrics = MetricsCollector::default();

    println!(
        "Loading data...\n    MESSAGES: {}\n    CATEGORIES: {}",
        messages_path.display(),
        categories_path.display()
    );
    let merged = load_data(messages_path, categories_path)?;

    println!("Cleaning data...");
    let (table, stats) = clean_data(merged)?;
    metrics.record_cleaning(&stats);

    println!("Saving data...\n    DATABASE: {}", db_path.display());
    let written = save_data(&table, db_path, table_name).map_err(|e| {
        metrics.record_error("database", "save_data");
        e
    })?;
    metrics.record_rows_written(written, table_name);

    println!("Cleaned data saved to database!");
    timer.finish();
    Ok(stats)
}
