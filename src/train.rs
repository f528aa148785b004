//! Training pipeline: load the cleaned table, split, fit, evaluate and save.

use anyhow::Context;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rusqlite::types::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db::Database;
use crate::error::{PipelineError, Result};
use crate::evaluate::{evaluate_model, EvaluationReport};
use crate::forest::RandomForest;
use crate::logging::OperationTimer;
use crate::metrics::MetricsCollector;
use crate::model::{build_model_from, Model, Pipeline};
use crate::models::Dataset;
use crate::persist::{save_model, TrainedModel};
use crate::schema::messages;
use crate::search::SearchSummary;

fn label_value(value: &Value, column: &str) -> Result<u8> {
    let invalid = || PipelineError::InvalidLabel {
        column: column.to_string(),
        value: format!("{value:?}"),
    };

    let parsed = match value {
        Value::Integer(i) => *i,
        Value::Real(r) if r.fract() == 0.0 => *r as i64,
        Value::Text(t) => t.trim().parse::<i64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    u8::try_from(parsed).map_err(|_| invalid())
}

fn message_text(value: &Value) -> String {
    match value {
        Value::Text(t) => t.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Null | Value::Blob(_) => String::new(),
    }
}

/// Read the cleaned table. Labels are every column except the text columns, in table order.
pub fn load_data(db_path: &Path, table_name: &str) -> Result<Dataset> {
    let db = Database::open(db_path)?;
    let table = db.read_table(table_name)?;

    let message_idx = table
        .column_index(messages::MESSAGE)
        .ok_or_else(|| PipelineError::MissingColumn(messages::MESSAGE.to_string()))?;
    let label_columns: Vec<(usize, String)> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(_, name)| !messages::TEXT_COLUMNS.contains(&name.as_str()))
        .map(|(idx, name)| (idx, name.clone()))
        .collect();
    if label_columns.is_empty() {
        return Err(PipelineError::EmptyDataset(format!(
            "table {table_name} has no category columns"
        )));
    }
    if table.rows.is_empty() {
        return Err(PipelineError::EmptyDataset(format!("table {table_name} has no rows")));
    }

    let mut dataset = Dataset {
        messages: Vec::with_capacity(table.rows.len()),
        labels: Vec::with_capacity(table.rows.len()),
        category_names: label_columns.iter().map(|(_, name)| name.clone()).collect(),
    };
    for row in &table.rows {
        dataset.messages.push(message_text(&row[message_idx]));
        dataset.labels.push(
            label_columns
                .iter()
                .map(|(idx, name)| label_value(&row[*idx], name))
                .collect::<Result<Vec<u8>>>()?,
        );
    }

    info!(
        rows = dataset.len(),
        categories = dataset.category_names.len(),
        "Loaded training data"
    );
    Ok(dataset)
}

/// Shuffle and split into `(train, test)`, with `ceil(n * test_size)` test rows.
///
/// When that leaves no training rows everything is used for training and the
/// test set is empty.
#[must_use]
pub fn train_test_split(
    dataset: &Dataset,
    test_size: f64,
    seed: Option<u64>,
) -> (Dataset, Dataset) {
    let n = dataset.len();
    let n_test = (n as f64 * test_size).ceil() as usize;

    if n_test >= n {
        warn!(rows = n, test_size, "Too few rows to hold out a test set, training on all rows");
        return (dataset.clone(), dataset.select(&[]));
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
    indices.shuffle(&mut rng);

    let (test, train) = indices.split_at(n_test);
    (dataset.select(train), dataset.select(test))
}

/// Command-line overrides for a training run
#[derive(Debug, Clone, Default)]
pub struct TrainOptions {
    /// Skip the hyperparameter search even when the configuration enables it
    pub no_grid_search: bool,
    /// Write the evaluation report here as JSON
    pub report_path: Option<PathBuf>,
}

/// What a training run produced
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub train_samples: usize,
    pub test_samples: usize,
    pub report: EvaluationReport,
    pub search: Option<SearchSummary>,
    pub model_bytes: u64,
}

/// Base pipeline described by the configuration
pub fn configured_pipeline(config: &AppConfig) -> anyhow::Result<Pipeline<RandomForest>> {
    let mut pipeline =
        Pipeline::new(config.nlp.tokenizer_settings()?, config.training.forest()?);
    pipeline.vect.min_df = config.training.min_df;
    pipeline.vect.max_df = config.training.max_df;
    pipeline.tfidf.use_idf = config.training.use_idf;
    Ok(pipeline)
}

/// Load, split, build, fit, evaluate and save, printing progress as it goes
#[allow(clippy::print_stdout)]
pub fn run(
    db_path: &Path,
    model_path: &Path,
    config: &AppConfig,
    options: &TrainOptions,
) -> anyhow::Result<TrainOutcome> {
    let metrics = MetricsCollector::default();
    let table_name = config.database.table_name.as_str();

    println!("Loading data...\n    DATABASE: {}", db_path.display());
    let dataset = load_data(db_path, table_name)
        .with_context(|| format!("Failed to load table {table_name} from {}", db_path.display()))?;
    let (train, test) = train_test_split(&dataset, config.training.test_size, config.training.seed);
    info!(train = train.len(), test = test.len(), "Split dataset");

    println!("Building model...");
    let grid = if options.no_grid_search {
        None
    } else {
        config.training.param_grid()?
    };
    let mut model = build_model_from(configured_pipeline(config)?, grid, config.training.cv_folds)
        .context("Failed to build model")?;

    println!("Training model...");
    let timer = OperationTimer::new("train_model");
    model
        .fit(&train.messages, &train.labels)
        .context("Failed to train model")?;
    metrics.record_training(
        train.len(),
        timer.elapsed(),
        matches!(model, Model::GridSearch(_)),
    );
    timer.finish();

    println!("Evaluating model...");
    let report = evaluate_model(&model, &test.messages, &test.labels, &dataset.category_names)
        .context("Failed to evaluate model")?;

    let search = match &model {
        Model::GridSearch(search) => search.summary(),
        Model::Pipeline(_) => None,
    };
    let trained = TrainedModel::new(
        dataset.category_names.clone(),
        model.into_pipeline()?,
        search.clone(),
    );

    println!("Saving model...\n    MODEL: {}", model_path.display());
    let model_bytes = save_model(&trained, model_path, config.model.compression_level)
        .with_context(|| format!("Failed to save model to {}", model_path.display()))?;
    metrics.record_model_saved(model_bytes);

    if let Some(report_path) = &options.report_path {
        report
            .write_json(report_path)
            .with_context(|| format!("Failed to write report to {}", report_path.display()))?;
        info!(path = %report_path.display(), "Wrote evaluation report");
    }

    println!("Trained model saved!");
    Ok(TrainOutcome {
        train_samples: train.len(),
        test_samples: test.len(),
        report,
        search,
        model_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> Dataset {
        Dataset {
            messages: (0..n).map(|i| format!("message {i}")).collect(),
            labels: (0..n).map(|i| vec![u8::from(i % 2 == 0)]).collect(),
            category_names: vec!["related".to_string()],
        }
    }

    #[test]
    fn test_split_sizes() {
        let (train, test) = train_test_split(&dataset(10), 0.2, Some(42));
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);

        let (train, test) = train_test_split(&dataset(11), 0.2, Some(42));
        assert_eq!(test.len(), 3);
        assert_eq!(train.len(), 8);
    }

    #[test]
    fn test_split_is_a_partition() {
        let data = dataset(20);
        let (train, test) = train_test_split(&data, 0.25, Some(7));
        let mut all: Vec<String> = train.messages.iter().chain(&test.messages).cloned().collect();
        all.sort();
        let mut expected = data.messages.clone();
        expected.sort();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_split_is_reproducible_with_seed() {
        let data = dataset(30);
        let (a, _) = train_test_split(&data, 0.2, Some(5));
        let (b, _) = train_test_split(&data, 0.2, Some(5));
        assert_eq!(a.messages, b.messages);
    }

    #[test]
    fn test_single_row_trains_on_everything() {
        let (train, test) = train_test_split(&dataset(1), 0.2, Some(1));
        assert_eq!(train.len(), 1);
        assert!(test.is_empty());
    }

    #[test]
    fn test_label_value_parsing() {
        assert_eq!(label_value(&Value::Integer(1), "related").expect("Failed to parse"), 1);
        assert_eq!(
            label_value(&Value::Text("0".to_string()), "related").expect("Failed to parse"),
            0
        );
        assert!(label_value(&Value::Null, "related").is_err());
        assert!(label_value(&Value::Integer(-1), "related").is_err());
    }
}
