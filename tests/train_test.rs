use std::path::Path;
use tempfile::tempdir;

use disaster_response::config::AppConfig;
use disaster_response::ingest::save_data;
use disaster_response::models::{CleanedRow, CleanedTable};
use disaster_response::persist::load_model;
use disaster_response::train::{self, load_data, TrainOptions};
use disaster_response::PipelineError;

const CATEGORIES: [&str; 3] = ["related", "water", "shelter"];

fn row(message: &str, values: [u8; 3]) -> CleanedRow {
    CleanedRow {
        message: message.to_string(),
        original: None,
        genre: Some("direct".to_string()),
        values: values.to_vec(),
    }
}

fn corpus() -> CleanedTable {
    let water = [
        "we need clean water", "no drinking water here", "water supply is cut",
        "please send water bottles", "thirsty families need water", "water tanks are empty",
        "the water pipes broke", "bring water to the camp",
    ];
    let shelter = [
        "our house collapsed", "we need tents tonight", "families sleeping outside without shelter",
        "the roof fell in", "need a place to sleep", "homes destroyed by the storm",
        "tents for the displaced", "shelter is full",
    ];
    let other = ["hello how are you", "thanks for the update", "what time is it", "good morning"];

    let rows = water
        .iter()
        .map(|m| row(m, [1, 1, 0]))
        .chain(shelter.iter().map(|m| row(m, [1, 0, 1])))
        .chain(other.iter().map(|m| row(m, [0, 0, 0])))
        .collect();

    CleanedTable {
        category_names: CATEGORIES.iter().map(ToString::to_string).collect(),
        rows,
    }
}

fn small_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.training.n_estimators = 10;
    config.training.cv_folds = 2;
    config
}

fn seed_database(path: &Path, table: &CleanedTable) {
    save_data(table, path, "messages").expect("Failed to save data");
}

#[test]
fn test_load_data_reads_labels_in_table_order() {
    let dir = tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("DisasterResponse.db");
    seed_database(&db_path, &corpus());

    let dataset = load_data(&db_path, "messages").expect("Failed to load data");
    assert_eq!(dataset.len(), 20);
    assert_eq!(dataset.category_names, CATEGORIES);
    assert_eq!(dataset.labels[0], vec![1, 1, 0]);
    assert_eq!(dataset.messages[0], "we need clean water");
}

#[test]
fn test_load_data_missing_table() {
    let dir = tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("empty.db");

    assert!(matches!(
        load_data(&db_path, "messages"),
        Err(PipelineError::MissingTable(_))
    ));
}

#[test]
fn test_train_with_grid_search_saves_usable_model() {
    let dir = tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("DisasterResponse.db");
    let model_path = dir.path().join("classifier.bin");
    let report_path = dir.path().join("report.json");
    seed_database(&db_path, &corpus());

    let options = TrainOptions {
        no_grid_search: false,
        report_path: Some(report_path.clone()),
    };
    let outcome = train::run(&db_path, &model_path, &small_config(), &options)
        .expect("Failed to train model");

    assert_eq!(outcome.train_samples, 16);
    assert_eq!(outcome.test_samples, 4);
    assert_eq!(outcome.report.categories.len(), 3);
    let search = outcome.search.expect("Grid search should report a summary");
    assert_eq!(search.results.len(), 2);
    assert!(report_path.exists());

    let model = load_model(&model_path).expect("Failed to load model");
    assert_eq!(model.category_names, CATEGORIES);
    assert!(model.search.is_some());

    let predictions = model
        .predict(&["we need water".to_string(), "good morning".to_string()])
        .expect("Failed to predict");
    assert_eq!(predictions.len(), 2);
    assert!(predictions.iter().all(|p| p.len() == 3));
}

#[test]
fn test_saved_model_predicts_like_the_trained_one() {
    let dir = tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("DisasterResponse.db");
    let first = dir.path().join("first.bin");
    let second = dir.path().join("second.bin");
    seed_database(&db_path, &corpus());

    let options = TrainOptions {
        no_grid_search: true,
        report_path: None,
    };
    let config = small_config();
    train::run(&db_path, &first, &config, &options).expect("Failed to train model");
    train::run(&db_path, &second, &config, &options).expect("Failed to train model");

    // Same seed, same data: both runs produce the same classifier
    let samples: Vec<String> = ["water please", "our tents blew away", "hello"]
        .iter()
        .map(ToString::to_string)
        .collect();
    let a = load_model(&first).expect("Failed to load model");
    let b = load_model(&second).expect("Failed to load model");
    assert!(a.search.is_none());
    assert_eq!(
        a.predict(&samples).expect("Failed to predict"),
        b.predict(&samples).expect("Failed to predict")
    );
}

#[test]
fn test_single_row_still_produces_a_model() {
    let dir = tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("one.db");
    let model_path = dir.path().join("one.bin");
    seed_database(
        &db_path,
        &CleanedTable {
            category_names: CATEGORIES.iter().map(ToString::to_string).collect(),
            rows: vec![row("we need water", [1, 1, 0])],
        },
    );

    let outcome = train::run(&db_path, &model_path, &small_config(), &TrainOptions::default())
        .expect("Failed to train model");

    assert_eq!(outcome.train_samples, 1);
    assert_eq!(outcome.test_samples, 0);
    assert!(outcome.report.is_empty());
    assert!(outcome.search.is_none());
    assert!(model_path.exists());

    let model = load_model(&model_path).expect("Failed to load model");
    let prediction = model
        .predict(&["water".to_string()])
        .expect("Failed to predict");
    assert_eq!(prediction, vec![vec![1, 1, 0]]);
}
