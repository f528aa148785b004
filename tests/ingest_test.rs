use proptest::prelude::*;
use rusqlite::types::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

use disaster_response::config::AppConfig;
use disaster_response::db::Database;
use disaster_response::ingest::{clean_data, load_data, run, save_data};
use disaster_response::models::{CleanedRow, CleanedTable, MergedRecord};
use disaster_response::persist::load_model;
use disaster_response::train::{self, TrainOptions};
use disaster_response::PipelineError;

const MESSAGES_CSV: &str = "\
id,message,original,genre
2,Weather update - a cold front from Cuba,Un front froid se retrouve sur Cuba,direct
7,Is the Hurricane over or is it not over,Cyclone nan fini osinon li pa fini,direct
8,Looking for someone but no name,,direct
8,Looking for someone but no name,,direct
12,says: west side of Haiti needs water,,news
";

const CATEGORIES_CSV: &str = "\
id,categories
2,related-1;request-0;offer-0;water-0
7,related-1;request-0;offer-0;water-0
8,related-2;request-0;offer-0;water-0
12,related-1;request-1;offer-0;water-1
";

fn write_inputs(dir: &TempDir, messages: &str, categories: &str) -> (PathBuf, PathBuf) {
    let messages_path = dir.path().join("messages.csv");
    let categories_path = dir.path().join("categories.csv");
    fs::write(&messages_path, messages).expect("Failed to write messages file");
    fs::write(&categories_path, categories).expect("Failed to write categories file");
    (messages_path, categories_path)
}

fn read_back(db_path: &Path) -> disaster_response::db::Table {
    Database::open(db_path)
        .expect("Failed to open database")
        .read_table("messages")
        .expect("Failed to read table")
}

#[test]
fn test_end_to_end_ingestion() {
    let dir = tempdir().expect("Failed to create temp dir");
    let (messages, categories) = write_inputs(&dir, MESSAGES_CSV, CATEGORIES_CSV);
    let db_path = dir.path().join("DisasterResponse.db");

    let stats = run(&messages, &categories, &db_path, "messages").expect("Failed to process data");
    assert_eq!(stats.input_rows, 5);
    assert_eq!(stats.duplicates_removed, 1);
    assert_eq!(stats.values_coerced, 2);
    assert_eq!(stats.empty_categories, 1);

    let table = read_back(&db_path);
    assert_eq!(
        table.columns,
        vec!["message", "original", "genre", "related", "request", "offer", "water"]
    );
    assert_eq!(table.rows.len(), 4);

    // related-2 is stored as 1
    let related = table.column_index("related").expect("related column");
    assert!(table.rows.iter().all(|row| row[related] == Value::Integer(1)));

    // empty original becomes NULL
    let original = table.column_index("original").expect("original column");
    assert_eq!(table.rows[2][original], Value::Null);
}

#[test]
fn test_messages_without_original_or_genre_ingest_and_train() {
    let dir = tempdir().expect("Failed to create temp dir");
    let (messages, categories) = write_inputs(
        &dir,
        "id,message\n1,help\n",
        "id,categories\n1,related-1;offer-0\n",
    );
    let db_path = dir.path().join("DisasterResponse.db");
    let model_path = dir.path().join("classifier.bin");

    let stats = run(&messages, &categories, &db_path, "messages").expect("Failed to process data");
    assert_eq!(stats.input_rows, 1);
    assert_eq!(stats.empty_categories, 1);

    let table = read_back(&db_path);
    assert_eq!(table.columns, vec!["message", "original", "genre", "related", "offer"]);
    assert_eq!(
        table.rows,
        vec![vec![
            Value::Text("help".to_string()),
            Value::Null,
            Value::Null,
            Value::Integer(1),
            Value::Integer(0),
        ]]
    );

    let mut config = AppConfig::default();
    config.training.n_estimators = 10;
    let outcome = train::run(&db_path, &model_path, &config, &TrainOptions::default())
        .expect("Failed to train model");
    assert_eq!((outcome.train_samples, outcome.test_samples), (1, 0));

    let model = load_model(&model_path).expect("Failed to load model");
    assert_eq!(model.category_names, vec!["related", "offer"]);
    assert_eq!(
        model.predict(&["help".to_string()]).expect("Failed to predict"),
        vec![vec![1, 0]]
    );
}

#[test]
fn test_rerun_replaces_table() {
    let dir = tempdir().expect("Failed to create temp dir");
    let (messages, categories) = write_inputs(&dir, MESSAGES_CSV, CATEGORIES_CSV);
    let db_path = dir.path().join("DisasterResponse.db");

    run(&messages, &categories, &db_path, "messages").expect("Failed to process data");
    run(&messages, &categories, &db_path, "messages").expect("Failed to process data again");

    assert_eq!(read_back(&db_path).rows.len(), 4);
}

#[test]
fn test_left_join_keeps_unmatched_and_repeats_matches() {
    let dir = tempdir().expect("Failed to create temp dir");
    let (messages, categories) = write_inputs(
        &dir,
        "id,message,original,genre\n1,first,,direct\n2,second,,news\n",
        "id,categories\n1,related-1\n1,related-0\n",
    );

    let merged = load_data(&messages, &categories).expect("Failed to load data");
    assert_eq!(merged.len(), 3);
    assert_eq!(merged[0].categories.as_deref(), Some("related-1"));
    assert_eq!(merged[1].categories.as_deref(), Some("related-0"));
    assert_eq!(merged[2].message, "second");
    assert_eq!(merged[2].categories, None);

    assert!(matches!(
        clean_data(merged),
        Err(PipelineError::MissingCategories { row: 2 })
    ));
}

#[test]
fn test_missing_column_is_reported() {
    let dir = tempdir().expect("Failed to create temp dir");
    let (messages, categories) = write_inputs(
        &dir,
        "id,text,original,genre\n1,first,,direct\n",
        "id,categories\n1,related-1\n",
    );

    assert!(matches!(
        load_data(&messages, &categories),
        Err(PipelineError::MissingColumn(_))
    ));
}

#[test]
fn test_save_data_uses_configured_table_name() {
    let dir = tempdir().expect("Failed to create temp dir");
    let db_path = dir.path().join("nested").join("out.db");
    let table = CleanedTable {
        category_names: vec!["related".to_string()],
        rows: vec![CleanedRow {
            message: "help".to_string(),
            original: Some("ede".to_string()),
            genre: Some("direct".to_string()),
            values: vec![1],
        }],
    };

    let written = save_data(&table, &db_path, "cleaned").expect("Failed to save data");
    assert_eq!(written, 1);

    let db = Database::open(&db_path).expect("Failed to open database");
    assert!(db.table_exists("cleaned").expect("Failed to query schema"));
    assert!(!db.table_exists("messages").expect("Failed to query schema"));
}

fn merged_records() -> impl Strategy<Value = Vec<MergedRecord>> {
    prop::collection::vec(
        (
            prop::sample::select(vec!["help", "water", "food", "shelter"]),
            prop::collection::vec(0u8..=2, 3),
        ),
        1..40,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .map(|(message, values)| {
                let categories = ["related", "request", "offer"]
                    .iter()
                    .zip(&values)
                    .map(|(name, value)| format!("{name}-{value}"))
                    .collect::<Vec<_>>()
                    .join(";");
                MergedRecord {
                    message: message.to_string(),
                    original: None,
                    genre: Some("direct".to_string()),
                    categories: Some(categories),
                }
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_cleaned_values_are_binary_and_unique(records in merged_records()) {
        let input_rows = records.len();
        let (table, stats) = clean_data(records).expect("Failed to clean data");

        prop_assert!(table.rows.iter().flat_map(|r| &r.values).all(|&v| v <= 1));
        prop_assert!(!table.is_empty());
        prop_assert!(table.len() <= input_rows);
        prop_assert_eq!(table.len() + stats.duplicates_removed, input_rows);

        let unique: HashSet<&CleanedRow> = table.rows.iter().collect();
        prop_assert_eq!(unique.len(), table.len());
    }

    #[test]
    fn prop_normalize_is_idempotent(records in merged_records()) {
        let (mut table, _) = clean_data(records).expect("Failed to clean data");
        let before = table.clone();
        let stats = table.normalize();

        prop_assert_eq!(stats.duplicates_removed, 0);
        prop_assert_eq!(stats.values_coerced, 0);
        prop_assert_eq!(table, before);
    }
}
