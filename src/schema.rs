//! Database schema definitions
//!
//! Constants for the table and column names shared by ingestion and training.
//! Category columns are dynamic: one `INTEGER` column per category, named by the
//! category, following the text columns.

/// Cleaned messages table schema
pub mod messages {
    /// Table name
    pub const TABLE: &str = "messages";
    /// Join key in the source files; not stored
    pub const ID: &str = "id";
    /// English message text column
    pub const MESSAGE: &str = "message";
    /// Untranslated message text column
    pub const ORIGINAL: &str = "original";
    /// Source channel column (direct, news, social)
    pub const GENRE: &str = "genre";
    /// Semicolon-joined category string in the categories file
    pub const CATEGORIES: &str = "categories";

    /// Columns preceding the category columns, in table order
    pub const TEXT_COLUMNS: [&str; 3] = [MESSAGE, ORIGINAL, GENRE];
}

/// Quote an identifier for use in SQL
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
