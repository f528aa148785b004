use std::fs;
use std::path::Path;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::schema::{messages, quote_identifier};

/// SQLite storage class of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
}

impl ColumnType {
    const fn sql(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
        }
    }
}

/// A column definition for [`Database::replace_table`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Rows read back from a table, with the column names the query reported
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Position of a column by name
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Database manager for the cleaned messages table
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database file, creating its parent directory if needed
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "Opened database");
        Ok(Self { conn })
    }

    /// In-memory database, used by tests
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Drop `name` if present, recreate it with `columns` and insert `rows`, all in
    /// one transaction
    pub fn replace_table(
        &mut self,
        name: &str,
        columns: &[Column],
        rows: &[Vec<Value>],
    ) -> Result<usize> {
        if columns.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "table {name} needs at least one column"
            )));
        }
        if let Some(row) = rows.iter().find(|row| row.len() != columns.len()) {
            return Err(PipelineError::InvalidConfig(format!(
                "row has {} values for {} columns",
                row.len(),
                columns.len()
            )));
        }

        let table = quote_identifier(name);
        let column_defs = columns
            .iter()
            .map(|c| format!("{} {}", quote_identifier(&c.name), c.column_type.sql()))
            .collect::<Vec<_>>()
            .join(", ");
        let column_names = columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");

        let tx = self.conn.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;
        tx.execute(&format!("CREATE TABLE {table} ({column_defs})"), [])?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {table} ({column_names}) VALUES ({placeholders})"
            ))?;
            for row in rows {
                stmt.execute(params_from_iter(row.iter()))?;
            }
        }
        tx.commit()?;

        info!(table = name, rows = rows.len(), columns = columns.len(), "Replaced table");
        Ok(rows.len())
    }

    /// True when a table with this name exists
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
            params![name],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn require_table(&self, name: &str) -> Result<()> {
        if self.table_exists(name)? {
            Ok(())
        } else {
            Err(PipelineError::MissingTable(name.to_string()))
        }
    }

    /// Read every row; columns come from the statement in table order
    pub fn read_table(&self, name: &str) -> Result<Table> {
        self.require_table(name)?;

        let mut stmt = self.conn.prepare(&format!("SELECT * FROM {}", quote_identifier(name)))?;
        let columns: Vec<String> = stmt.column_names().iter().map(ToString::to_string).collect();
        let width = columns.len();

        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<Value>>>()
            })?
            .collect::<rusqlite::Result<Vec<Vec<Value>>>>()?;

        debug!(table = name, rows = rows.len(), columns = width, "Read table");
        Ok(Table { columns, rows })
    }

    /// Number of rows in a table
    pub fn row_count(&self, name: &str) -> Result<usize> {
        self.require_table(name)?;
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_identifier(name)),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Number of positive rows per category column, in table order
    pub fn category_prevalence(&self, name: &str) -> Result<Vec<(String, i64)>> {
        self.require_table(name)?;

        let stmt = self.conn.prepare(&format!("SELECT * FROM {} LIMIT 0", quote_identifier(name)))?;
        let categories: Vec<String> = stmt
            .column_names()
            .into_iter()
            .filter(|c| !messages::TEXT_COLUMNS.contains(c))
            .map(ToString::to_string)
            .collect();
        drop(stmt);

        categories
            .into_iter()
            .map(|category| {
                let total: Option<i64> = self.conn.query_row(
                    &format!(
                        "SELECT SUM({}) FROM {}",
                        quote_identifier(&category),
                        quote_identifier(name)
                    ),
                    [],
                    |row| row.get(0),
                )?;
                Ok((category, total.unwrap_or(0)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("message", ColumnType::Text),
            Column::new("original", ColumnType::Text),
            Column::new("genre", ColumnType::Text),
            Column::new("related", ColumnType::Integer),
            Column::new("request", ColumnType::Integer),
        ]
    }

    fn row(message: &str, related: i64, request: i64) -> Vec<Value> {
        vec![
            Value::Text(message.to_string()),
            Value::Null,
            Value::Text("direct".to_string()),
            Value::Integer(related),
            Value::Integer(request),
        ]
    }

    #[test]
    fn test_replace_and_read_table() {
        let mut db = Database::open_in_memory().expect("Failed to open database");
        db.replace_table("messages", &columns(), &[row("help", 1, 1), row("hi", 0, 0)])
            .expect("Failed to write table");

        let table = db.read_table("messages").expect("Failed to read table");
        assert_eq!(table.columns, vec!["message", "original", "genre", "related", "request"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0][3], Value::Integer(1));
        assert_eq!(table.column_index("request"), Some(4));
    }

    #[test]
    fn test_replace_drops_previous_rows() {
        let mut db = Database::open_in_memory().expect("Failed to open database");
        db.replace_table("messages", &columns(), &[row("a", 1, 0), row("b", 1, 0)])
            .expect("Failed to write table");
        db.replace_table("messages", &columns(), &[row("c", 0, 1)])
            .expect("Failed to rewrite table");

        assert_eq!(db.row_count("messages").expect("Failed to count rows"), 1);
    }

    #[test]
    fn test_missing_table() {
        let db = Database::open_in_memory().expect("Failed to open database");
        assert!(!db.table_exists("messages").expect("Failed to query schema"));
        assert!(matches!(db.read_table("messages"), Err(PipelineError::MissingTable(_))));
    }

    #[test]
    fn test_category_prevalence() {
        let mut db = Database::open_in_memory().expect("Failed to open database");
        db.replace_table("messages", &columns(), &[row("a", 1, 0), row("b", 1, 1)])
            .expect("Failed to write table");

        let prevalence = db.category_prevalence("messages").expect("Failed to compute prevalence");
        assert_eq!(
            prevalence,
            vec![("related".to_string(), 2), ("request".to_string(), 1)]
        );
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let mut db = Database::open_in_memory().expect("Failed to open database");
        let mut bad = row("a", 1, 0);
        bad.pop();
        assert!(db.replace_table("messages", &columns(), &[bad]).is_err());
    }
}
