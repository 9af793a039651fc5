//! SQLite sink for extracted tables.
//!
//! Each [`ExtractedTable`] is written in its own transaction, either appended
//! to an existing table with the same columns or replacing it outright.
//! There is no cross-table atomicity: a failure leaves earlier tables
//! committed.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::NaiveDate;
use log::debug;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter, types::Value as SqlValue};
use thiserror::Error;

use crate::{
    data::{Cell, Value},
    matcher::ExtractedTable,
    registry::{SemanticType, TargetColumn},
};

pub const DEFAULT_PAGE_SIZE: u32 = 65536;
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DATASETS_TABLE: &str = "datasets";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Store file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(
        "Table '{table}' already exists without column(s) [{}]; use --replace to recreate it",
        .missing.join(", ")
    )]
    SchemaMismatch { table: String, missing: Vec<String> },
    #[error("Store {0:?} does not exist")]
    MissingStore(PathBuf),
}

/// Connection settings, passed explicitly to [`Store::open`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub page_size: u32,
    pub busy_timeout: Duration,
    pub synchronous_off: bool,
    pub journal_off: bool,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            page_size: DEFAULT_PAGE_SIZE,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            synchronous_off: true,
            journal_off: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Append,
    Replace,
}

impl WriteMode {
    pub fn from_replace_flag(replace: bool) -> Self {
        if replace {
            WriteMode::Replace
        } else {
            WriteMode::Append
        }
    }
}

/// A row of the `datasets` bookkeeping table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRecord {
    pub dataset_id: String,
    pub description: Option<String>,
    pub version: Option<String>,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let conn = Connection::open(&config.path)?;
        apply_settings(&conn, config)?;
        debug!("Opened store {:?}", config.path);
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Writes every row of `table`, returning how many were inserted. An
    /// empty table is a no-op and leaves the store untouched.
    pub fn write(&mut self, table: &ExtractedTable, mode: WriteMode) -> Result<usize, StoreError> {
        if table.is_empty() {
            return Ok(0);
        }
        let name = quote_ident(&table.name);
        let expected = table.column_names();

        let tx = self.conn.transaction()?;
        match mode {
            WriteMode::Replace => {
                tx.execute_batch(&format!("DROP TABLE IF EXISTS {name};"))?;
                tx.execute_batch(&create_table_sql(&table.name, &table.columns))?;
            }
            WriteMode::Append => {
                // Rows are inserted by column name, so an existing table may
                // order its columns differently or carry extra ones.
                let existing = columns_of(&tx, &table.name)?;
                if existing.is_empty() {
                    tx.execute_batch(&create_table_sql(&table.name, &table.columns))?;
                } else {
                    let missing = missing_columns(&existing, &expected);
                    if !missing.is_empty() {
                        return Err(StoreError::SchemaMismatch {
                            table: table.name.clone(),
                            missing,
                        });
                    }
                }
            }
        }

        let placeholders = (1..=expected.len())
            .map(|idx| format!("?{idx}"))
            .collect::<Vec<_>>()
            .join(", ");
        let column_list = expected
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        {
            let mut stmt =
                tx.prepare(&format!("INSERT INTO {name} ({column_list}) VALUES ({placeholders})"))?;
            for row in &table.rows {
                stmt.execute(params_from_iter(row.iter().map(sql_value)))?;
            }
        }
        tx.commit()?;
        debug!("Wrote {} row(s) to '{}'", table.row_count(), table.name);
        Ok(table.row_count())
    }

    pub fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Column names in declaration order; empty when the table is missing.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        columns_of(&self.conn, table)
    }

    pub fn row_count(&self, table: &str) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// One past the largest id in `id_column`, or 1 when the table is
    /// missing or empty.
    pub fn next_id(&self, table: &str, id_column: &str) -> Result<i64, StoreError> {
        if !self.table_exists(table)? {
            return Ok(1);
        }
        let next = self.conn.query_row(
            &format!(
                "SELECT COALESCE(MAX({}), 0) + 1 FROM {}",
                quote_ident(id_column),
                quote_ident(table)
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    /// Distinct non-null values of `column` rendered as text; empty when the
    /// table is missing.
    pub fn existing_keys(&self, table: &str, column: &str) -> Result<HashSet<String>, StoreError> {
        if !self.table_exists(table)? {
            return Ok(HashSet::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL",
            col = quote_ident(column),
            table = quote_ident(table)
        ))?;
        let rows = stmt.query_map([], |row| row.get::<_, SqlValue>(0))?;
        let mut keys = HashSet::new();
        for value in rows {
            if let Some(key) = sql_value_text(value?) {
                keys.insert(key);
            }
        }
        Ok(keys)
    }

    pub fn insert_dataset(&self, record: &DatasetRecord) -> Result<(), StoreError> {
        self.conn.execute(
            &format!(
                "INSERT INTO {} (dataset_id, description, version) VALUES (?1, ?2, ?3)",
                quote_ident(DATASETS_TABLE)
            ),
            params![record.dataset_id, record.description, record.version],
        )?;
        Ok(())
    }

    /// Removes a dataset and its rows from `tables`, returning the number of
    /// rows deleted. Tables that do not exist are ignored.
    pub fn delete_dataset(&mut self, dataset_id: &str, tables: &[&str]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let mut deleted = 0;
        for table in tables.iter().copied().chain([DATASETS_TABLE]) {
            if columns_of(&tx, table)?.is_empty() {
                continue;
            }
            deleted += tx.execute(
                &format!("DELETE FROM {} WHERE dataset_id = ?1", quote_ident(table)),
                params![dataset_id],
            )?;
        }
        tx.commit()?;
        debug!("Deleted {deleted} row(s) for dataset '{dataset_id}'");
        Ok(deleted)
    }
}

fn apply_settings(conn: &Connection, config: &StoreConfig) -> Result<(), StoreError> {
    conn.pragma_update(None, "page_size", config.page_size)?;
    conn.busy_timeout(config.busy_timeout)?;
    if config.synchronous_off {
        conn.pragma_update(None, "synchronous", "OFF")?;
    }
    if config.journal_off {
        // journal_mode answers with the mode it switched to.
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "OFF", |row| row.get(0))?;
    }
    Ok(())
}

/// Recreates the store at `config.path` from a SQL script, removing any
/// existing file first.
pub fn create_from_script(config: &StoreConfig, script: &Path) -> Result<Store, StoreError> {
    let sql = fs::read_to_string(script).map_err(|source| StoreError::Io {
        path: script.to_path_buf(),
        source,
    })?;
    if config.path.exists() {
        fs::remove_file(&config.path).map_err(|source| StoreError::Io {
            path: config.path.clone(),
            source,
        })?;
    }
    let store = Store::open(config)?;
    store.conn.execute_batch(&sql)?;
    Ok(store)
}

/// `<stem>_<YYYY-MM-DD>.<ext>` next to `path`.
pub fn backup_path(path: &Path, date: NaiveDate) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!("{stem}_{}.{}", date.format("%Y-%m-%d"), ext.to_string_lossy()),
        None => format!("{stem}_{}", date.format("%Y-%m-%d")),
    };
    path.with_file_name(file_name)
}

pub fn backup(path: &Path, date: NaiveDate) -> Result<PathBuf, StoreError> {
    if !path.is_file() {
        return Err(StoreError::MissingStore(path.to_path_buf()));
    }
    let target = backup_path(path, date);
    fs::copy(path, &target).map_err(|source| StoreError::Io {
        path: target.clone(),
        source,
    })?;
    Ok(target)
}

pub fn sql_type(ty: SemanticType) -> &'static str {
    match ty {
        SemanticType::Int | SemanticType::YesNo => "INTEGER",
        SemanticType::Numeric => "REAL",
        SemanticType::Categorical | SemanticType::Text | SemanticType::Date | SemanticType::Time => {
            "TEXT"
        }
    }
}

fn create_table_sql(table: &str, columns: &[TargetColumn]) -> String {
    let definitions = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), sql_type(c.semantic_type)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({definitions});", quote_ident(table))
}

fn columns_of(conn: &Connection, table: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let names = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

/// Target columns the existing table lacks. SQLite matches names
/// case-insensitively.
fn missing_columns(existing: &[String], expected: &[String]) -> Vec<String> {
    let existing: HashSet<String> = existing.iter().map(|c| c.to_lowercase()).collect();
    expected
        .iter()
        .filter(|c| !existing.contains(&c.to_lowercase()))
        .cloned()
        .collect()
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sql_value(cell: &Cell) -> SqlValue {
    match cell {
        Cell::Typed(Value::Null) => SqlValue::Null,
        Cell::Typed(Value::Text(s)) => SqlValue::Text(s.clone()),
        Cell::Typed(Value::Int(i)) => SqlValue::Integer(i64::from(*i)),
        // Through the shortest decimal text so 1.1f32 lands as 1.1, not 1.100000023841858.
        Cell::Typed(Value::Float(f)) => f
            .to_string()
            .parse::<f64>()
            .map(SqlValue::Real)
            .unwrap_or(SqlValue::Real(f64::from(*f))),
        Cell::Typed(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Cell::Uncoerced(raw) => SqlValue::Text(raw.clone()),
    }
}

fn sql_value_text(value: SqlValue) -> Option<String> {
    match value {
        SqlValue::Null => None,
        SqlValue::Integer(i) => Some(i.to_string()),
        SqlValue::Real(f) => Some(f.to_string()),
        SqlValue::Text(s) => Some(s),
        SqlValue::Blob(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
    }
}
