use crate::config::SourceConfig;
use duckdb::types::{TimeUnit, ValueRef};
use duckdb::{AccessMode, Connection};
use r2d2::{ManageConnection, Pool};
use serde_json::Value;
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

type BoxError = Box<dyn Error + Send + Sync>;

/// How connections to the data source are established.
#[derive(Debug, Clone)]
enum SourceMode {
    /// A DuckDB database file. The question-answering sources open it
    /// read-only; the attempt-log source needs write access for inserts.
    Database { path: PathBuf, read_only: bool },
    /// An in-memory connection with a view over a parquet file, so generated
    /// SQL can reference a table name instead of a file path.
    Parquet { path: PathBuf, table: String },
}

pub struct SourceConnectionManager {
    mode: SourceMode,
}

impl ManageConnection for SourceConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        match &self.mode {
            SourceMode::Database { path, read_only } => {
                if *read_only {
                    let config =
                        duckdb::Config::default().access_mode(AccessMode::ReadOnly)?;
                    Connection::open_with_flags(path, config)
                } else {
                    Connection::open(path)
                }
            }
            SourceMode::Parquet { path, table } => {
                let conn = Connection::open_in_memory()?;
                let escaped = path.to_string_lossy().replace('\'', "''");
                conn.execute_batch(&format!(
                    "CREATE OR REPLACE VIEW \"{}\" AS SELECT * FROM read_parquet('{}')",
                    table, escaped
                ))?;
                Ok(conn)
            }
        }
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute("SELECT 1", [])?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Columns and row data from one executed statement.
#[derive(Debug, Clone)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Pooled, read-only access to one configured data source. The generated SQL
/// always references `table_name`.
#[derive(Clone)]
pub struct DataSource {
    pool: Pool<SourceConnectionManager>,
    pub table_name: String,
    timeout: Duration,
}

impl DataSource {
    pub fn connect(cfg: &SourceConfig) -> Result<Self, BoxError> {
        let configured_table = cfg
            .table_name
            .clone()
            .filter(|t| !t.trim().is_empty());

        let mode = if let Some(db_path) = &cfg.db_path {
            SourceMode::Database {
                path: PathBuf::from(db_path),
                read_only: true,
            }
        } else if let Some(parquet_path) = &cfg.parquet_path {
            SourceMode::Parquet {
                path: PathBuf::from(parquet_path),
                table: configured_table.clone().unwrap_or_else(|| "data".to_string()),
            }
        } else {
            return Err("source must specify either db_path or parquet_path".into());
        };

        let is_parquet = matches!(mode, SourceMode::Parquet { .. });
        let pool = Pool::builder()
            .max_size(cfg.pool_size)
            .build(SourceConnectionManager { mode })?;

        let table_name = match configured_table {
            Some(table) => table,
            None if is_parquet => "data".to_string(),
            None => {
                let conn = pool.get()?;
                discover_table(&conn)?
            }
        };

        Ok(Self {
            pool,
            table_name,
            timeout: Duration::from_secs(cfg.query_timeout_secs),
        })
    }

    /// Opens the attempt-log database as a queryable source. Write access is
    /// shared with the logger's connection to the same file.
    pub fn for_log_db(path: &str, query_timeout_secs: u64) -> Result<Self, BoxError> {
        let pool = Pool::builder().max_size(2).build(SourceConnectionManager {
            mode: SourceMode::Database {
                path: PathBuf::from(path),
                read_only: false,
            },
        })?;

        Ok(Self {
            pool,
            table_name: "query_log".to_string(),
            timeout: Duration::from_secs(query_timeout_secs),
        })
    }

    /// Executes one statement and collects the full result set. Errors carry
    /// the engine's message so it can be fed back into the next prompt. The
    /// timeout abandons the wait, not the statement; an in-flight statement
    /// runs to completion on its pool connection.
    pub async fn execute(&self, sql: &str) -> Result<RowSet, BoxError> {
        let pool = self.pool.clone();
        let sql = sql.to_string();

        let task = tokio::task::spawn_blocking(move || -> Result<RowSet, BoxError> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;

            // Column metadata only exists once the statement has executed.
            let columns: Vec<String> = rows
                .as_ref()
                .map(|executed| {
                    executed
                        .column_names()
                        .iter()
                        .map(|name| name.to_string())
                        .collect()
                })
                .unwrap_or_default();

            let mut data: Vec<Vec<Value>> = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    values.push(value_ref_to_json(row.get_ref(i)?));
                }
                data.push(values);
            }

            Ok(RowSet {
                columns,
                rows: data,
            })
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => {
                debug!("statement exceeded the {}s execution timeout", self.timeout.as_secs());
                Err(format!(
                    "query timed out after {} seconds",
                    self.timeout.as_secs()
                )
                .into())
            }
        }
    }
}

fn discover_table(conn: &Connection) -> Result<String, BoxError> {
    let mut stmt = conn.prepare("SHOW TABLES")?;
    let mut rows = stmt.query([])?;
    let mut tables = Vec::new();
    while let Some(row) = rows.next()? {
        tables.push(row.get::<_, String>(0)?);
    }

    match tables.len() {
        0 => Err("no tables found in database and no table_name configured".into()),
        1 => Ok(tables.remove(0)),
        _ => Err(format!(
            "multiple tables found, set table_name in config: {:?}",
            tables
        )
        .into()),
    }
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::from(i),
        ValueRef::SmallInt(i) => Value::from(i),
        ValueRef::Int(i) => Value::from(i),
        ValueRef::BigInt(i) => Value::from(i),
        ValueRef::HugeInt(i) => Value::String(i.to_string()),
        ValueRef::UTinyInt(u) => Value::from(u),
        ValueRef::USmallInt(u) => Value::from(u),
        ValueRef::UInt(u) => Value::from(u),
        ValueRef::UBigInt(u) => Value::from(u),
        ValueRef::Float(f) => serde_json::Number::from_f64(f as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Double(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Decimal(d) => Value::String(d.to_string()),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("(blob, {} bytes)", b.len())),
        ValueRef::Date32(days) => chrono::DateTime::from_timestamp(i64::from(days) * 86_400, 0)
            .map(|d| Value::String(d.date_naive().to_string()))
            .unwrap_or(Value::Null),
        ValueRef::Timestamp(unit, raw) => {
            let micros = match unit {
                TimeUnit::Second => raw.saturating_mul(1_000_000),
                TimeUnit::Millisecond => raw.saturating_mul(1_000),
                TimeUnit::Microsecond => raw,
                TimeUnit::Nanosecond => raw / 1_000,
            };
            chrono::DateTime::from_timestamp_micros(micros)
                .map(|t| Value::String(t.naive_utc().to_string()))
                .unwrap_or(Value::Null)
        }
        other => Value::String(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;

    fn source_config(db_path: &str) -> SourceConfig {
        SourceConfig {
            db_path: Some(db_path.to_string()),
            parquet_path: None,
            table_name: None,
            max_retries: 3,
            max_result_rows: 100,
            query_timeout_secs: 30,
            pool_size: 2,
            auto_queries: vec![],
            hints: vec![],
        }
    }

    fn seed_db(path: &std::path::Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE orders (id INTEGER, region VARCHAR, amount DOUBLE);
             INSERT INTO orders VALUES (1, 'north', 10.5), (2, 'south', 20.0), (3, 'north', 7.25);",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn discovers_single_table_and_executes() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("orders.duckdb");
        seed_db(&db_path);

        let source = DataSource::connect(&source_config(db_path.to_str().unwrap())).unwrap();
        assert_eq!(source.table_name, "orders");

        let result = source
            .execute("SELECT region, COUNT(*) AS n FROM orders GROUP BY region ORDER BY region")
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["region", "n"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0][0], Value::String("north".into()));
    }

    #[tokio::test]
    async fn empty_result_set_still_reports_columns() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("orders.duckdb");
        seed_db(&db_path);

        let source = DataSource::connect(&source_config(db_path.to_str().unwrap())).unwrap();
        let result = source
            .execute("SELECT id, region FROM orders WHERE id > 100")
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["id", "region"]);
        assert!(result.rows.is_empty());
    }

    #[tokio::test]
    async fn execution_error_surfaces_engine_message() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("orders.duckdb");
        seed_db(&db_path);

        let source = DataSource::connect(&source_config(db_path.to_str().unwrap())).unwrap();
        let err = source
            .execute("SELECT no_such_column FROM orders")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no_such_column"));
    }

    #[test]
    fn missing_table_name_with_no_tables_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("empty.duckdb");
        Connection::open(&db_path).unwrap();

        let err = DataSource::connect(&source_config(db_path.to_str().unwrap()))
            .err()
            .unwrap();
        assert!(err.to_string().contains("no tables found"));
    }
}
