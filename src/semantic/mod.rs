pub mod prompt;

use crate::config::PromptFormat;
use crate::db::source::{DataSource, RowSet};
use serde_json::Value;
use std::error::Error;
use tracing::{debug, info, warn};

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// The cached grounding bundle handed to the generator: schema, sample rows,
/// value distributions and curated hints. Built once at startup and shared
/// read-only across requests; if the underlying data changes, the context is
/// stale until restart.
#[derive(Debug, Clone)]
pub struct SemanticContext {
    pub table_name: String,
    pub schema_ddl: String,
    pub columns: Vec<ColumnInfo>,
    pub sample_csv: Option<String>,
    pub categorical_values: Vec<(String, Vec<String>)>,
    /// (column, min, max)
    pub date_ranges: Vec<(String, String, String)>,
    pub auto_query_notes: Vec<String>,
    pub hints: Vec<String>,
}

/// Introspects the source and assembles the semantic context. Schema
/// introspection failure is fatal; everything past the DDL is best-effort.
pub async fn build_context(
    source: &DataSource,
    auto_queries: &[String],
    hints: &[String],
    format: &PromptFormat,
) -> Result<SemanticContext, BoxError> {
    let table = source.table_name.clone();
    info!("Building semantic context for table '{}'", table);

    let described = source
        .execute(&format!("DESCRIBE SELECT * FROM \"{}\"", table))
        .await
        .map_err(|e| format!("schema introspection failed for table '{}': {}", table, e))?;

    let columns: Vec<ColumnInfo> = described
        .rows
        .iter()
        .map(|row| ColumnInfo {
            name: value_to_text(&row[0]),
            data_type: value_to_text(&row[1]),
        })
        .collect();

    if columns.is_empty() {
        return Err(format!("table '{}' has no columns", table).into());
    }

    let mut ddl_lines = vec![format!("CREATE TABLE {} (", table)];
    for (i, col) in columns.iter().enumerate() {
        let comma = if i < columns.len() - 1 { "," } else { "" };
        ddl_lines.push(format!("    {} {}{}", col.name, col.data_type, comma));
    }
    ddl_lines.push(");".to_string());
    ddl_lines.push(format!(
        "-- Query this table as: SELECT ... FROM {} WHERE ...",
        table
    ));
    let schema_ddl = ddl_lines.join("\n");

    let sample_csv = if format.include_sample_rows {
        match sample_rows(source, &table, format.sample_row_count).await {
            Ok(csv) => Some(csv),
            Err(e) => {
                warn!("Sample row query failed, omitting samples: {}", e);
                None
            }
        }
    } else {
        None
    };

    let categorical_values = categorical_columns(source, &table, &columns).await;
    let date_ranges = date_column_ranges(source, &table, &columns).await;

    let mut auto_query_notes = Vec::new();
    for template in auto_queries {
        let query = template.replace("{table}", &table);
        match source.execute(&query).await {
            Ok(result) => {
                let rendered = serde_json::to_string(&result.rows).unwrap_or_default();
                auto_query_notes.push(format!("{} => {}", template, rendered));
            }
            Err(e) => {
                warn!("Auto-query '{}' failed: {}", template, e);
                auto_query_notes.push(format!("{} => error: {}", template, e));
            }
        }
    }

    Ok(SemanticContext {
        table_name: table,
        schema_ddl,
        columns,
        sample_csv,
        categorical_values,
        date_ranges,
        auto_query_notes,
        hints: hints.to_vec(),
    })
}

/// Random sample rows rendered as CSV, which models read more reliably than
/// debug-printed tuples.
async fn sample_rows(source: &DataSource, table: &str, count: usize) -> Result<String, BoxError> {
    let result = source
        .execute(&format!(
            "SELECT * FROM \"{}\" ORDER BY RANDOM() LIMIT {}",
            table, count
        ))
        .await?;

    rowset_to_csv(&result)
}

fn rowset_to_csv(result: &RowSet) -> Result<String, BoxError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&result.columns)?;
    for row in &result.rows {
        writer.write_record(row.iter().map(value_to_text))?;
    }
    let bytes = writer.into_inner().map_err(|e| e.to_string())?;
    Ok(String::from_utf8(bytes)?.trim_end().to_string())
}

/// Distinct values for low-cardinality VARCHAR columns. Best-effort.
async fn categorical_columns(
    source: &DataSource,
    table: &str,
    columns: &[ColumnInfo],
) -> Vec<(String, Vec<String>)> {
    let mut out = Vec::new();
    for col in columns {
        if col.data_type != "VARCHAR" {
            continue;
        }
        let count_sql = format!("SELECT COUNT(DISTINCT \"{}\") FROM \"{}\"", col.name, table);
        let distinct = match source.execute(&count_sql).await {
            Ok(rs) => rs
                .rows
                .first()
                .and_then(|r| r.first())
                .and_then(Value::as_i64)
                .unwrap_or(0),
            Err(e) => {
                debug!("Cardinality check failed for {}: {}", col.name, e);
                continue;
            }
        };
        if distinct == 0 || distinct > 100 {
            continue;
        }
        let values_sql = format!(
            "SELECT DISTINCT \"{col}\" FROM \"{table}\" WHERE \"{col}\" IS NOT NULL ORDER BY \"{col}\" LIMIT 100",
            col = col.name,
            table = table
        );
        if let Ok(rs) = source.execute(&values_sql).await {
            let values: Vec<String> = rs
                .rows
                .iter()
                .filter_map(|r| r.first())
                .map(value_to_text)
                .collect();
            out.push((col.name.clone(), values));
        }
    }
    out
}

/// MIN/MAX for date-like columns. Best-effort.
async fn date_column_ranges(
    source: &DataSource,
    table: &str,
    columns: &[ColumnInfo],
) -> Vec<(String, String, String)> {
    let mut out = Vec::new();
    for col in columns {
        let upper_type = col.data_type.to_uppercase();
        let date_like = upper_type.contains("DATE")
            || upper_type.contains("TIMESTAMP")
            || col.name.ends_with("_date");
        if !date_like {
            continue;
        }
        let range_sql = format!(
            "SELECT MIN(\"{col}\"), MAX(\"{col}\") FROM \"{table}\"",
            col = col.name,
            table = table
        );
        match source.execute(&range_sql).await {
            Ok(rs) => {
                if let Some(row) = rs.rows.first() {
                    let min = value_to_text(&row[0]);
                    let max = value_to_text(&row[1]);
                    if !min.is_empty() && !max.is_empty() {
                        out.push((col.name.clone(), min, max));
                    }
                }
            }
            Err(e) => debug!("Date range query failed for {}: {}", col.name, e),
        }
    }
    out
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PromptFormat, SourceConfig};
    use duckdb::Connection;

    fn seeded_source(dir: &tempfile::TempDir) -> DataSource {
        let db_path = dir.path().join("sales.duckdb");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE sales (id INTEGER, region VARCHAR, sold_date DATE, amount DOUBLE);
             INSERT INTO sales VALUES
               (1, 'north', DATE '2024-01-05', 10.0),
               (2, 'south', DATE '2024-02-10', 20.0),
               (3, 'north', DATE '2024-03-15', 30.0);",
        )
        .unwrap();
        drop(conn);

        DataSource::connect(&SourceConfig {
            db_path: Some(db_path.to_string_lossy().into_owned()),
            parquet_path: None,
            table_name: None,
            max_retries: 3,
            max_result_rows: 100,
            query_timeout_secs: 30,
            pool_size: 2,
            auto_queries: vec![],
            hints: vec![],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn builds_schema_samples_and_distributions() {
        let dir = tempfile::tempdir().unwrap();
        let source = seeded_source(&dir);

        let ctx = build_context(
            &source,
            &["SELECT COUNT(*) FROM {table}".to_string()],
            &["Amounts are in GBP".to_string()],
            &PromptFormat::default(),
        )
        .await
        .unwrap();

        assert_eq!(ctx.table_name, "sales");
        assert!(ctx.schema_ddl.contains("CREATE TABLE sales ("));
        assert!(ctx.schema_ddl.contains("region VARCHAR"));

        let csv = ctx.sample_csv.unwrap();
        assert!(csv.starts_with("id,region,sold_date,amount"));
        assert_eq!(csv.lines().count(), 4);

        let (col, values) = &ctx.categorical_values[0];
        assert_eq!(col, "region");
        assert_eq!(values, &vec!["north".to_string(), "south".to_string()]);

        let (date_col, min, max) = &ctx.date_ranges[0];
        assert_eq!(date_col, "sold_date");
        assert_eq!(min, "2024-01-05");
        assert_eq!(max, "2024-03-15");

        assert_eq!(ctx.auto_query_notes.len(), 1);
        assert!(ctx.auto_query_notes[0].contains("[[3]]"));
        assert_eq!(ctx.hints, vec!["Amounts are in GBP".to_string()]);
    }

    #[tokio::test]
    async fn samples_omitted_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let source = seeded_source(&dir);

        let format = PromptFormat {
            include_sample_rows: false,
            ..PromptFormat::default()
        };
        let ctx = build_context(&source, &[], &[], &format).await.unwrap();
        assert!(ctx.sample_csv.is_none());
    }
}
