use chrono::Utc;
use duckdb::{Connection, params};
use std::error::Error;
use std::sync::{Arc, Mutex};

type BoxError = Box<dyn Error + Send + Sync>;

/// One generate-sanitize-execute cycle. Rows are append-only; nothing ever
/// updates or deletes them.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub request_id: String,
    pub attempt_number: u32,
    pub client: String,
    pub nlq: String,
    pub sql: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub row_count: Option<u64>,
    pub execution_time_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Serialized append path to the `query_log` table: a single write connection
/// behind a mutex, shared by all concurrent requests.
#[derive(Clone)]
pub struct AttemptLogger {
    conn: Arc<Mutex<Connection>>,
}

impl AttemptLogger {
    pub fn open(path: &str) -> Result<Self, BoxError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS query_log (
                request_id VARCHAR,
                attempt_number INTEGER,
                timestamp TIMESTAMP,
                client VARCHAR,
                nlq VARCHAR,
                sql VARCHAR,
                success BOOLEAN,
                error_message VARCHAR,
                row_count INTEGER,
                execution_time_ms INTEGER,
                input_tokens INTEGER,
                output_tokens INTEGER
            )",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Writes one attempt row. Callers await this before taking the next
    /// retry-loop transition, so a crash never loses more than the in-flight
    /// attempt.
    pub async fn log(&self, record: AttemptRecord) -> Result<(), BoxError> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || -> Result<(), BoxError> {
            let conn = conn.lock().map_err(|_| "attempt log connection poisoned")?;
            conn.execute(
                "INSERT INTO query_log (
                    request_id, attempt_number, timestamp, client, nlq, sql,
                    success, error_message, row_count, execution_time_ms,
                    input_tokens, output_tokens
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    record.request_id,
                    record.attempt_number as i64,
                    Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
                    record.client,
                    record.nlq,
                    record.sql,
                    record.success,
                    record.error_message,
                    record.row_count.map(|n| n as i64),
                    record.execution_time_ms as i64,
                    record.input_tokens as i64,
                    record.output_tokens as i64,
                ],
            )?;
            Ok(())
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(attempt_number: u32, success: bool) -> AttemptRecord {
        AttemptRecord {
            request_id: "req-1".into(),
            attempt_number,
            client: "test".into(),
            nlq: "how many rows?".into(),
            sql: "SELECT COUNT(*) FROM data".into(),
            success,
            error_message: if success { None } else { Some("boom".into()) },
            row_count: if success { Some(1) } else { None },
            execution_time_ms: 12,
            input_tokens: 150,
            output_tokens: 25,
        }
    }

    #[tokio::test]
    async fn writes_one_row_per_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.duckdb");
        let logger = AttemptLogger::open(path.to_str().unwrap()).unwrap();

        logger.log(record(1, false)).await.unwrap();
        logger.log(record(2, true)).await.unwrap();

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM query_log WHERE request_id = 'req-1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(count, 2);

        let (err, rows): (Option<String>, Option<i64>) = conn
            .query_row(
                "SELECT error_message, row_count FROM query_log WHERE attempt_number = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(err.as_deref(), Some("boom"));
        assert_eq!(rows, None);
    }
}
