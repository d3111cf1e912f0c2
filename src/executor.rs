use crate::config::PromptFormat;
use crate::db::logger::{AttemptLogger, AttemptRecord};
use crate::db::source::{DataSource, RowSet};
use crate::llm::{LlmError, LlmManager};
use crate::sanitize::{SanitizeError, SanitizeOptions, sanitize};
use crate::semantic::SemanticContext;
use crate::semantic::prompt::{AttemptFailure, build_prompt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// The retriable failure kinds. All three share the one per-request budget;
/// the error text stays distinct so the attempt log can tell them apart.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("generation failed: {0}")]
    Generation(#[from] LlmError),
    #[error("sanitization failed: {0}")]
    Sanitization(#[from] SanitizeError),
    #[error("execution failed: {0}")]
    Execution(String),
}

#[derive(Debug, Serialize)]
pub struct Diagnostics {
    /// The final statement sent to the data source.
    pub sql: String,
    pub retry_count: u32,
    /// Every failed attempt, in order.
    pub errors: Vec<AttemptFailure>,
    /// Token counts summed across all attempts of this request.
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Set when the row cap dropped rows the data source produced.
    pub truncated: bool,
}

/// The single terminal value of one request. Failures of kinds (b)-(e) in the
/// error taxonomy all resolve into this; only configuration errors escape as
/// process-level errors.
#[derive(Debug, Serialize)]
pub struct QueryResult {
    pub success: bool,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: u64,
    pub diagnostics: Diagnostics,
}

/// Orchestrates the attempt loop for one configured source:
/// generate -> sanitize -> execute, feeding each failure back into the next
/// prompt, bounded by the per-source attempt budget.
pub struct QueryPipeline {
    source: DataSource,
    llm: Arc<LlmManager>,
    logger: AttemptLogger,
    context: Arc<SemanticContext>,
    format: PromptFormat,
    sanitize_options: SanitizeOptions,
    max_retries: u32,
    max_result_rows: usize,
}

impl QueryPipeline {
    pub fn new(
        source: DataSource,
        llm: Arc<LlmManager>,
        logger: AttemptLogger,
        context: Arc<SemanticContext>,
        format: PromptFormat,
        max_retries: u32,
        max_result_rows: usize,
    ) -> Self {
        let sanitize_options = SanitizeOptions::new(&format.response_prefix);
        Self {
            source,
            llm,
            logger,
            context,
            format,
            sanitize_options,
            // A zero budget would underflow the exhaustion retry_count.
            max_retries: max_retries.max(1),
            max_result_rows,
        }
    }

    pub fn table_name(&self) -> &str {
        &self.source.table_name
    }

    /// Runs one request to its single terminal result. Retries are strictly
    /// serial: each attempt's prompt depends on the previous attempt's error.
    pub async fn run(&self, question: &str, client: &str) -> QueryResult {
        let request_id = Uuid::new_v4().to_string();
        let mut failures: Vec<AttemptFailure> = Vec::new();
        let mut total_input_tokens = 0u64;
        let mut total_output_tokens = 0u64;
        let mut last_sql = String::new();

        info!(request_id = %request_id, "NL query: {}", question);

        for attempt_number in 1..=self.max_retries {
            let prompt = build_prompt(&self.context, question, &failures, &self.format);

            // Each attempt runs as its own task: if the caller goes away
            // mid-attempt, the attempt still completes and is logged, and the
            // loop stops between attempts when this future is dropped.
            let handle = self.spawn_attempt(
                prompt,
                request_id.clone(),
                attempt_number,
                client.to_string(),
                question.to_string(),
            );
            let (sql, input_tokens, output_tokens, outcome) = match handle.await {
                Ok(attempt) => attempt,
                Err(e) => (
                    String::new(),
                    0,
                    0,
                    Err(AttemptError::Execution(format!("attempt task failed: {}", e))),
                ),
            };
            total_input_tokens += input_tokens;
            total_output_tokens += output_tokens;
            if !sql.is_empty() {
                last_sql = sql.clone();
            }

            match outcome {
                Ok(result) => {
                    let row_count = result.rows.len() as u64;
                    let mut rows = result.rows;
                    let truncated = rows.len() > self.max_result_rows;
                    if truncated {
                        info!(
                            "Capping response at {} of {} rows",
                            self.max_result_rows, row_count
                        );
                        rows.truncate(self.max_result_rows);
                    }

                    return QueryResult {
                        success: true,
                        columns: result.columns,
                        rows,
                        row_count,
                        diagnostics: Diagnostics {
                            sql,
                            retry_count: attempt_number - 1,
                            errors: failures,
                            input_tokens: total_input_tokens,
                            output_tokens: total_output_tokens,
                            truncated,
                        },
                    };
                }
                Err(error) => {
                    let message = error.to_string();
                    warn!(
                        "Attempt {}/{} failed: {}",
                        attempt_number, self.max_retries, message
                    );
                    failures.push(AttemptFailure {
                        sql,
                        error: message,
                    });
                }
            }
        }

        warn!(request_id = %request_id, "Retry budget exhausted after {} attempts", self.max_retries);
        QueryResult {
            success: false,
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            diagnostics: Diagnostics {
                sql: last_sql,
                retry_count: self.max_retries - 1,
                errors: failures,
                input_tokens: total_input_tokens,
                output_tokens: total_output_tokens,
                truncated: false,
            },
        }
    }

    /// Detaches one attempt onto its own task. The record is persisted inside
    /// the task, so an attempt that outlives its caller is still logged.
    fn spawn_attempt(
        &self,
        prompt: String,
        request_id: String,
        attempt_number: u32,
        client: String,
        nlq: String,
    ) -> JoinHandle<(String, u64, u64, Result<RowSet, AttemptError>)> {
        let llm = Arc::clone(&self.llm);
        let source = self.source.clone();
        let options = self.sanitize_options.clone();
        let logger = self.logger.clone();

        tokio::spawn(async move {
            let (sql, input_tokens, output_tokens, execution_time_ms, outcome) =
                run_attempt(&llm, &source, &options, &prompt).await;

            let record = AttemptRecord {
                request_id,
                attempt_number,
                client,
                nlq,
                sql: sql.clone(),
                success: outcome.is_ok(),
                error_message: outcome.as_ref().err().map(|e| e.to_string()),
                row_count: outcome.as_ref().ok().map(|r| r.rows.len() as u64),
                execution_time_ms,
                input_tokens,
                output_tokens,
            };
            if let Err(e) = logger.log(record).await {
                warn!("Failed to persist attempt record: {}", e);
            }

            (sql, input_tokens, output_tokens, outcome)
        })
    }
}

/// One generate-sanitize-execute cycle. Returns the statement text that
/// should be logged for the attempt (the raw reply when sanitization fails,
/// empty when generation itself failed), token counts, and the statement
/// execution time. The timing covers only the data-source call, never
/// generation latency; attempts that never reach execution log zero.
async fn run_attempt(
    llm: &LlmManager,
    source: &DataSource,
    options: &SanitizeOptions,
    prompt: &str,
) -> (String, u64, u64, u64, Result<RowSet, AttemptError>) {
    let completion = match llm.complete(prompt).await {
        Ok(completion) => completion,
        Err(e) => return (String::new(), 0, 0, 0, Err(AttemptError::Generation(e))),
    };
    let (input_tokens, output_tokens) = (completion.input_tokens, completion.output_tokens);

    let sql = match sanitize(&completion.text, options) {
        Ok(sql) => sql,
        Err(e) => {
            return (
                completion.text.trim().to_string(),
                input_tokens,
                output_tokens,
                0,
                Err(AttemptError::Sanitization(e)),
            );
        }
    };

    let started = Instant::now();
    let outcome = source.execute(&sql).await;
    let execution_time_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(result) => (sql, input_tokens, output_tokens, execution_time_ms, Ok(result)),
        Err(e) => {
            let message = e.to_string();
            (
                sql,
                input_tokens,
                output_tokens,
                execution_time_ms,
                Err(AttemptError::Execution(message)),
            )
        }
    }
}
