use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod db;
mod executor;
mod llm;
mod sanitize;
mod semantic;
mod util;
mod web;

use crate::config::{AppConfig, CliArgs};
use crate::db::logger::AttemptLogger;
use crate::db::source::DataSource;
use crate::executor::QueryPipeline;
use crate::llm::LlmManager;
use crate::semantic::build_context;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let args = CliArgs::parse();
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!("Opening attempt log at {}", config.log.db_path);
    let logger = AttemptLogger::open(&config.log.db_path)?;

    info!("Connecting to data source");
    let data_source = DataSource::connect(&config.source)?;

    // Built once; stale until restart if the underlying data changes.
    let data_context = Arc::new(
        build_context(
            &data_source,
            &config.source.auto_queries,
            &config.source.hints,
            &config.llm.prompt_format,
        )
        .await?,
    );

    info!("Initializing LLM backend for model: {}", config.llm.model);
    let llm = Arc::new(LlmManager::new(&config.llm)?);

    let data_pipeline = QueryPipeline::new(
        data_source,
        Arc::clone(&llm),
        logger.clone(),
        data_context,
        config.llm.prompt_format.clone(),
        config.source.max_retries,
        config.source.max_result_rows,
    );

    let log_source = DataSource::for_log_db(&config.log.db_path, config.source.query_timeout_secs)?;
    let log_hints = if config.log.hints.is_empty() {
        default_log_hints()
    } else {
        config.log.hints.clone()
    };
    let log_context = Arc::new(
        build_context(&log_source, &[], &log_hints, &config.llm.prompt_format).await?,
    );
    let log_pipeline = QueryPipeline::new(
        log_source,
        llm,
        logger,
        log_context,
        config.llm.prompt_format.clone(),
        config.log.max_retries,
        config.source.max_result_rows,
    );

    let app_state = Arc::new(AppState {
        data_pipeline,
        log_pipeline,
        startup_time: chrono::Utc::now(),
    });

    info!(
        "Starting nlq-bridge server on {}:{}",
        config.web.host, config.web.port
    );
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}

fn default_log_hints() -> Vec<String> {
    [
        "request_id groups all retry attempts for a single question",
        "attempt_number 1 is the initial attempt, 2 and above are retries",
        "success means the generated SQL executed without error",
        "input_tokens and output_tokens are per-attempt LLM token usage",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
