use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::executor::QueryResult;
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NlQueryRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub table: String,
}

/// Query the configured data source using natural language.
pub async fn query_data(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<NlQueryRequest>,
) -> Result<Json<QueryResult>, (StatusCode, String)> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "question must not be empty".into()));
    }

    debug!("NL query: {}", question);
    let client = client_name(&headers);
    Ok(Json(state.data_pipeline.run(question, &client).await))
}

/// Query the attempt history using natural language.
pub async fn query_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<NlQueryRequest>,
) -> Result<Json<QueryResult>, (StatusCode, String)> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "question must not be empty".into()));
    }

    debug!("NL log query: {}", question);
    let client = client_name(&headers);
    Ok(Json(state.log_pipeline.run(question, &client).await))
}

pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let uptime = chrono::Utc::now() - state.startup_time;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds(),
        table: state.data_pipeline.table_name().to_string(),
    })
}

fn client_name(headers: &HeaderMap) -> String {
    headers
        .get("x-client-name")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}
