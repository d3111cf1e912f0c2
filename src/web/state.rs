use crate::executor::QueryPipeline;

/// Shared application state for the web server. Both pipelines hold their own
/// immutable semantic context; the attempt-log sink behind them is the only
/// shared mutable resource.
pub struct AppState {
    /// Answers questions about the configured data source.
    pub data_pipeline: QueryPipeline,
    /// Answers questions about the query history itself.
    pub log_pipeline: QueryPipeline,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}
