use clap::Parser;
use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

/// One queryable data source. Either `db_path` (a DuckDB file, opened
/// read-only) or `parquet_path` (an in-memory connection with a view over the
/// parquet file) must be set.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default)]
    pub parquet_path: Option<String>,
    /// Table name the generated SQL should reference. Auto-discovered for
    /// database files containing exactly one table.
    #[serde(default)]
    pub table_name: Option<String>,
    /// Total attempt budget per question, shared by generation, sanitization
    /// and execution failures. Must be >= 1.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Hard cap on rows returned to the caller.
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: usize,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Read-only aggregate/metadata queries run once at startup; `{table}` is
    /// replaced with the resolved table name.
    #[serde(default)]
    pub auto_queries: Vec<String>,
    /// Manually curated free-text hints included in every prompt.
    #[serde(default)]
    pub hints: Vec<String>,
}

/// Section ordering for the assembled prompt. The question always comes last;
/// different backends are sensitive to the order of the grounding sections.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptStructure {
    #[default]
    SchemaSamplesHints,
    SchemaHintsSamples,
    HintsSchemaSamples,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HintStyle {
    /// Render hints as `-- ...` SQL comments.
    #[default]
    SqlComment,
    Plain,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptFormat {
    #[serde(default)]
    pub structure: PromptStructure,
    #[serde(default = "default_true")]
    pub include_sample_rows: bool,
    #[serde(default = "default_sample_row_count")]
    pub sample_row_count: usize,
    #[serde(default)]
    pub hint_style: HintStyle,
    /// Forced prefix the model continues from, e.g. "SELECT". Empty disables
    /// response priming.
    #[serde(default = "default_response_prefix")]
    pub response_prefix: String,
}

impl Default for PromptFormat {
    fn default() -> Self {
        Self {
            structure: PromptStructure::default(),
            include_sample_rows: true,
            sample_row_count: default_sample_row_count(),
            hint_style: HintStyle::default(),
            response_prefix: default_response_prefix(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// Provider-qualified model string, e.g. "ollama/qwen2.5-coder:7b" or
    /// "openai/gpt-4o".
    pub model: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Falls back to OPENAI_API_KEY / LLM_API_KEY in the environment.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub prompt_format: PromptFormat,
}

/// Attempt-log database. Also exposed as a second queryable source so the
/// query history can be asked about in natural language.
#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub db_path: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub hints: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub web: WebConfig,
    pub source: SourceConfig,
    pub llm: LlmConfig,
    pub log: LogConfig,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder();

        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/nlq-bridge/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }

        config.validate()?;
        Ok(config)
    }

    /// Rejects invalid configuration at startup rather than at prompt-build
    /// or query time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.db_path.is_none() && self.source.parquet_path.is_none() {
            return Err(ConfigError::Message(
                "source must specify either db_path or parquet_path".into(),
            ));
        }
        if self.source.max_retries == 0 || self.log.max_retries == 0 {
            return Err(ConfigError::Message("max_retries must be >= 1".into()));
        }
        if self.source.max_result_rows == 0 {
            return Err(ConfigError::Message("max_result_rows must be >= 1".into()));
        }
        if self.llm.prompt_format.include_sample_rows
            && self.llm.prompt_format.sample_row_count == 0
        {
            return Err(ConfigError::Message(
                "sample_row_count must be >= 1 when include_sample_rows is set".into(),
            ));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Message("llm.model must not be empty".into()));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_result_rows() -> usize {
    100
}

fn default_query_timeout_secs() -> u64 {
    30
}

fn default_pool_size() -> u32 {
    4
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_sample_row_count() -> usize {
    8
}

fn default_response_prefix() -> String {
    "SELECT".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            web: WebConfig {
                host: "127.0.0.1".into(),
                port: 3000,
            },
            source: SourceConfig {
                db_path: Some("data.duckdb".into()),
                parquet_path: None,
                table_name: None,
                max_retries: 3,
                max_result_rows: 100,
                query_timeout_secs: 30,
                pool_size: 4,
                auto_queries: vec![],
                hints: vec![],
            },
            llm: LlmConfig {
                model: "ollama/qwen2.5-coder:7b".into(),
                endpoint: None,
                api_key: None,
                request_timeout_secs: 60,
                prompt_format: PromptFormat::default(),
            },
            log: LogConfig {
                db_path: "query_log.duckdb".into(),
                max_retries: 3,
                hints: vec![],
            },
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn missing_source_path_rejected() {
        let mut cfg = base_config();
        cfg.source.db_path = None;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_retry_budget_rejected() {
        let mut cfg = base_config();
        cfg.source.max_retries = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn prompt_structure_parses_from_snake_case() {
        let s: PromptStructure = serde_json::from_str("\"hints_schema_samples\"").unwrap();
        assert_eq!(s, PromptStructure::HintsSchemaSamples);
        assert!(serde_json::from_str::<PromptStructure>("\"question_first\"").is_err());
    }
}
