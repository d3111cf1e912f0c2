pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;

/// Failures are deliberately split so the attempt log can distinguish "the
/// model never ran" (connection/auth) from "the backend rejected the request"
/// (response). All of them consume one attempt from the retry budget.
#[derive(Debug)]
pub enum LlmError {
    Connection(String),
    Auth(String),
    Response(String),
    Config(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Connection(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::Auth(msg) => write!(f, "LLM authentication error: {}", msg),
            LlmError::Response(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::Config(msg) => write!(f, "LLM configuration error: {}", msg),
        }
    }
}

impl Error for LlmError {}

/// Raw completion text plus the backend's token accounting.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<Completion, LlmError>;
}

pub struct LlmManager {
    backend: Box<dyn CompletionBackend>,
}

impl LlmManager {
    /// Resolves the backend from a provider-qualified model string, e.g.
    /// "ollama/qwen2.5-coder:7b" or "openai/gpt-4o". A bare model name is
    /// treated as an OpenAI-compatible remote model.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let (provider, model) = match config.model.split_once('/') {
            Some((provider, model)) => (provider, model),
            None => ("openai", config.model.as_str()),
        };

        let backend: Box<dyn CompletionBackend> = match provider {
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config, model)?),
            "openai" | "remote" => Box::new(providers::remote::RemoteProvider::new(config, model)?),
            _ => {
                return Err(LlmError::Config(format!(
                    "Unsupported LLM provider: {}",
                    provider
                )));
            }
        };

        Ok(Self { backend })
    }

    pub fn with_backend(backend: Box<dyn CompletionBackend>) -> Self {
        Self { backend }
    }

    pub async fn complete(&self, prompt: &str) -> Result<Completion, LlmError> {
        self.backend.complete(prompt).await
    }
}
