//! Adapters for the external analysis engine.
//!
//! The engine is opaque: it is built fresh for every request through an
//! [`EngineFactory`] and exposes a single [`AnalysisEngine::propagate`] call
//! returning the analysis state plus an auxiliary signal.

pub mod command;
pub mod llm;

use crate::config::EngineConfig;
use crate::data_structures::AnalysisState;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use command::CommandEngineFactory;
pub use llm::LlmEngineFactory;

/// Auxiliary engine output (e.g. a processed trade signal). Logged, never returned to clients.
pub type Signal = Option<String>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine configuration error: {0}")]
    Config(String),

    #[error("failed to start engine process `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine process i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine process exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },

    #[error("engine wrote more than {limit} bytes to stdout")]
    OutputTooLarge { limit: usize },

    #[error("engine output could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream responded with {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("engine did not finish within {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn propagate(
        &self,
        symbol: &str,
        as_of: NaiveDate,
    ) -> Result<(AnalysisState, Signal), EngineError>;
}

pub trait EngineFactory: Send + Sync {
    fn create(&self, debug: bool) -> Result<Box<dyn AnalysisEngine>, EngineError>;
}

pub type SharedEngineFactory = Arc<dyn EngineFactory>;

pub fn factory_from_config(config: &EngineConfig) -> Result<SharedEngineFactory, EngineError> {
    let factory: SharedEngineFactory = match config {
        EngineConfig::Command(command) => Arc::new(CommandEngineFactory::new(command.clone())),
        EngineConfig::Llm(llm) => Arc::new(LlmEngineFactory::new(llm.clone())?),
    };
    Ok(factory)
}

/// Keep the last `max_chars` characters of diagnostic text.
pub(crate) fn tail(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommandConfig, LlmConfig};

    #[test]
    fn test_tail_keeps_end_of_text() {
        assert_eq!(tail("  short \n", 10), "short");
        assert_eq!(tail("Traceback ...\nKeyError: 'x'", 13), "KeyError: 'x'");
    }

    #[test]
    fn test_factory_from_config() {
        let command = EngineConfig::Command(CommandConfig::default());
        assert!(factory_from_config(&command).is_ok());

        let llm = EngineConfig::Llm(LlmConfig::with_api_key("sk-test"));
        let factory = factory_from_config(&llm).unwrap();
        assert!(factory.create(false).is_ok());
    }
}
