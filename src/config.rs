use crate::utils::date::parse_timezone;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_NODE_NAME: &str = "tradingagents-gateway";
const DEFAULT_PORT: u16 = 8787;
const DEFAULT_PROGRAM: &str = "tradingagents-bridge";
const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_QUOTE_URL: &str = "https://query1.finance.yahoo.com/v7/finance/quote";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("unknown timezone {0:?}")]
    InvalidTimezone(String),

    #[error("{0} must be set for the llm engine")]
    Missing(&'static str),
}

// Bridge program wrapped by the command engine
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

// OpenAI-compatible chat completions plus a quote endpoint for context
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_quote_url")]
    pub quote_url: String,
}

impl LlmConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: default_api_base(),
            model: default_model(),
            temperature: default_temperature(),
            quote_url: default_quote_url(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EngineConfig {
    Command(CommandConfig),
    Llm(LlmConfig),
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::Command(CommandConfig::default())
    }
}

fn default_program() -> String {
    DEFAULT_PROGRAM.to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_quote_url() -> String {
    DEFAULT_QUOTE_URL.to_string()
}

// YAML-serializable configuration structure
#[derive(Serialize, Deserialize, Debug)]
pub struct ConfigYaml {
    pub node_name: Option<String>,
    pub environment: Option<String>,
    pub port: Option<u16>,
    pub engine_timeout_secs: Option<u64>,
    pub as_of_timezone: Option<String>,
    #[serde(default)]
    pub engine: EngineConfig,
}

// Holds application-wide settings
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub node_name: String,
    pub environment: String,
    pub port: u16,
    pub engine_timeout: Option<Duration>,
    pub as_of_timezone: Option<Tz>,
    pub engine: EngineConfig,
}

impl AppConfig {
    // Load configuration from YAML file or environment variables
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            Self::from_yaml(&config_file)
        } else {
            Self::from_env()
        }
    }

    pub fn from_yaml(file_path: &str) -> Result<Self, ConfigError> {
        let yaml_content = fs::read_to_string(file_path).map_err(|source| ConfigError::Read {
            path: file_path.to_string(),
            source,
        })?;
        Self::from_yaml_str(&yaml_content, |key| env::var(key).ok())
    }

    /// `lookup` supplies secrets the file leaves out (currently `OPENAI_API_KEY`).
    pub fn from_yaml_str(
        yaml_content: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let yaml_config: ConfigYaml = serde_yaml::from_str(yaml_content)?;

        let mut engine = yaml_config.engine;
        if let EngineConfig::Llm(llm) = &mut engine {
            if llm.api_key.is_empty() {
                llm.api_key = lookup("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;
            }
        }

        Ok(Self {
            node_name: yaml_config.node_name.unwrap_or_else(|| DEFAULT_NODE_NAME.to_string()),
            environment: yaml_config.environment.unwrap_or_else(|| "development".to_string()),
            port: yaml_config.port.unwrap_or(DEFAULT_PORT),
            engine_timeout: yaml_config.engine_timeout_secs.map(Duration::from_secs),
            as_of_timezone: yaml_config.as_of_timezone.as_deref().map(timezone).transpose()?,
            engine,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let engine = match var("ENGINE_KIND").as_deref() {
            None | Some("command") => EngineConfig::Command(CommandConfig {
                program: var("ENGINE_PROGRAM").unwrap_or_else(default_program),
                args: var("ENGINE_ARGS")
                    .map(|args| args.split_whitespace().map(String::from).collect())
                    .unwrap_or_default(),
                env: BTreeMap::new(),
            }),
            Some("llm") => EngineConfig::Llm(LlmConfig {
                api_key: var("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?,
                api_base: var("OPENAI_API_BASE").unwrap_or_else(default_api_base),
                model: var("OPENAI_MODEL").unwrap_or_else(default_model),
                temperature: parse_var("OPENAI_TEMPERATURE", var("OPENAI_TEMPERATURE"))?
                    .unwrap_or(DEFAULT_TEMPERATURE),
                quote_url: var("QUOTE_URL").unwrap_or_else(default_quote_url),
            }),
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "ENGINE_KIND",
                    value: other.to_string(),
                });
            }
        };

        Ok(Self {
            node_name: var("NODE_NAME").unwrap_or_else(|| DEFAULT_NODE_NAME.to_string()),
            environment: var("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            port: parse_var("PORT", var("PORT"))?.unwrap_or(DEFAULT_PORT),
            engine_timeout: parse_var::<u64>("ENGINE_TIMEOUT_SECS", var("ENGINE_TIMEOUT_SECS"))?
                .map(Duration::from_secs),
            as_of_timezone: var("AS_OF_TIMEZONE").as_deref().map(timezone).transpose()?,
            engine,
        })
    }
}

impl AppConfig {
    pub fn engine_kind(&self) -> &'static str {
        match self.engine {
            EngineConfig::Command(_) => "command",
            EngineConfig::Llm(_) => "llm",
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    key: &'static str,
    value: Option<String>,
) -> Result<Option<T>, ConfigError> {
    value
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue { key, value: raw.clone() })
        })
        .transpose()
}

fn timezone(name: &str) -> Result<Tz, ConfigError> {
    parse_timezone(name).ok_or_else(|| ConfigError::InvalidTimezone(name.to_string()))
}
