//! Configuration read from the environment.

use std::fmt::{self, Debug};
use std::net::SocketAddr;
use std::path::PathBuf;

use copilot_core::DEFAULT_MAX_STEPS;
use copilot_openai_model::{
    DEFAULT_BASE_URL, DEFAULT_MODEL, OpenAIConfig, OpenAIConfigBuilder,
};

/// The address the server listens on unless configured otherwise.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8787";

/// Errors found while reading the configuration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is absent or empty.
    #[error("{0} is not set")]
    MissingRequired(&'static str),
    /// A variable is set to something unusable.
    #[error("invalid value for {name}: {reason}")]
    InvalidValue {
        /// Name of the variable.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Application configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// Key for the model provider. The server still starts without it.
    pub api_key: Option<String>,
    /// Base URL of the OpenAI-compatible endpoint.
    pub base_url: String,
    /// Model to request.
    pub model: String,
    /// Address of the HTTP server.
    pub listen_addr: SocketAddr,
    /// Where conversations are persisted, in memory only if `None`.
    pub data_dir: Option<PathBuf>,
    /// Maximum number of model requests per turn.
    pub max_steps: usize,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of
    /// a variable by name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let listen_addr = var("COPILOT_LISTEN_ADDR")
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_owned());
        let listen_addr = listen_addr.parse().map_err(|err| {
            ConfigError::InvalidValue {
                name: "COPILOT_LISTEN_ADDR",
                reason: format!("{err}"),
            }
        })?;

        let max_steps = match var("COPILOT_MAX_STEPS") {
            None => DEFAULT_MAX_STEPS,
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::InvalidValue {
                        name: "COPILOT_MAX_STEPS",
                        reason: "must be at least 1".to_owned(),
                    });
                }
                Ok(n) => n,
                Err(err) => {
                    return Err(ConfigError::InvalidValue {
                        name: "COPILOT_MAX_STEPS",
                        reason: format!("{err}"),
                    });
                }
            },
        };

        Ok(Self {
            api_key: var("OPENAI_API_KEY"),
            base_url: var("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
            model: var("OPENAI_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
            listen_addr,
            data_dir: var("COPILOT_DATA_DIR").map(PathBuf::from),
            max_steps,
        })
    }

    /// Returns the provider configuration, or an error if the API key is
    /// missing.
    pub fn provider_config(&self) -> Result<OpenAIConfig, ConfigError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ConfigError::MissingRequired("OPENAI_API_KEY"))?;
        Ok(OpenAIConfigBuilder::with_api_key(api_key)
            .with_base_url(&self.base_url)
            .with_model(&self.model)
            .build())
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("listen_addr", &self.listen_addr)
            .field("data_dir", &self.data_dir)
            .field("max_steps", &self.max_steps)
            .finish()
    }
}
