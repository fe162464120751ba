//! Configuration read from the environment.
//!
//! - `MISTRAL_API_KEY` - Required. Key for the model API.
//! - `MISTRAL_MODEL` - Optional. Defaults to `devstral-2512`.
//! - `MISTRAL_BASE_URL` - Optional. Defaults to `https://api.mistral.ai/v1`.
//! - `BACKEND_URL` - Optional. PR backend base. Defaults to
//!   `http://localhost:5000`.
//! - `HOST` - Optional. Defaults to `0.0.0.0`.
//! - `PORT` - Optional. Defaults to `5001`.
//! - `PROXY_URL` - Optional. The origin allowed by CORS, with credentials.
//! - `AGENT_MAX_ITERATIONS` - Optional. Defaults to `16`.
//! - `AGENT_TIMEOUT_SECS` - Optional. Defaults to `180`.
//! - `AGENT_MAX_IDENTICAL_CALLS` - Optional. Defaults to `3`, `0` disables.
//! - `MODEL_TIMEOUT_SECS` - Optional. Defaults to `90`.
//! - `TOOL_TIMEOUT_SECS` - Optional. Defaults to `30`.
//!
//! Timeouts are whole seconds between 1 and 86400.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use pr_pilot_core::AgentLimits;
use pr_pilot_openai_model::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use thiserror::Error;

const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// A missing or unparsable setting. Fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Service configuration. `Debug` output hides the API key.
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    /// Bearer key for the model API.
    pub api_key: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Base URL of the chat completions API.
    pub model_base_url: String,
    /// Base URL of the PR backend the agent tools call.
    pub backend_url: String,
    pub host: String,
    pub port: u16,
    /// The single origin allowed by CORS. `None` disables CORS.
    pub proxy_url: Option<String>,
    /// Bounds of one agent run.
    pub agent: AgentLimits,
    /// Bound on one analysis model call.
    pub model_timeout: Duration,
}

impl Config {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`. Empty values count as
    /// unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let api_key = var("MISTRAL_API_KEY").ok_or_else(|| {
            ConfigError::MissingEnvVar("MISTRAL_API_KEY".to_string())
        })?;

        let defaults = AgentLimits::default();
        let agent = AgentLimits {
            max_iterations: parse_or(
                &var,
                "AGENT_MAX_ITERATIONS",
                defaults.max_iterations,
            )?,
            timeout: secs_or(&var, "AGENT_TIMEOUT_SECS", defaults.timeout)?,
            tool_timeout: secs_or(
                &var,
                "TOOL_TIMEOUT_SECS",
                defaults.tool_timeout,
            )?,
            max_identical_calls: parse_or(
                &var,
                "AGENT_MAX_IDENTICAL_CALLS",
                defaults.max_identical_calls,
            )?,
        };
        if agent.max_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "AGENT_MAX_ITERATIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            api_key,
            model: var("MISTRAL_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            model_base_url: var("MISTRAL_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            backend_url: var("BACKEND_URL")
                .unwrap_or_else(|| "http://localhost:5000".to_string()),
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&var, "PORT", 5001)?,
            proxy_url: var("PROXY_URL"),
            agent,
            model_timeout: secs_or(
                &var,
                "MODEL_TIMEOUT_SECS",
                Duration::from_secs(90),
            )?,
        })
    }

    /// Returns the `host:port` pair to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("model_base_url", &self.model_base_url)
            .field("backend_url", &self.backend_url)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("proxy_url", &self.proxy_url)
            .field("agent", &self.agent)
            .field("model_timeout", &self.model_timeout)
            .finish()
    }
}

fn parse_or<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match var(key) {
        Some(value) => value.trim().parse().map_err(|e| {
            ConfigError::InvalidValue(key.to_string(), format!("{}", e))
        }),
        None => Ok(default),
    }
}

fn secs_or(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let secs = parse_or(var, key, default.as_secs())?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be at least 1 second".to_string(),
        ));
    }
    if secs > MAX_TIMEOUT_SECS {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be at most {MAX_TIMEOUT_SECS} seconds"),
        ));
    }
    Ok(Duration::from_secs(secs))
}
