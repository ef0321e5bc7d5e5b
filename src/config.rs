//! Service configuration.
//!
//! Values come from the process environment (a `.env` file is loaded first by
//! `main`). Required credentials are checked up front so that a missing key
//! fails at startup rather than on the first upload.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
const DEFAULT_SESSION_IDLE_MINUTES: u64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    Missing(&'static str),
    #[error("{var} has an invalid value: {value}")]
    Invalid { var: &'static str, value: String },
}

/// Credentials and endpoint for the Supabase project (edge function + REST).
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    /// Used as the bearer for REST writes when set; falls back to the anon key.
    pub service_role_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
}

/// Everything the service needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase: SupabaseConfig,
    pub openai: OpenAiConfig,
    pub bind_addr: SocketAddr,
    pub max_upload_bytes: usize,
    /// Sessions untouched for this long are evicted.
    pub session_idle_timeout: Duration,
}

impl AppConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build the configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let supabase = SupabaseConfig {
            url: required(vars, "SUPABASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            anon_key: required(vars, "SUPABASE_ANON_KEY")?,
            service_role_key: optional(vars, "SUPABASE_SERVICE_ROLE_KEY"),
        };

        let openai = OpenAiConfig {
            api_key: required(vars, "OPENAI_API_KEY")?,
            model: optional(vars, "OPENAI_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
        };

        let bind_raw =
            optional(vars, "BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr: SocketAddr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            var: "BIND_ADDR",
            value: bind_raw.clone(),
        })?;

        let max_upload_bytes = match optional(vars, "MAX_UPLOAD_BYTES") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                var: "MAX_UPLOAD_BYTES",
                value: raw.clone(),
            })?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let idle_minutes = match optional(vars, "SESSION_IDLE_MINUTES") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(minutes) if minutes > 0 => minutes,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "SESSION_IDLE_MINUTES",
                        value: raw,
                    })
                }
            },
            None => DEFAULT_SESSION_IDLE_MINUTES,
        };

        info!(
            "Config loaded: supabase={}, model={}, bind={}",
            supabase.url, openai.model, bind_addr
        );

        Ok(Self {
            supabase,
            openai,
            bind_addr,
            max_upload_bytes,
            session_idle_timeout: Duration::from_secs(idle_minutes * 60),
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &'static str) -> Result<String, ConfigError> {
    optional(vars, name).ok_or(ConfigError::Missing(name))
}

fn optional(vars: &HashMap<String, String>, name: &str) -> Option<String> {
    vars.get(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
