//! Process-level engine settings.

use std::env;
use std::fmt;
use thiserror::Error;

use crate::script::RhaiEvaluatorConfig;

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Settings of a [`SyncEngine`](crate::engine::SyncEngine) process.
#[derive(Clone, Default)]
pub struct EngineSettings {
    /// Connector page size; the configuration service property wins when set.
    pub page_size: Option<u32>,
    pub script_limits: RhaiEvaluatorConfig,
    /// PostgreSQL URL of the sync log store. In-memory logs when absent.
    pub log_database_url: Option<String>,
}

impl fmt::Debug for EngineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSettings")
            .field("page_size", &self.page_size)
            .field("script_limits", &self.script_limits)
            .field(
                "log_database_url",
                &self.log_database_url.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

impl EngineSettings {
    /// Load settings from environment variables.
    ///
    /// # Optional Variables
    ///
    /// - `IDM_SYNC_PAGE_SIZE` - Connector page size (1..=10000)
    /// - `IDM_SYNC_SCRIPT_MAX_OPERATIONS` - Rhai operation limit
    /// - `IDM_SYNC_SCRIPT_MAX_CALL_LEVELS` - Rhai call depth limit
    /// - `IDM_SYNC_SCRIPT_MAX_STRING_SIZE` - Rhai string size limit
    /// - `IDM_SYNC_LOG_DATABASE_URL` - PostgreSQL URL of the log store
    pub fn from_env() -> Result<Self, SettingsError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through a variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let page_size = parse_var::<u32>(&lookup, "IDM_SYNC_PAGE_SIZE")?;
        if let Some(size) = page_size {
            if size == 0 || size > 10_000 {
                return Err(SettingsError::InvalidValue {
                    var: "IDM_SYNC_PAGE_SIZE".to_string(),
                    message: format!("must be between 1 and 10000, got {size}"),
                });
            }
        }

        let mut script_limits = RhaiEvaluatorConfig::default();
        if let Some(value) = parse_var(&lookup, "IDM_SYNC_SCRIPT_MAX_OPERATIONS")? {
            script_limits.max_operations = value;
        }
        if let Some(value) = parse_var(&lookup, "IDM_SYNC_SCRIPT_MAX_CALL_LEVELS")? {
            script_limits.max_call_levels = value;
        }
        if let Some(value) = parse_var(&lookup, "IDM_SYNC_SCRIPT_MAX_STRING_SIZE")? {
            script_limits.max_string_size = value;
        }

        let log_database_url = lookup("IDM_SYNC_LOG_DATABASE_URL").filter(|url| !url.is_empty());
        if let Some(url) = &log_database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(SettingsError::InvalidValue {
                    var: "IDM_SYNC_LOG_DATABASE_URL".to_string(),
                    message: "must be a postgres:// URL".to_string(),
                });
            }
        }

        Ok(Self {
            page_size,
            script_limits,
            log_database_url,
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Result<Option<T>, SettingsError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| SettingsError::InvalidValue {
                var: var.to_string(),
                message: e.to_string(),
            }),
    }
}
