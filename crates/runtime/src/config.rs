//! Engine configuration loaded from environment variables.

use std::time::Duration;

use domain::{EngineSettings, MAX_CREDIT_NOTE_VALIDITY_DAYS};

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Engine configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL journal; unset keeps the journal in memory
/// - `COMMIT_TIMEOUT_MS`: bound on a single journal append (default: `3000`)
/// - `MAX_CONFLICT_RETRIES`: reloads after a concurrent write (default: `3`)
/// - `DISPATCHER_BUFFER`: side-effect channel capacity (default: `1024`)
/// - `CREDIT_NOTE_VALIDITY_DAYS`: credit note lifetime (default: `365`, at most `36500`)
///
/// Values that fail to parse fall back to their default.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub commit_timeout: Duration,
    pub max_conflict_retries: u32,
    pub dispatcher_buffer: usize,
    pub credit_note_validity_days: i64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse().ok());

        Self {
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            commit_timeout: parsed("COMMIT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.commit_timeout),
            max_conflict_retries: parsed("MAX_CONFLICT_RETRIES")
                .and_then(|v: u64| u32::try_from(v).ok())
                .unwrap_or(defaults.max_conflict_retries),
            dispatcher_buffer: parsed("DISPATCHER_BUFFER")
                .and_then(|v: u64| usize::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.dispatcher_buffer),
            credit_note_validity_days: parsed("CREDIT_NOTE_VALIDITY_DAYS")
                .filter(|v: &u64| *v > 0)
                .map(|v| {
                    i64::try_from(v)
                        .unwrap_or(i64::MAX)
                        .min(MAX_CREDIT_NOTE_VALIDITY_DAYS)
                })
                .unwrap_or(defaults.credit_note_validity_days),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            commit_timeout: self.commit_timeout,
            max_conflict_retries: self.max_conflict_retries,
            credit_note_validity_days: self.credit_note_validity_days,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let settings = EngineSettings::default();
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            commit_timeout: settings.commit_timeout,
            max_conflict_retries: settings.max_conflict_retries,
            dispatcher_buffer: 1024,
            credit_note_validity_days: settings.credit_note_validity_days,
        }
    }
}
