use std::time::Duration;

/// Longest credit note lifetime the engine issues (100 years).
pub const MAX_CREDIT_NOTE_VALIDITY_DAYS: i64 = 36_500;

/// Tunables of the order engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Upper bound on a single journal append.
    pub commit_timeout: Duration,
    /// Reload-and-retry attempts after a concurrency conflict.
    pub max_conflict_retries: u32,
    /// Lifetime of a credit note from the moment it is issued. Clamped to
    /// `1..=MAX_CREDIT_NOTE_VALIDITY_DAYS` when used.
    pub credit_note_validity_days: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            commit_timeout: Duration::from_secs(3),
            max_conflict_retries: 3,
            credit_note_validity_days: 365,
        }
    }
}

impl EngineSettings {
    pub fn credit_note_validity(&self) -> chrono::Duration {
        let days = self
            .credit_note_validity_days
            .clamp(1, MAX_CREDIT_NOTE_VALIDITY_DAYS);
        chrono::Duration::try_days(days).unwrap_or(chrono::Duration::days(365))
    }
}
