//! Tracing subscriber and metrics recorder installation.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::RuntimeError;
use crate::config::{Config, LogFormat};

/// Installs the global tracing subscriber.
///
/// The filter comes from `config.log_level`; an unparsable directive is an
/// error rather than a silent fallback. Fails if a subscriber is already set.
pub fn init_tracing(config: &Config) -> Result<(), RuntimeError> {
    let filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| RuntimeError::Telemetry(format!("invalid log filter: {e}")))?;
    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .try_init()
        .map_err(|e| RuntimeError::Telemetry(e.to_string()))
}

/// Installs the global Prometheus recorder and returns a handle for rendering.
pub fn install_metrics_recorder() -> Result<PrometheusHandle, RuntimeError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| RuntimeError::Telemetry(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_filter() {
        let config = Config {
            log_level: "domain=verbose".to_string(),
            ..Config::default()
        };

        let err = init_tracing(&config).unwrap_err();
        assert!(matches!(err, RuntimeError::Telemetry(msg) if msg.contains("invalid log filter")));
    }
}
