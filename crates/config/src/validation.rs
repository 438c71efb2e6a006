//! Config validation with field-path error messages.

use thiserror::Error;

use crate::schema::AxBrokerConfig;

/// A validation finding with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// All errors and warnings found in one validation pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

const KNOWN_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &AxBrokerConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_broker(config, &mut report);
    validate_logging(config, &mut report);
    report
}

fn validate_broker(config: &AxBrokerConfig, report: &mut ValidationReport) {
    let Some(broker) = &config.broker else { return };
    match broker.query_timeout_ms {
        Some(0) => report.error(
            "broker.queryTimeoutMs",
            "Query timeout must be > 0; an unbounded wait on a remote process is not allowed",
        ),
        Some(ms) if ms > 60_000 => report.warn(
            "broker.queryTimeoutMs",
            "Query timeout above 60s will hold callers for a very long time",
        ),
        _ => {}
    }
    if broker.max_tree_hops == Some(0) {
        report.error("broker.maxTreeHops", "Tree hop cap must be > 0");
    }
}

fn validate_logging(config: &AxBrokerConfig, report: &mut ValidationReport) {
    let Some(logging) = &config.logging else { return };
    if let Some(level) = &logging.level {
        // Full filter directives are allowed; only flag plain unknown levels.
        if !level.contains('=') && !KNOWN_LEVELS.contains(&level.as_str()) {
            report.warn("logging.level", format!("Unknown log level '{level}'"));
        }
    }
}
