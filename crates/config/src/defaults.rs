//! Default values applied to any unset config field.

use crate::schema::{AxBrokerConfig, BrokerSection, LoggingSection};

/// Bound on a single cross-process query wait. A crashed or unresponsive
/// remote end must never hang a caller past this.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5000;

/// Cross-tree hop cap for recursive ancestor walks.
pub const DEFAULT_MAX_TREE_HOPS: u32 = 16;

/// Default tracing filter.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Fill every unset field with its default.
pub fn apply_all_defaults(mut config: AxBrokerConfig) -> AxBrokerConfig {
    let broker = config.broker.get_or_insert_with(BrokerSection::default);
    broker.query_timeout_ms.get_or_insert(DEFAULT_QUERY_TIMEOUT_MS);
    broker.max_tree_hops.get_or_insert(DEFAULT_MAX_TREE_HOPS);

    let logging = config.logging.get_or_insert_with(LoggingSection::default);
    logging.level.get_or_insert_with(|| DEFAULT_LOG_LEVEL.to_string());

    config
}
