//! AxBroker runtime configuration schema.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Root configuration for the broker, typed for YAML/JSON deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AxBrokerConfig {
    /// Query correlation and bounded-wait settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker: Option<BrokerSection>,

    /// Logging configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSection {
    /// Bound on any single cross-process query wait, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_timeout_ms: Option<u64>,

    /// Cap on cross-tree hops during a recursive ancestor walk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tree_hops: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSection {
    /// Default tracing filter (overridden by `RUST_LOG`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// When set, NDJSON log files are written here with daily rotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

/// Resolved broker settings, ready to hand to the service.
#[derive(Debug, Clone, Copy)]
pub struct BrokerSettings {
    pub query_timeout: Duration,
    pub max_tree_hops: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_millis(defaults::DEFAULT_QUERY_TIMEOUT_MS),
            max_tree_hops: defaults::DEFAULT_MAX_TREE_HOPS as usize,
        }
    }
}

impl AxBrokerConfig {
    /// Resolve the broker section into concrete settings, falling back to
    /// defaults for anything unset.
    pub fn broker_settings(&self) -> BrokerSettings {
        let section = self.broker.clone().unwrap_or_default();
        BrokerSettings {
            query_timeout: Duration::from_millis(
                section.query_timeout_ms.unwrap_or(defaults::DEFAULT_QUERY_TIMEOUT_MS),
            ),
            max_tree_hops: section.max_tree_hops.unwrap_or(defaults::DEFAULT_MAX_TREE_HOPS)
                as usize,
        }
    }
}
