//! Config file read/write.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, info};

use crate::schema::AxBrokerConfig;

/// Load and parse the config from disk.
///
/// Returns `Ok(Default::default())` if the file doesn't exist (first run).
pub async fn load_config(path: &Path) -> Result<AxBrokerConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(AxBrokerConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: AxBrokerConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Write config to disk atomically (write to temp file, rename).
pub async fn write_config(config: &AxBrokerConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    let tmp_path = path.with_extension("yaml.tmp");
    fs::write(&tmp_path, yaml.as_bytes())
        .await
        .with_context(|| format!("Failed to write temp config: {}", tmp_path.display()))?;

    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to rename temp config to: {}", path.display()))?;

    info!(path = %path.display(), "Wrote config");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::BrokerSection;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let config = load_config(Path::new("/nonexistent/axbroker.yaml"))
            .await
            .expect("missing file is not an error");
        assert!(config.broker.is_none());
    }

    #[tokio::test]
    async fn write_then_load_round_trip() {
        let dir = std::env::temp_dir().join("axbroker-config-io-test");
        let path = dir.join("config.yaml");
        let config = AxBrokerConfig {
            broker: Some(BrokerSection {
                query_timeout_ms: Some(1234),
                max_tree_hops: Some(4),
            }),
            logging: None,
        };

        write_config(&config, &path).await.expect("write");
        let loaded = load_config(&path).await.expect("load");
        assert_eq!(
            loaded.broker.and_then(|b| b.query_timeout_ms),
            Some(1234)
        );

        let _ = fs::remove_dir_all(&dir).await;
    }
}
