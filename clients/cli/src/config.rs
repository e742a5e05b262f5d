//! CLI configuration

use std::path::Path;

use hushwire_protocol::ChannelConfig;
use serde::{Deserialize, Serialize};

/// CLI configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Channel settings shared by every session the CLI starts
    #[serde(default)]
    pub channel: ChannelConfig,
}

impl CliConfig {
    /// Load config from file, or write and return the default if missing
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: CliConfig = toml::from_str(&content)?;
            config
                .channel
                .validate()
                .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
            Ok(config)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            config.save(path)?;

            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
