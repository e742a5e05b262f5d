//! Channel configuration

use hushwire_crypto::entropy::EntropyConfig;
use hushwire_crypto::identity::IdentityConfig;
use hushwire_crypto::MAX_MESSAGE_SIZE;
use serde::{Deserialize, Serialize};

/// Session configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Entropy pool settings
    pub entropy: EntropyConfig,
    /// Identity key settings
    pub identity: IdentityConfig,
    /// Largest framed plaintext accepted for sending, in bytes
    pub max_message_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            entropy: EntropyConfig::default(),
            identity: IdentityConfig::default(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl ChannelConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        self.entropy.validate()?;
        self.identity.validate()?;
        if self.max_message_size == 0 {
            return Err("max_message_size must be greater than 0".to_string());
        }
        if self.max_message_size > MAX_MESSAGE_SIZE {
            return Err(format!("max_message_size must be at most {MAX_MESSAGE_SIZE}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = ChannelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_message_size, 65536);
        assert_eq!(config.entropy.initial_seed_bytes, 32767);
    }

    #[test]
    fn test_invalid_message_size() {
        let config = ChannelConfig {
            max_message_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ChannelConfig {
            max_message_size: MAX_MESSAGE_SIZE + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_security_floor_enforced() {
        let mut config = ChannelConfig::default();
        config.identity.min_security_bits = 192;
        assert!(config.validate().unwrap_err().contains("min_security_bits"));
    }
}
