//! Aggregator configuration
//!
//! Tunables for the metering engine, loadable from a TOML file.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

/// Smallest allowed hash table width (2^4 = 16 slots).
pub const MIN_HASH_BITS: u8 = 4;
/// Largest allowed hash table width (2^28 slots); beyond this the slot
/// array alone would be gigabytes.
pub const MAX_HASH_BITS: u8 = 28;

/// Aggregator tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Seconds a bucket may sit idle before it expires.
    pub min_buffer_time: u32,
    /// Seconds after which a bucket expires regardless of activity.
    pub max_buffer_time: u32,
    /// Hash table size exponent; the table has 2^hash_bits slots.
    pub hash_bits: u8,
    /// Merge both directions of a connection into one record.
    pub biflow: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            min_buffer_time: 60,  // 1 minute idle timeout
            max_buffer_time: 600, // 10 minute hard cap
            hash_bits: 17,
            biflow: false,
        }
    }
}

impl AggregatorConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: AggregatorConfig =
            toml::from_str(&contents).with_context(|| "failed to parse config file")?;
        Ok(config)
    }

    /// Reject unusable settings before any allocation happens.
    pub fn validate(&self) -> Result<()> {
        if self.hash_bits < MIN_HASH_BITS || self.hash_bits > MAX_HASH_BITS {
            return Err(SchemaError::BadTableSize(self.hash_bits));
        }
        if self.min_buffer_time > self.max_buffer_time {
            return Err(SchemaError::BadBufferTimes {
                min: self.min_buffer_time,
                max: self.max_buffer_time,
            });
        }
        Ok(())
    }

    /// Number of hash table slots.
    pub fn table_size(&self) -> usize {
        1usize << self.hash_bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = AggregatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.table_size(), 1 << 17);
    }

    #[test]
    fn test_hash_bits_rejected() {
        let config = AggregatorConfig { hash_bits: 40, ..Default::default() };
        assert!(matches!(config.validate(), Err(SchemaError::BadTableSize(40))));
    }

    #[test]
    fn test_buffer_times_rejected() {
        let config = AggregatorConfig {
            min_buffer_time: 700,
            max_buffer_time: 600,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SchemaError::BadBufferTimes { .. })));
    }

    #[test]
    fn test_parse_toml() {
        let config: AggregatorConfig = toml::from_str(
            r#"
            min_buffer_time = 30
            max_buffer_time = 300
            hash_bits = 12
            biflow = true
            "#,
        )
        .unwrap();
        assert_eq!(config.min_buffer_time, 30);
        assert_eq!(config.hash_bits, 12);
        assert!(config.biflow);
    }
}
