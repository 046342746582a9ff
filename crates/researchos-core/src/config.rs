//! # Engine Configuration
//!
//! Runtime-tunable settings. The app layer loads these from `ros.toml`;
//! every field has a default so a missing file or table is fine.

use crate::primitives::{DEFAULT_LEVEL, DEFAULT_MAX_ID_ATTEMPTS, MAX_VALUE_PAYLOAD_SIZE};
use serde::{Deserialize, Serialize};

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Attempts made by identifier generation before failing with `IdExhausted`.
    pub max_id_attempts: u32,
    /// Level assigned to runnables that do not declare one.
    pub default_level: String,
    /// Largest encoded value payload accepted by the codec.
    pub max_value_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_id_attempts: DEFAULT_MAX_ID_ATTEMPTS,
            default_level: DEFAULT_LEVEL.to_string(),
            max_value_size: MAX_VALUE_PAYLOAD_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"max_id_attempts": 3}"#).expect("deserialize");
        assert_eq!(config.max_id_attempts, 3);
        assert_eq!(config.default_level, "Trial");
        assert_eq!(config.max_value_size, MAX_VALUE_PAYLOAD_SIZE);
    }
}
