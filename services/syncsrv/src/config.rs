//! Service configuration
//!
//! Loaded in three layers through figment: compiled-in defaults, an optional
//! YAML file, then `SYNCSRV_` environment overrides (nested fields with
//! `__`, e.g. `SYNCSRV_KEEPALIVE__STEADY_SECS=60`). Validation happens once
//! at load time; the rest of the engine trusts the values.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use wearlink_proto::FRAME_OVERHEAD;

use crate::error::{Result, SyncError};
use crate::transport::Characteristic;

/// Steady/retry cadence pair for one sync category
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CadenceConfig {
    pub steady_secs: u64,
    pub retry_secs: u64,
}

impl CadenceConfig {
    pub const fn new(steady_secs: u64, retry_secs: u64) -> Self {
        Self {
            steady_secs,
            retry_secs,
        }
    }

    pub fn steady(&self) -> Duration {
        Duration::from_secs(self.steady_secs)
    }

    pub fn retry(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Identifier used in logs and events, typically the device address
    pub device_id: String,

    /// Negotiated maximum frame length (MTU payload), framing included
    pub max_frame_len: usize,

    /// Characteristic handle commands are written to
    pub control_characteristic: Characteristic,

    /// Characteristic handle device notifications arrive on
    pub data_characteristic: Characteristic,

    /// Keepalive ping; the reply doubles as the battery report
    pub keepalive: CadenceConfig,

    /// Ring-buffer drain; retry-driven, disabled once the day is drained
    pub ring_buffer: CadenceConfig,

    /// Sleep record fetch
    pub sleep: CadenceConfig,

    /// Day summary fetch
    pub summary: CadenceConfig,

    /// Bound of the outbound event channel
    pub event_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_id: "wl01-device".to_string(),
            max_frame_len: 32,
            control_characteristic: 0x0011,
            data_characteristic: 0x0012,
            keepalive: CadenceConfig::new(120, 120),
            ring_buffer: CadenceConfig::new(10, 10),
            sleep: CadenceConfig::new(12 * 3600, 30),
            summary: CadenceConfig::new(24 * 3600, 30),
            event_channel_capacity: 64,
        }
    }
}

impl SyncConfig {
    /// Load configuration from defaults, an optional YAML file, and
    /// `SYNCSRV_` environment variables (later layers win).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(SyncConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: SyncConfig = figment
            .merge(Env::prefixed("SYNCSRV_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_frame_len <= FRAME_OVERHEAD {
            return Err(SyncError::config(format!(
                "max_frame_len {} leaves no room for a payload",
                self.max_frame_len
            )));
        }
        if self.event_channel_capacity == 0 {
            return Err(SyncError::config("event_channel_capacity must be > 0"));
        }
        for (name, cadence) in [
            ("keepalive", &self.keepalive),
            ("ring_buffer", &self.ring_buffer),
            ("sleep", &self.sleep),
            ("summary", &self.summary),
        ] {
            if cadence.steady_secs == 0 || cadence.retry_secs == 0 {
                return Err(SyncError::config(format!(
                    "{name} cadence must be non-zero"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cadences() {
        let config = SyncConfig::default();
        assert_eq!(config.keepalive.steady(), Duration::from_secs(120));
        assert_eq!(config.keepalive.retry(), Duration::from_secs(120));
        assert_eq!(config.ring_buffer.retry(), Duration::from_secs(10));
        assert_eq!(config.sleep.steady(), Duration::from_secs(12 * 3600));
        assert_eq!(config.sleep.retry(), Duration::from_secs(30));
        assert_eq!(config.summary.steady(), Duration::from_secs(24 * 3600));
        config.validate().unwrap();
    }

    #[test]
    fn test_yaml_and_env_layering() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "syncsrv.yaml",
                r#"
                device_id: "AA:BB:CC:DD:EE:FF"
                max_frame_len: 32
                keepalive:
                  steady_secs: 60
                  retry_secs: 60
                "#,
            )?;
            jail.set_env("SYNCSRV_MAX_FRAME_LEN", "64");
            jail.set_env("SYNCSRV_RING_BUFFER__RETRY_SECS", "5");

            let config = SyncConfig::load(Some(Path::new("syncsrv.yaml")))
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config.device_id, "AA:BB:CC:DD:EE:FF");
            // env beats the file
            assert_eq!(config.max_frame_len, 64);
            assert_eq!(config.keepalive.steady_secs, 60);
            assert_eq!(config.ring_buffer.retry_secs, 5);
            // untouched fields keep their defaults
            assert_eq!(config.summary.steady_secs, 24 * 3600);
            Ok(())
        });
    }

    #[test]
    fn test_rejects_unusable_frame_length() {
        let config = SyncConfig {
            max_frame_len: 4,
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_rejects_zero_cadence() {
        let mut config = SyncConfig::default();
        config.sleep.retry_secs = 0;
        assert!(config.validate().is_err());
    }
}
