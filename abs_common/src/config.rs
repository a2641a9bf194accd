//! ECU configuration record, loading and validation.
//!
//! The configuration is resolved once at startup (TOML file and/or CLI
//! overrides), validated before any hardware is touched, and immutable
//! for the process lifetime.
//!
//! # TOML Example
//!
//! ```toml
//! can_interface = "can0"
//! pwm_chip = 0
//! pwm_channel = 0
//! period_ns = 1000000
//! threshold_mm = 300
//! min_distance_mm = 50
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Default CAN interface name.
pub const DEFAULT_CAN_INTERFACE: &str = "can0";

/// Default sysfs PWM chip number.
pub const DEFAULT_PWM_CHIP: u32 = 0;

/// Default PWM channel on the chip.
pub const DEFAULT_PWM_CHANNEL: u32 = 0;

/// Default PWM period in nanoseconds (1 kHz).
pub const DEFAULT_PERIOD_NS: u64 = 1_000_000;

/// Default braking threshold in millimetres.
pub const DEFAULT_THRESHOLD_MM: u16 = 300;

/// Default full-braking distance in millimetres.
pub const DEFAULT_MIN_DISTANCE_MM: u16 = 50;

/// Default CAN id carrying ultrasonic telemetry.
pub const DEFAULT_TELEMETRY_ID: u32 = 0x100;

/// Default CAN id for outgoing braking status.
pub const DEFAULT_STATUS_ID: u32 = 0x200;

/// Highest valid standard (11-bit) CAN identifier.
const CAN_SFF_MAX: u32 = 0x7FF;

/// Error type for configuration operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("configuration file not found")]
    FileNotFound,

    /// File read or TOML parsing failed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Resolved ECU configuration.
///
/// Missing TOML keys fall back to the field defaults; unknown keys are
/// rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EcuConfig {
    /// CAN interface the daemon binds to (e.g. "can0").
    pub can_interface: String,
    /// Sysfs PWM chip number.
    pub pwm_chip: u32,
    /// PWM channel on the chip.
    pub pwm_channel: u32,
    /// PWM period in nanoseconds.
    pub period_ns: u64,
    /// Distance below which braking engages [mm].
    pub threshold_mm: u16,
    /// Distance at or below which braking is 100% [mm].
    pub min_distance_mm: u16,
    /// CAN id of incoming telemetry frames.
    pub telemetry_id: u32,
    /// CAN id of outgoing status frames.
    pub status_id: u32,
    /// Surface per-frame diagnostics.
    pub verbose: bool,
}

impl Default for EcuConfig {
    fn default() -> Self {
        Self {
            can_interface: DEFAULT_CAN_INTERFACE.to_string(),
            pwm_chip: DEFAULT_PWM_CHIP,
            pwm_channel: DEFAULT_PWM_CHANNEL,
            period_ns: DEFAULT_PERIOD_NS,
            threshold_mm: DEFAULT_THRESHOLD_MM,
            min_distance_mm: DEFAULT_MIN_DISTANCE_MM,
            telemetry_id: DEFAULT_TELEMETRY_ID,
            status_id: DEFAULT_STATUS_ID,
            verbose: false,
        }
    }
}

impl EcuConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::FileNotFound`] if the file does not exist
    /// - [`ConfigError::ParseError`] if it cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate the configuration.
    ///
    /// Called once at startup, before any hardware is touched.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `threshold_mm` is not strictly greater than `min_distance_mm`
    /// - `period_ns` is zero
    /// - `can_interface` is empty
    /// - a bus id exceeds the standard 11-bit range, or both ids collide
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold_mm <= self.min_distance_mm {
            return Err(ConfigError::ValidationError(format!(
                "threshold_mm ({}) must be greater than min_distance_mm ({})",
                self.threshold_mm, self.min_distance_mm
            )));
        }
        if self.period_ns == 0 {
            return Err(ConfigError::ValidationError(
                "period_ns must be nonzero".to_string(),
            ));
        }
        if self.can_interface.is_empty() {
            return Err(ConfigError::ValidationError(
                "can_interface cannot be empty".to_string(),
            ));
        }
        for (name, id) in [("telemetry_id", self.telemetry_id), ("status_id", self.status_id)] {
            if id > CAN_SFF_MAX {
                return Err(ConfigError::ValidationError(format!(
                    "{name} (0x{id:X}) exceeds the standard 11-bit id range"
                )));
            }
        }
        if self.telemetry_id == self.status_id {
            return Err(ConfigError::ValidationError(format!(
                "telemetry_id and status_id collide (0x{:X})",
                self.telemetry_id
            )));
        }
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_daemon_defaults() {
        let config = EcuConfig::default();
        assert_eq!(config.can_interface, "can0");
        assert_eq!(config.period_ns, 1_000_000);
        assert_eq!(config.threshold_mm, 300);
        assert_eq!(config.min_distance_mm, 50);
        assert_eq!(config.telemetry_id, 0x100);
        assert_eq!(config.status_id, 0x200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn threshold_must_exceed_min_distance() {
        let mut config = EcuConfig::default();
        config.threshold_mm = 50;
        config.min_distance_mm = 50;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        config.threshold_mm = 40;
        assert!(config.validate().is_err());

        config.threshold_mm = 51;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_period_rejected() {
        let mut config = EcuConfig::default();
        config.period_ns = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_interface_rejected() {
        let mut config = EcuConfig::default();
        config.can_interface.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn extended_range_ids_rejected() {
        let mut config = EcuConfig::default();
        config.telemetry_id = 0x800;
        assert!(config.validate().is_err());

        config.telemetry_id = 0x100;
        config.status_id = 0x1FFF_FFFF;
        assert!(config.validate().is_err());
    }

    #[test]
    fn colliding_ids_rejected() {
        let mut config = EcuConfig::default();
        config.status_id = config.telemetry_id;
        assert!(config.validate().is_err());
    }
}
