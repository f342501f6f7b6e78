//! Configuration management.
//!
//! Settings are loaded from `config/<name>.toml` with the `config` crate and
//! deserialized into [`Settings`]. Parsing catches malformed files; the
//! [`Settings::validate`] step catches values that parse but are logically
//! invalid (zero aperture, negative limits) before the meter ever touches the
//! instrument. Durations are written human-style (`"500ms"`, `"2s"`) via
//! `humantime_serde`.

use crate::error::{TtmError, TtmResult};
use config::Config;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub log_level: String,
    pub session: SessionSettings,
    pub meter: MeterSettings,
}

/// Transport-level settings for the VISA/TSP session.
#[derive(Debug, Deserialize, Clone)]
pub struct SessionSettings {
    /// VISA resource name, e.g. "TCPIP0::192.168.0.150::inst0::INSTR".
    pub resource_name: String,
    #[serde(with = "humantime_serde")]
    pub read_timeout: Duration,
}

/// Default numeric parameters for the measurement entities.
///
/// These are the resolved defaults; there is no per-property null fallback.
/// [`crate::subsystem::MeasurementConfig::resolve`] is the single place where
/// they are turned into the per-cycle configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct MeterSettings {
    /// Cold-resistance source current, amperes.
    pub source_current_a: f64,
    /// Cold-resistance voltage limit, volts.
    pub voltage_limit_v: f64,
    /// Integration aperture, power-line cycles.
    pub aperture_plc: f64,
    /// Acceptable cold-resistance band, ohms.
    pub cold_resistance_low_limit_ohm: f64,
    pub cold_resistance_high_limit_ohm: f64,
    /// Acceptable thermal-transient voltage change band, volts.
    pub transient_voltage_low_limit_v: f64,
    pub transient_voltage_high_limit_v: f64,
    /// Settling pause between the thermal transient and the final
    /// resistance measurement.
    #[serde(with = "humantime_serde")]
    pub post_transient_delay: Duration,
    /// Pre-measurement lead continuity check.
    pub contact_check_enabled: bool,
    pub contact_check_limit_ohm: f64,
    /// Upper bound for status-byte polling while waiting on the instrument.
    #[serde(with = "humantime_serde")]
    pub trigger_poll_timeout: Duration,
    /// Firmware generation for outcome decoding. Legacy firmware reports
    /// outcome bits only up to `LoadFailed`.
    pub legacy_firmware: bool,
}

impl Settings {
    pub fn new(config_name: Option<&str>) -> TtmResult<Self> {
        let config_path = format!("config/{}", config_name.unwrap_or("default"));
        let s = Config::builder()
            .add_source(config::File::with_name(&config_path))
            .build()
            .map_err(TtmError::Config)?;

        let settings: Settings = s.try_deserialize().map_err(TtmError::Config)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic validation beyond what deserialization enforces.
    pub fn validate(&self) -> TtmResult<()> {
        self.meter.validate()
    }
}

impl MeterSettings {
    pub fn validate(&self) -> TtmResult<()> {
        if self.source_current_a <= 0.0 {
            return Err(TtmError::Configuration(format!(
                "source current must be positive, got {} A",
                self.source_current_a
            )));
        }
        if self.voltage_limit_v <= 0.0 {
            return Err(TtmError::Configuration(format!(
                "voltage limit must be positive, got {} V",
                self.voltage_limit_v
            )));
        }
        if self.aperture_plc <= 0.0 {
            return Err(TtmError::Configuration(format!(
                "aperture must be positive, got {} PLC",
                self.aperture_plc
            )));
        }
        if self.cold_resistance_low_limit_ohm >= self.cold_resistance_high_limit_ohm {
            return Err(TtmError::Configuration(format!(
                "cold resistance limits inverted: [{}, {}] ohm",
                self.cold_resistance_low_limit_ohm, self.cold_resistance_high_limit_ohm
            )));
        }
        if self.transient_voltage_low_limit_v >= self.transient_voltage_high_limit_v {
            return Err(TtmError::Configuration(format!(
                "transient voltage limits inverted: [{}, {}] V",
                self.transient_voltage_low_limit_v, self.transient_voltage_high_limit_v
            )));
        }
        if self.contact_check_enabled && self.contact_check_limit_ohm <= 0.0 {
            return Err(TtmError::Configuration(format!(
                "contact check limit must be positive, got {} ohm",
                self.contact_check_limit_ohm
            )));
        }
        Ok(())
    }
}

impl Default for MeterSettings {
    /// Bench defaults for a 2600-series TTM setup; tests build on these.
    fn default() -> Self {
        Self {
            source_current_a: 0.01,
            voltage_limit_v: 0.1,
            aperture_plc: 1.0,
            cold_resistance_low_limit_ohm: 1.85,
            cold_resistance_high_limit_ohm: 2.15,
            transient_voltage_low_limit_v: 0.006,
            transient_voltage_high_limit_v: 0.017,
            post_transient_delay: Duration::from_millis(500),
            contact_check_enabled: true,
            contact_check_limit_ohm: 100.0,
            trigger_poll_timeout: Duration::from_secs(10),
            legacy_firmware: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_meter_settings_are_valid() {
        assert!(MeterSettings::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_resistance_limits() {
        let settings = MeterSettings {
            cold_resistance_low_limit_ohm: 3.0,
            cold_resistance_high_limit_ohm: 2.0,
            ..MeterSettings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, TtmError::Configuration(_)));
        assert!(err.to_string().contains("inverted"));
    }

    #[test]
    fn loads_default_settings_file() {
        let settings = Settings::new(None).unwrap();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.meter.post_transient_delay, Duration::from_millis(500));
        assert_eq!(settings.session.read_timeout, Duration::from_secs(3));
    }

    #[test]
    fn rejects_zero_aperture() {
        let settings = MeterSettings {
            aperture_plc: 0.0,
            ..MeterSettings::default()
        };
        assert!(settings.validate().is_err());
    }
}
