//! Thermal transient pulse measurement.
//!
//! The firmware sources a current pulse through the DUT and samples the
//! voltage rise caused by self-heating. The primary reading is the voltage
//! change over the pulse, binned against the configured band.

use super::{MeasurementConfig, SubsystemCore};
use crate::error::TtmResult;
use crate::outcome::MeasurementOutcomes;
use crate::session::Session;
use tracing::debug;

#[derive(Debug)]
pub struct ThermalTransientMeasure {
    core: SubsystemCore,
    low_limit_v: f64,
    high_limit_v: f64,
}

impl ThermalTransientMeasure {
    pub fn new(config: &MeasurementConfig) -> Self {
        Self {
            core: SubsystemCore::new("ttm.tr", "voltageChange", config.generation),
            low_limit_v: config.transient_voltage_low_limit_v,
            high_limit_v: config.transient_voltage_high_limit_v,
        }
    }

    /// Voltage change in volts from the last clean measurement.
    pub fn voltage_change(&self) -> Option<f64> {
        self.core.value
    }

    pub fn outcome(&self) -> MeasurementOutcomes {
        self.core.outcome
    }

    pub fn outcome_detail(&self) -> &str {
        &self.core.detail
    }

    pub fn readings(&self) -> &super::FirmwareReadings {
        &self.core.readings
    }

    pub fn clear(&mut self) {
        self.core.clear();
    }

    /// Source the pulse, then read back and decode the transient outcome.
    pub async fn measure<S: Session + ?Sized>(
        &mut self,
        session: &mut S,
    ) -> TtmResult<MeasurementOutcomes> {
        self.core.clear();
        session.write_line("_G.ttm.measureThermalTransient()").await?;
        self.core.read_back(session).await?;
        session.throw_device_error_if_set().await?;

        self.core.apply_limits(self.low_limit_v, self.high_limit_v);
        debug!(
            node = self.core.node(),
            outcome = ?self.core.outcome,
            voltage_change = ?self.core.value,
            "thermal transient measured"
        );
        Ok(self.core.outcome)
    }

    /// Refresh values after a firmware-side (triggered) measurement.
    pub async fn read_values<S: Session + ?Sized>(&mut self, session: &mut S) -> TtmResult<()> {
        self.core.read_back(session).await?;
        self.core.apply_limits(self.low_limit_v, self.high_limit_v);
        Ok(())
    }
}
