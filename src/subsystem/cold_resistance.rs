//! Cold (initial and final) resistance measurement.
//!
//! The firmware measures DUT resistance at a low sense current before the
//! thermal transient pulse and again after the post-transient pause. Both
//! phases use the same entity driver; only the TSP node and measure command
//! differ.

use super::{MeasurementConfig, SubsystemCore};
use crate::error::TtmResult;
use crate::outcome::MeasurementOutcomes;
use crate::session::Session;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColdResistanceKind {
    Initial,
    Final,
}

impl ColdResistanceKind {
    fn node(self) -> &'static str {
        match self {
            ColdResistanceKind::Initial => "ttm.ir",
            ColdResistanceKind::Final => "ttm.fr",
        }
    }

    fn measure_command(self) -> &'static str {
        match self {
            ColdResistanceKind::Initial => "_G.ttm.measureInitialResistance()",
            ColdResistanceKind::Final => "_G.ttm.measureFinalResistance()",
        }
    }
}

#[derive(Debug)]
pub struct ColdResistanceMeasure {
    kind: ColdResistanceKind,
    core: SubsystemCore,
    low_limit_ohm: f64,
    high_limit_ohm: f64,
    contact_check_enabled: bool,
}

impl ColdResistanceMeasure {
    pub fn new(kind: ColdResistanceKind, config: &MeasurementConfig) -> Self {
        Self {
            kind,
            core: SubsystemCore::new(kind.node(), "resistance", config.generation),
            low_limit_ohm: config.cold_resistance_low_limit_ohm,
            high_limit_ohm: config.cold_resistance_high_limit_ohm,
            // The lead check runs once, ahead of the initial measurement.
            contact_check_enabled: config.contact_check_enabled
                && kind == ColdResistanceKind::Initial,
        }
    }

    pub fn kind(&self) -> ColdResistanceKind {
        self.kind
    }

    /// Resistance in ohms from the last clean measurement.
    pub fn resistance(&self) -> Option<f64> {
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

    /// Run one cold-resistance measurement and decode its outcome.
    ///
    /// When the contact check is enabled and reports open leads, the
    /// measurement is not attempted and the outcome says so.
    pub async fn measure<S: Session + ?Sized>(
        &mut self,
        session: &mut S,
    ) -> TtmResult<MeasurementOutcomes> {
        self.core.clear();

        if self.contact_check_enabled {
            let leads_ok = session.query_print_bool("_G.ttm.contactCheck()").await?;
            if !leads_ok {
                self.core.outcome = MeasurementOutcomes::MEASUREMENT_NOT_MADE
                    | MeasurementOutcomes::FAILED_CONTACT_CHECK;
                self.core.detail = "contact check failed; leads not connected".to_string();
                debug!(node = self.core.node(), "contact check failed; skipping measurement");
                return Ok(self.core.outcome);
            }
        }

        session.write_line(self.kind.measure_command()).await?;
        self.core.read_back(session).await?;
        session.throw_device_error_if_set().await?;

        self.core.apply_limits(self.low_limit_ohm, self.high_limit_ohm);
        debug!(
            node = self.core.node(),
            outcome = ?self.core.outcome,
            resistance = ?self.core.value,
            "cold resistance measured"
        );
        Ok(self.core.outcome)
    }

    /// Refresh values after a firmware-side (triggered) measurement.
    pub async fn read_values<S: Session + ?Sized>(&mut self, session: &mut S) -> TtmResult<()> {
        self.core.read_back(session).await?;
        self.core.apply_limits(self.low_limit_ohm, self.high_limit_ohm);
        Ok(())
    }
}
