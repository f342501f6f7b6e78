//! Per-entity measurement drivers.
//!
//! The firmware exposes one TSP table per measurement entity (`ttm.ir`,
//! `ttm.tr`, `ttm.fr`, `ttm.est`). Each driver here owns the raw reading
//! quadruple for its entity, the decoded outcome, and the parsed numeric
//! value. The shared plumbing lives in [`SubsystemCore`]; the entity types
//! compose it rather than inherit from it.

pub mod cold_resistance;
pub mod estimator;
pub mod thermal_transient;

pub use cold_resistance::{ColdResistanceKind, ColdResistanceMeasure};
pub use estimator::ThermalTransientEstimator;
pub use thermal_transient::ThermalTransientMeasure;

use crate::config::MeterSettings;
use crate::error::TtmResult;
use crate::outcome::{
    FirmwareGeneration, MeasurementOutcomes, OutcomeDecoder, STATUS_REGISTER_UNAVAILABLE,
};
use crate::session::Session;
use std::time::Duration;
use tracing::{debug, warn};

/// TSP expression for the live measurement event condition register,
/// consulted when the firmware flags a bad status.
const MEASUREMENT_EVENT_CONDITION: &str = "status.measurement.condition";

/// Raw textual replies for one entity, always refreshed together.
///
/// Invariant: when `outcome` is absent no measurement was made and the other
/// readings are absent too; a partially stale quadruple never exists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FirmwareReadings {
    pub outcome: Option<String>,
    pub status: Option<String>,
    pub reading: Option<String>,
    pub okay: Option<String>,
}

impl FirmwareReadings {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// True when the firmware reported any outcome at all.
    pub fn is_measured(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Resolved per-cycle measurement parameters.
///
/// This is the single place where configured defaults become concrete
/// values; the drivers never fall back to settings on their own.
#[derive(Debug, Clone)]
pub struct MeasurementConfig {
    pub source_current_a: f64,
    pub voltage_limit_v: f64,
    pub aperture_plc: f64,
    pub cold_resistance_low_limit_ohm: f64,
    pub cold_resistance_high_limit_ohm: f64,
    pub transient_voltage_low_limit_v: f64,
    pub transient_voltage_high_limit_v: f64,
    pub post_transient_delay: Duration,
    pub contact_check_enabled: bool,
    pub contact_check_limit_ohm: f64,
    pub generation: FirmwareGeneration,
}

impl MeasurementConfig {
    pub fn resolve(settings: &MeterSettings) -> Self {
        Self {
            source_current_a: settings.source_current_a,
            voltage_limit_v: settings.voltage_limit_v,
            aperture_plc: settings.aperture_plc,
            cold_resistance_low_limit_ohm: settings.cold_resistance_low_limit_ohm,
            cold_resistance_high_limit_ohm: settings.cold_resistance_high_limit_ohm,
            transient_voltage_low_limit_v: settings.transient_voltage_low_limit_v,
            transient_voltage_high_limit_v: settings.transient_voltage_high_limit_v,
            post_transient_delay: settings.post_transient_delay,
            contact_check_enabled: settings.contact_check_enabled,
            contact_check_limit_ohm: settings.contact_check_limit_ohm,
            generation: if settings.legacy_firmware {
                FirmwareGeneration::Legacy
            } else {
                FirmwareGeneration::Current
            },
        }
    }
}

/// Shared reading/decoding plumbing for one entity.
#[derive(Debug)]
pub struct SubsystemCore {
    /// TSP table for this entity, e.g. "ttm.ir".
    node: &'static str,
    /// Member holding the primary numeric reading, e.g. "resistance".
    reading_member: &'static str,
    decoder: OutcomeDecoder,
    pub readings: FirmwareReadings,
    pub outcome: MeasurementOutcomes,
    pub detail: String,
    /// Parsed primary reading; set only on a clean firmware outcome.
    pub value: Option<f64>,
}

impl SubsystemCore {
    pub fn new(
        node: &'static str,
        reading_member: &'static str,
        generation: FirmwareGeneration,
    ) -> Self {
        Self {
            node,
            reading_member,
            decoder: OutcomeDecoder::new(generation),
            readings: FirmwareReadings::default(),
            outcome: MeasurementOutcomes::empty(),
            detail: String::new(),
            value: None,
        }
    }

    pub fn node(&self) -> &'static str {
        self.node
    }

    /// Reset readings, outcome, and value together (no partial clears).
    pub fn clear(&mut self) {
        self.readings.clear();
        self.outcome = MeasurementOutcomes::empty();
        self.detail.clear();
        self.value = None;
    }

    /// Refresh the reading quadruple from the instrument and decode it.
    ///
    /// The outcome member is read first; when it comes back blank the rest of
    /// the quadruple is left cleared so no stale values survive.
    pub async fn read_back<S: Session + ?Sized>(&mut self, session: &mut S) -> TtmResult<()> {
        self.clear();

        let outcome_reading = session.query_print(&format!("{}.outcome", self.node)).await?;
        if is_blank(&outcome_reading) {
            let parsed = self.decoder.decode(None, None);
            self.outcome = parsed.outcome;
            self.detail = parsed.detail;
            debug!(node = self.node, "no firmware outcome; measurement not made");
            return Ok(());
        }

        let status_reading = session.query_print(&format!("{}.status", self.node)).await?;
        let reading = session
            .query_print(&format!("{}.{}", self.node, self.reading_member))
            .await?;
        let okay_reading = session.query_print(&format!("{}:isOkay()", self.node)).await?;

        let parsed = self
            .decoder
            .decode(Some(&outcome_reading), Some(&status_reading));
        self.outcome = parsed.outcome;
        self.detail = parsed.detail;

        if parsed.needs_status_register {
            // Best effort: the condition register read must not fail the
            // whole readback, it only enriches the diagnostic.
            let condition = match session.query_print_i64(MEASUREMENT_EVENT_CONDITION).await {
                // A reading outside the register's 16-bit range is as useless
                // as a failed read; both fall back to the sentinel.
                Ok(condition) => u16::try_from(condition).unwrap_or(STATUS_REGISTER_UNAVAILABLE),
                Err(err) => {
                    warn!(node = self.node, %err, "measurement event condition read failed");
                    STATUS_REGISTER_UNAVAILABLE
                }
            };
            self.detail
                .push_str(&format!("; measurement event condition: 0x{condition:04X}"));
        }

        self.readings = FirmwareReadings {
            outcome: Some(outcome_reading),
            status: Some(status_reading),
            reading: Some(reading.clone()),
            okay: Some(okay_reading),
        };

        if self.outcome.is_empty() {
            match reading.trim().parse::<f64>() {
                Ok(value) => self.value = Some(value),
                Err(_) => {
                    self.outcome = MeasurementOutcomes::MEASUREMENT_FAILED
                        | MeasurementOutcomes::UNEXPECTED_READING_FORMAT;
                    self.detail = format!(
                        "firmware reading '{}' for {}.{} is not numeric",
                        reading, self.node, self.reading_member
                    );
                }
            }
        }
        Ok(())
    }

    /// Bin a clean reading against the configured band.
    pub fn apply_limits(&mut self, low: f64, high: f64) {
        if !self.outcome.is_empty() {
            return;
        }
        match self.value {
            Some(value) if (low..=high).contains(&value) => {
                self.outcome = MeasurementOutcomes::PART_PASSED;
            }
            Some(value) => {
                self.outcome = MeasurementOutcomes::PART_FAILED;
                self.detail = format!("reading {value} outside [{low}, {high}]");
            }
            None => {
                self.outcome = MeasurementOutcomes::MEASUREMENT_NOT_MADE;
            }
        }
    }
}

fn is_blank(reading: &str) -> bool {
    let trimmed = reading.trim();
    trimmed.is_empty() || trimmed == "nil"
}
