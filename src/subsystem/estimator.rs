//! Thermal transient estimator readout.
//!
//! The firmware fits the sampled transient to a pulse response model and
//! exposes the fit results on the `ttm.est` table. The host never runs the
//! fit itself; this driver only reads the estimates back alongside their
//! outcome word.

use super::{MeasurementConfig, SubsystemCore};
use crate::error::TtmResult;
use crate::outcome::MeasurementOutcomes;
use crate::session::Session;

#[derive(Debug)]
pub struct ThermalTransientEstimator {
    core: SubsystemCore,
    /// Fitted asymptotic voltage, volts.
    asymptote_v: Option<f64>,
}

impl ThermalTransientEstimator {
    pub fn new(config: &MeasurementConfig) -> Self {
        Self {
            core: SubsystemCore::new("ttm.est", "timeConstant", config.generation),
            asymptote_v: None,
        }
    }

    /// Fitted thermal time constant, seconds.
    pub fn time_constant(&self) -> Option<f64> {
        self.core.value
    }

    pub fn asymptote(&self) -> Option<f64> {
        self.asymptote_v
    }

    pub fn outcome(&self) -> MeasurementOutcomes {
        self.core.outcome
    }

    pub fn outcome_detail(&self) -> &str {
        &self.core.detail
    }

    pub fn clear(&mut self) {
        self.core.clear();
        self.asymptote_v = None;
    }

    /// Read the fit results; valid only after a transient measurement.
    pub async fn read_values<S: Session + ?Sized>(&mut self, session: &mut S) -> TtmResult<()> {
        self.asymptote_v = None;
        self.core.read_back(session).await?;
        if self.core.outcome.is_empty() {
            // Secondary estimate; a parse failure here is not fatal, the
            // primary time constant already decoded cleanly.
            let reading = session.query_print("ttm.est.asymptote").await?;
            self.asymptote_v = reading.trim().parse::<f64>().ok();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::MockSession;

    fn config() -> MeasurementConfig {
        MeasurementConfig::resolve(&crate::config::MeterSettings::default())
    }

    #[tokio::test]
    async fn reads_fit_results() {
        let mut session = MockSession::new("mock::INSTR");
        session.stub_print("ttm.est.outcome", "0");
        session.stub_print("ttm.est.status", "0");
        session.stub_print("ttm.est.timeConstant", "0.0021");
        session.stub_print("ttm.est:isOkay()", "true");
        session.stub_print("ttm.est.asymptote", "0.0145");
        let mut estimator = ThermalTransientEstimator::new(&config());
        estimator.read_values(&mut session).await.unwrap();
        assert!(estimator.outcome().is_empty());
        assert_eq!(estimator.time_constant(), Some(0.0021));
        assert_eq!(estimator.asymptote(), Some(0.0145));
    }

    #[tokio::test]
    async fn missing_fit_reports_not_made() {
        let mut session = MockSession::new("mock::INSTR");
        session.stub_print("ttm.est.outcome", "nil");
        let mut estimator = ThermalTransientEstimator::new(&config());
        estimator.read_values(&mut session).await.unwrap();
        assert_eq!(
            estimator.outcome(),
            MeasurementOutcomes::MEASUREMENT_NOT_MADE
        );
        assert!(estimator.time_constant().is_none());
        assert!(estimator.asymptote().is_none());
    }
}
