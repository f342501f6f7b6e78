//! The meter orchestrator.
//!
//! `Meter` owns one [`MeasureSequencer`] and one [`TriggerSequencer`], the
//! session, and the four entity drivers. It arms the sequencer tick loops
//! and performs the instrument I/O each state calls for, feeding the next
//! signal back into the same sequencer. I/O failures inside a state handler
//! are logged with the activity that failed and converted into a `Failure`
//! signal; they never unwind through the tick loop, so the state machine
//! always recovers deterministically.
//!
//! All session I/O goes through one async mutex. The two sequencers never
//! run concurrently in practice (software-paced and triggered acquisition
//! are mutually exclusive modes), but the lock makes that explicit.

use crate::config::MeterSettings;
use crate::error::TtmResult;
use crate::outcome::MeasurementOutcomes;
use crate::sequencer::{
    MeasureSequencer, MeasurementSequenceSignal, MeasurementSequenceState, TriggerSequenceSignal,
    TriggerSequenceState, TriggerSequencer,
};
use crate::session::Session;
use crate::subsystem::{
    ColdResistanceKind, ColdResistanceMeasure, MeasurementConfig, ThermalTransientEstimator,
    ThermalTransientMeasure,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Poll period for explicit status-byte waits.
const STATUS_POLL_PERIOD: Duration = Duration::from_millis(10);

pub struct Meter<S: Session> {
    session: Arc<Mutex<S>>,
    config: MeasurementConfig,
    trigger_poll_timeout: Duration,
    pub initial_resistance: ColdResistanceMeasure,
    pub thermal_transient: ThermalTransientMeasure,
    pub final_resistance: ColdResistanceMeasure,
    pub estimator: ThermalTransientEstimator,
    measure_sequencer: MeasureSequencer,
    trigger_sequencer: TriggerSequencer,
    cycle_outcome: MeasurementOutcomes,
    cycle_detail: String,
}

impl<S: Session> Meter<S> {
    /// Bind a meter to an open session. All entity drivers are constructed
    /// here; a `Meter` never exists with subsystems missing.
    pub fn new(session: S, settings: &MeterSettings) -> TtmResult<Self> {
        settings.validate()?;
        let config = MeasurementConfig::resolve(settings);
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            initial_resistance: ColdResistanceMeasure::new(ColdResistanceKind::Initial, &config),
            thermal_transient: ThermalTransientMeasure::new(&config),
            final_resistance: ColdResistanceMeasure::new(ColdResistanceKind::Final, &config),
            estimator: ThermalTransientEstimator::new(&config),
            measure_sequencer: MeasureSequencer::new(),
            trigger_sequencer: TriggerSequencer::new(),
            trigger_poll_timeout: settings.trigger_poll_timeout,
            config,
            cycle_outcome: MeasurementOutcomes::empty(),
            cycle_detail: String::new(),
        })
    }

    /// Shared handle to the underlying session (tests use this to script and
    /// inspect the mock).
    pub fn session_handle(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.session)
    }

    /// Handle for enqueueing signals into the software-paced sequencer from
    /// another task (abort, external step).
    pub fn measure_sequencer(&self) -> MeasureSequencer {
        self.measure_sequencer.clone()
    }

    /// Handle for the triggered sequencer (stop, abort, progress).
    pub fn trigger_sequencer(&self) -> TriggerSequencer {
        self.trigger_sequencer.clone()
    }

    /// Outcome accumulated over the last measurement cycle.
    pub fn last_cycle_outcome(&self) -> MeasurementOutcomes {
        self.cycle_outcome
    }

    pub fn last_cycle_detail(&self) -> &str {
        &self.cycle_detail
    }

    /// Program the configured source defaults into the firmware.
    pub async fn configure_instrument(&mut self) -> TtmResult<()> {
        let mut session = self.session.lock().await;
        session
            .write_line(&format!(
                "_G.ttm.configure({}, {}, {})",
                self.config.source_current_a, self.config.voltage_limit_v, self.config.aperture_plc
            ))
            .await?;
        if self.config.contact_check_enabled {
            session
                .write_line(&format!(
                    "_G.ttm.contactCheckLimit = {}",
                    self.config.contact_check_limit_ohm
                ))
                .await?;
        }
        session.throw_device_error_if_set().await?;
        Ok(())
    }

    pub fn clear_part_measurements(&mut self) {
        self.initial_resistance.clear();
        self.thermal_transient.clear();
        self.final_resistance.clear();
        self.estimator.clear();
    }

    /// Request an orderly abort of a running software-paced cycle.
    pub fn abort_measurement_sequence(&self) {
        self.measure_sequencer.enqueue(MeasurementSequenceSignal::Abort);
    }

    /// Request an orderly stop of the triggered loop after the current pass.
    pub fn stop_trigger_sequence(&self) {
        self.trigger_sequencer.enqueue(TriggerSequenceSignal::Stop);
    }

    // ------------------------------------------------------------------
    // Software-paced measurement cycle
    // ------------------------------------------------------------------

    /// Run one full software-paced measurement cycle: cold resistance,
    /// thermal transient, settling pause, final resistance. Returns the
    /// accumulated outcome once the sequencer has settled back at rest.
    pub async fn run_measurement_cycle(&mut self) -> TtmResult<MeasurementOutcomes> {
        self.cycle_outcome = MeasurementOutcomes::empty();
        self.cycle_detail.clear();
        self.measure_sequencer.start();

        let mut ticker = interval(MeasureSequencer::TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut left_idle = false;

        loop {
            ticker.tick().await;
            let state = self.measure_sequencer.execute_tick();
            if state != MeasurementSequenceState::Idle {
                left_idle = true;
            }
            if let Err(err) = self.handle_measure_state(state).await {
                warn!(activity = %state, %err, "measurement step failed");
                self.note_failure(&err.to_string());
                self.measure_sequencer
                    .enqueue(MeasurementSequenceSignal::Failure);
            }
            if left_idle && self.measure_sequencer.state() == MeasurementSequenceState::Idle {
                break;
            }
        }
        Ok(self.cycle_outcome)
    }

    async fn handle_measure_state(&mut self, state: MeasurementSequenceState) -> TtmResult<()> {
        use MeasurementSequenceSignal as Signal;
        use MeasurementSequenceState as State;

        match state {
            State::Idle => {}
            State::Starting => {
                self.clear_part_measurements();
                self.measure_sequencer.enqueue(Signal::Step);
            }
            State::MeasureInitialResistance => {
                let outcome = {
                    let mut session = self.session.lock().await;
                    self.initial_resistance.measure(&mut *session).await?
                };
                self.cycle_outcome |= outcome;
                // The cycle only proceeds on a clean pass; anything else
                // (including a bin failure) makes pulsing the DUT pointless.
                if outcome == MeasurementOutcomes::PART_PASSED {
                    self.measure_sequencer.enqueue(Signal::Step);
                } else {
                    let detail = self.initial_resistance.outcome_detail().to_string();
                    warn!(outcome = ?outcome, %detail, "initial resistance unacceptable");
                    self.note_failure(&detail);
                    self.measure_sequencer.enqueue(Signal::Failure);
                }
            }
            State::MeasureThermalTransient => {
                let outcome = {
                    let mut session = self.session.lock().await;
                    self.thermal_transient.measure(&mut *session).await?
                };
                self.cycle_outcome |= outcome;
                if outcome.is_failure() {
                    let detail = self.thermal_transient.outcome_detail().to_string();
                    self.note_failure(&detail);
                    self.measure_sequencer.enqueue(Signal::Failure);
                } else {
                    self.measure_sequencer
                        .start_final_resistance_time(self.config.post_transient_delay);
                    self.measure_sequencer.enqueue(Signal::Step);
                }
            }
            // The pause advances on its own once the armed delay elapses.
            State::PostTransientPause => {}
            State::MeasureFinalResistance => {
                let outcome = {
                    let mut session = self.session.lock().await;
                    self.final_resistance.measure(&mut *session).await?
                };
                self.cycle_outcome |= outcome;
                if outcome.is_failure() {
                    let detail = self.final_resistance.outcome_detail().to_string();
                    self.note_failure(&detail);
                    self.measure_sequencer.enqueue(Signal::Failure);
                } else {
                    self.measure_sequencer.enqueue(Signal::Step);
                }
            }
            State::Completed => {
                info!(outcome = ?self.cycle_outcome, "measurement cycle completed");
                self.measure_sequencer.enqueue(Signal::Step);
            }
            State::Aborted => {
                warn!("measurement sequence aborted");
                self.measure_sequencer.enqueue(Signal::Step);
            }
            State::Failed => {
                warn!(detail = %self.cycle_detail, "measurement sequence failed");
                self.measure_sequencer.enqueue(Signal::Step);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Externally-triggered acquisition loop
    // ------------------------------------------------------------------

    /// Run the continuous triggered acquisition loop until a Stop or Abort
    /// settles the sequencer back at rest.
    pub async fn run_trigger_cycle(&mut self) -> TtmResult<()> {
        self.trigger_sequencer.start();

        let mut ticker = interval(TriggerSequencer::TICK_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut left_idle = false;

        loop {
            ticker.tick().await;
            let state = self.trigger_sequencer.execute_tick();
            if state != TriggerSequenceState::Idle {
                left_idle = true;
            }
            if let Err(err) = self.handle_trigger_state(state).await {
                warn!(activity = %state, %err, "trigger step failed");
                self.trigger_sequencer.enqueue(TriggerSequenceSignal::Failure);
            }
            if left_idle && self.trigger_sequencer.state() == TriggerSequenceState::Idle {
                break;
            }
        }
        Ok(())
    }

    async fn handle_trigger_state(&mut self, state: TriggerSequenceState) -> TtmResult<()> {
        use TriggerSequenceSignal as Signal;
        use TriggerSequenceState as State;

        match state {
            State::Idle => {}
            State::Starting => {
                let mut session = self.session.lock().await;
                session.write_line("_G.ttm.prepareForTrigger()").await?;
                session.throw_device_error_if_set().await?;
                drop(session);
                self.trigger_sequencer.enqueue(Signal::Step);
            }
            State::WaitingForTrigger => {
                let mut session = self.session.lock().await;
                if self.trigger_sequencer.take_assert_requested() {
                    debug!("asserting hardware trigger to unblock firmware wait loop");
                    session.assert_trigger().await?;
                }
                let status = session.read_status_byte().await?;
                if status.is_message_available() {
                    // The firmware prints its completion handshake when the
                    // triggered measurement finishes.
                    let completion = session.read_line_trim_end().await?;
                    debug!(%completion, "triggered measurement completed");
                    self.trigger_sequencer.enqueue(Signal::Step);
                }
            }
            State::MeasurementCompleted => {
                self.clear_part_measurements();
                self.trigger_sequencer.enqueue(Signal::Step);
            }
            State::ReadingValues => {
                self.read_measurements().await?;
                self.trigger_sequencer.enqueue(Signal::Step);
            }
            State::Aborted | State::Failed | State::Stopped => {
                self.trigger_sequencer.enqueue(Signal::Step);
            }
        }
        Ok(())
    }

    /// Read back all entity values after a firmware-side triggered cycle.
    pub async fn read_measurements(&mut self) -> TtmResult<()> {
        let mut session = self.session.lock().await;
        self.initial_resistance.read_values(&mut *session).await?;
        self.thermal_transient.read_values(&mut *session).await?;
        self.final_resistance.read_values(&mut *session).await?;
        self.estimator.read_values(&mut *session).await?;
        Ok(())
    }

    /// Shutdown path: if the triggered loop is active, assert a hardware
    /// trigger so the firmware's internal wait exits, allow it a bounded
    /// settling window, then queue the abort.
    pub async fn abort_trigger_sequence_if(&mut self) -> TtmResult<()> {
        match self.trigger_sequencer.state() {
            TriggerSequenceState::Idle
            | TriggerSequenceState::Stopped
            | TriggerSequenceState::Aborted
            | TriggerSequenceState::Failed => return Ok(()),
            _ => {}
        }
        {
            let mut session = self.session.lock().await;
            session.assert_trigger().await?;
        }
        // Give the firmware wait loop time to exit before tearing down.
        tokio::time::sleep(self.config.post_transient_delay * 2).await;
        self.trigger_sequencer.enqueue(TriggerSequenceSignal::Abort);
        Ok(())
    }

    /// Poll the status byte until the message-available bit is set or the
    /// timeout elapses. Returns whether the bit was observed.
    pub async fn wait_for_message_available(&self, timeout: Duration) -> TtmResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut session = self.session.lock().await;
                if session.read_status_byte().await?.is_message_available() {
                    return Ok(true);
                }
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(STATUS_POLL_PERIOD).await;
        }
    }

    /// Default bound for message-available waits, from the settings.
    pub fn trigger_poll_timeout(&self) -> Duration {
        self.trigger_poll_timeout
    }

    fn note_failure(&mut self, detail: &str) {
        if detail.is_empty() {
            return;
        }
        if !self.cycle_detail.is_empty() {
            self.cycle_detail.push_str("; ");
        }
        self.cycle_detail.push_str(detail);
    }
}

impl<S: Session> std::fmt::Debug for Meter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Meter")
            .field("measure_state", &self.measure_sequencer.state())
            .field("trigger_state", &self.trigger_sequencer.state())
            .field("cycle_outcome", &self.cycle_outcome)
            .finish_non_exhaustive()
    }
}
