//! # Thermal Transient Meter driver
//!
//! Measurement sequencing core for a thermal transient meter (TTM) built on
//! a Keithley 2600-series source measure unit. The instrument runs a TSP
//! (Lua) firmware script; this crate drives it over a line-oriented VISA
//! session, orchestrating the multi-step electrical sequence on a device
//! under test: cold resistance, thermal transient pulse, settling pause,
//! final resistance.
//!
//! ## Crate Structure
//!
//! - **`config`**: settings loaded from TOML (`config::Settings`), validated
//!   before the meter touches the instrument.
//! - **`error`**: the crate-wide `TtmError` enum.
//! - **`logging`**: `tracing` subscriber bootstrap.
//! - **`session`**: the `Session` trait at the VISA/TSP boundary, status-byte
//!   bitflags, and the scriptable mock used by the tests.
//! - **`outcome`**: bit-exact decoding of firmware outcome words into
//!   `MeasurementOutcomes`.
//! - **`sequencer`**: the two timer-driven state machines, software-paced
//!   (`MeasureSequencer`) and hardware-triggered (`TriggerSequencer`), plus
//!   their shared signal queue.
//! - **`subsystem`**: per-entity measurement drivers (initial/final cold
//!   resistance, thermal transient, estimator readout).
//! - **`meter`**: the `Meter` orchestrator binding sequencer states to
//!   instrument I/O.

pub mod config;
pub mod error;
pub mod logging;
pub mod meter;
pub mod outcome;
pub mod sequencer;
pub mod session;
pub mod subsystem;

pub use config::{MeterSettings, Settings};
pub use error::{TtmError, TtmResult};
pub use meter::Meter;
pub use outcome::{FirmwareGeneration, FirmwareOutcomes, MeasurementOutcomes, OutcomeDecoder};
pub use sequencer::{
    MeasureSequencer, MeasurementSequenceSignal, MeasurementSequenceState, TriggerSequenceSignal,
    TriggerSequenceState, TriggerSequencer,
};
pub use session::{DeviceError, ServiceRequests, Session};
