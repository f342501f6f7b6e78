//! Custom error types for the crate.
//!
//! This module defines the primary error type, `TtmError`, used across the
//! driver. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different failure classes of the meter:
//!
//! - **`Config`**: Wraps errors from the `config` crate (file parsing, format).
//! - **`Configuration`**: Semantic errors in the configuration, caught by the
//!   validation step after a successful parse (e.g., a zero aperture).
//! - **`Io`**: Wraps standard `std::io::Error` from the transport.
//! - **`Session`**: Communication failures at the VISA/TSP session boundary
//!   (write failures, missing replies, closed sessions).
//! - **`Device`**: An error the instrument itself reported through its error
//!   queue, surfaced with the firmware code and message.
//! - **`Parse`**: A textual instrument reply that did not parse as the
//!   expected type.
//! - **`Measurement`**: A measurement step that the firmware reported as
//!   failed; carries the decoded outcome detail.
//! - **`Timeout`**: An elapsed-time poll that gave up waiting.
//!
//! By using `#[from]`, `TtmError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the crate with `?`.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type TtmResult<T> = std::result::Result<T, TtmError>;

#[derive(Error, Debug)]
pub enum TtmError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Device error {code}: {message}")]
    Device { code: i64, message: String },

    #[error("Failed parsing reply '{reading}' as {target}")]
    Parse {
        reading: String,
        target: &'static str,
    },

    #[error("Measurement failed: {0}")]
    Measurement(String),

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(std::time::Duration, &'static str),
}

impl TtmError {
    /// True when the error came from the instrument's own error queue rather
    /// than from the transport or this crate.
    pub fn is_device_error(&self) -> bool {
        matches!(self, TtmError::Device { .. })
    }
}
