//! The boundary with the VISA/TSP transport.
//!
//! The meter core never talks to a wire directly; everything it needs from
//! the session layer is captured by the [`Session`] trait: line-oriented
//! writes, blocking line reads, status-byte polling, hardware trigger
//! asserts, and the instrument error queue. The TSP `print(...)` query
//! helpers are provided methods, so every implementation gets the same
//! write-then-read discipline.
//!
//! A scriptable [`mock::MockSession`] lives alongside the trait and backs the
//! unit and integration tests.

pub mod mock;

use crate::error::{TtmError, TtmResult};
use async_trait::async_trait;
use bitflags::bitflags;

bitflags! {
    /// IEEE 488.2 status byte as reported by a 2600-series instrument.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ServiceRequests: u8 {
        /// Measurement event summary bit.
        const MEASUREMENT_EVENT = 0b0000_0001;
        /// System event summary bit.
        const SYSTEM_EVENT = 0b0000_0010;
        /// Error available: the device error queue is not empty.
        const ERROR_AVAILABLE = 0b0000_0100;
        /// Questionable event summary bit.
        const QUESTIONABLE_EVENT = 0b0000_1000;
        /// Message available: output buffer holds a reply line.
        const MESSAGE_AVAILABLE = 0b0001_0000;
        /// Standard event summary bit.
        const STANDARD_EVENT = 0b0010_0000;
        /// Master summary / requesting service.
        const REQUESTING_SERVICE = 0b0100_0000;
        /// Operation event summary bit.
        const OPERATION_EVENT = 0b1000_0000;
    }
}

impl ServiceRequests {
    pub fn is_message_available(self) -> bool {
        self.contains(ServiceRequests::MESSAGE_AVAILABLE)
    }

    pub fn is_error_available(self) -> bool {
        self.contains(ServiceRequests::ERROR_AVAILABLE)
    }

    pub fn is_measurement_event(self) -> bool {
        self.contains(ServiceRequests::MEASUREMENT_EVENT)
    }
}

/// One entry from the instrument error queue (`errorqueue.next()`).
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceError {
    pub code: i64,
    pub message: String,
}

impl From<DeviceError> for TtmError {
    fn from(value: DeviceError) -> Self {
        TtmError::Device {
            code: value.code,
            message: value.message,
        }
    }
}

/// A line-oriented TSP session.
///
/// All I/O is serialized by the caller (the meter holds the session behind a
/// single async mutex), so implementations do not need internal locking.
#[async_trait]
pub trait Session: Send {
    /// The VISA resource name this session is bound to.
    fn resource_name(&self) -> &str;

    /// Write one command line, newline-terminated by the transport.
    /// Returns the number of bytes written.
    async fn write_line(&mut self, command: &str) -> TtmResult<usize>;

    /// Blocking read of one reply line with the line terminator trimmed.
    async fn read_line_trim_end(&mut self) -> TtmResult<String>;

    /// Serial-poll the status byte without disturbing the output buffer.
    async fn read_status_byte(&mut self) -> TtmResult<ServiceRequests>;

    /// Issue a hardware trigger pulse.
    async fn assert_trigger(&mut self) -> TtmResult<()>;

    /// Pop the next entry from the instrument error queue, if any.
    async fn next_device_error(&mut self) -> TtmResult<Option<DeviceError>>;

    /// Write `print(<expr>)` and read back the textual reply.
    async fn query_print(&mut self, expr: &str) -> TtmResult<String> {
        self.write_line(&format!("print({expr})")).await?;
        self.read_line_trim_end().await
    }

    /// Query an expression the firmware prints as a signed integer.
    async fn query_print_i64(&mut self, expr: &str) -> TtmResult<i64> {
        let reading = self.query_print(expr).await?;
        parse_firmware_number(&reading)
    }

    /// Query an expression the firmware prints as a float.
    async fn query_print_f64(&mut self, expr: &str) -> TtmResult<f64> {
        let reading = self.query_print(expr).await?;
        reading.trim().parse::<f64>().map_err(|_| TtmError::Parse {
            reading,
            target: "f64",
        })
    }

    /// Query an expression the firmware prints as a Lua boolean.
    async fn query_print_bool(&mut self, expr: &str) -> TtmResult<bool> {
        let reading = self.query_print(expr).await?;
        match reading.trim() {
            "true" => Ok(true),
            "false" | "nil" => Ok(false),
            _ => Err(TtmError::Parse {
                reading,
                target: "bool",
            }),
        }
    }

    /// Surface a pending instrument error as a [`TtmError::Device`].
    ///
    /// Checks the error-available bit first so the common no-error case costs
    /// a single serial poll.
    async fn throw_device_error_if_set(&mut self) -> TtmResult<()> {
        let status = self.read_status_byte().await?;
        if !status.is_error_available() {
            return Ok(());
        }
        match self.next_device_error().await? {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }
}

/// Parse a TSP numeric print, which comes back as a Lua float
/// ("2.000000000e+00") even for integral values.
pub(crate) fn parse_firmware_number(reading: &str) -> TtmResult<i64> {
    let trimmed = reading.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(value);
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.fract() == 0.0 => Ok(value as i64),
        _ => Err(TtmError::Parse {
            reading: reading.to_string(),
            target: "i64",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bit_helpers() {
        let status = ServiceRequests::MESSAGE_AVAILABLE | ServiceRequests::ERROR_AVAILABLE;
        assert!(status.is_message_available());
        assert!(status.is_error_available());
        assert!(!status.is_measurement_event());
        assert!(!ServiceRequests::empty().is_message_available());
    }

    #[test]
    fn parses_lua_float_prints_as_integers() {
        assert_eq!(parse_firmware_number("0").unwrap(), 0);
        assert_eq!(parse_firmware_number("-1").unwrap(), -1);
        assert_eq!(parse_firmware_number("2.000000000e+00").unwrap(), 2);
        assert_eq!(parse_firmware_number(" 64 \t").unwrap(), 64);
        assert!(parse_firmware_number("abc").is_err());
        assert!(parse_firmware_number("1.5").is_err());
    }
}
