//! Firmware outcome decoding.
//!
//! Every measurement entity on the instrument reports a signed integer
//! outcome word. This module decodes that word, plus the optional textual
//! status reading next to it, into a [`MeasurementOutcomes`] bitmask and a
//! diagnostic detail string. The bit layout must match the firmware exactly;
//! do not renumber anything here.

use crate::error::{TtmError, TtmResult};
use bitflags::bitflags;

bitflags! {
    /// Decoded measurement outcome.
    ///
    /// Values are fixed by the host-side contract; `UNKNOWN_OUTCOME` is the
    /// historical alias for the three reserved high bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MeasurementOutcomes: u16 {
        const PART_PASSED = 1;
        const PART_FAILED = 2;
        const MEASUREMENT_FAILED = 4;
        const MEASUREMENT_NOT_MADE = 8;
        const HIT_COMPLIANCE = 16;
        const UNEXPECTED_READING_FORMAT = 32;
        const UNEXPECTED_OUTCOME_FORMAT = 64;
        const UNSPECIFIED_FIRMWARE_OUTCOME = 128;
        const UNSPECIFIED_PROGRAM_FAILURE = 256;
        const DEVICE_ERROR = 512;
        const FAILED_CONTACT_CHECK = 1024;
        const OPEN_LEADS = 2048;
        const RESERVED_4096 = 4096;
        const RESERVED_8192 = 8192;
        const UNKNOWN_OUTCOME = 2048 | 4096 | 8192;
    }
}

impl MeasurementOutcomes {
    /// True when any failure bit is set (anything beyond pass/fail binning).
    pub fn is_failure(self) -> bool {
        self.intersects(
            MeasurementOutcomes::MEASUREMENT_FAILED
                | MeasurementOutcomes::MEASUREMENT_NOT_MADE
                | MeasurementOutcomes::HIT_COMPLIANCE
                | MeasurementOutcomes::UNEXPECTED_READING_FORMAT
                | MeasurementOutcomes::UNEXPECTED_OUTCOME_FORMAT
                | MeasurementOutcomes::UNSPECIFIED_FIRMWARE_OUTCOME
                | MeasurementOutcomes::UNSPECIFIED_PROGRAM_FAILURE
                | MeasurementOutcomes::DEVICE_ERROR
                | MeasurementOutcomes::FAILED_CONTACT_CHECK
                | MeasurementOutcomes::OPEN_LEADS,
        )
    }
}

bitflags! {
    /// Outcome word bit layout as the firmware defines it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FirmwareOutcomes: u32 {
        const BAD_STATUS = 1;
        const BAD_TIME_STAMPS = 2;
        const CONFIG_FAILED = 4;
        const INITIATION_FAILED = 8;
        const LOAD_FAILED = 16;
        const MEASUREMENT_FAILED = 32;
        const OPEN_LEADS = 64;
    }
}

/// Sentinel appended to the detail when the live measurement event condition
/// register could not be read.
pub const STATUS_REGISTER_UNAVAILABLE: u16 = 0xFFFF;

/// Firmware generation, selecting how many outcome bits are defined.
///
/// Legacy meters stop at `LoadFailed`; anything above bit 4 is an unknown
/// high bit there. Current firmware defines bits through `OpenLeads`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirmwareGeneration {
    Legacy,
    #[default]
    Current,
}

impl FirmwareGeneration {
    /// Mask of outcome bits this generation defines.
    pub fn known_bits(self) -> i64 {
        match self {
            // !31 marks the unknown high bits on legacy meters.
            FirmwareGeneration::Legacy => i64::from(FirmwareOutcomes::LOAD_FAILED.bits()) * 2 - 1,
            // 2 * OpenLeads - 1.
            FirmwareGeneration::Current => i64::from(FirmwareOutcomes::OPEN_LEADS.bits()) * 2 - 1,
        }
    }
}

/// Result of decoding one outcome reading.
#[derive(Debug, Clone, Default)]
pub struct ParsedOutcome {
    pub outcome: MeasurementOutcomes,
    pub detail: String,
    /// The bad-status bit was set; the caller should read the live
    /// measurement event condition register and append it to the detail.
    pub needs_status_register: bool,
}

impl ParsedOutcome {
    fn new(outcome: MeasurementOutcomes, detail: impl Into<String>) -> Self {
        Self {
            outcome,
            detail: detail.into(),
            needs_status_register: false,
        }
    }
}

/// Decodes firmware outcome words for one measurement entity.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutcomeDecoder {
    generation: FirmwareGeneration,
}

impl OutcomeDecoder {
    pub fn new(generation: FirmwareGeneration) -> Self {
        Self { generation }
    }

    /// Decode a raw textual outcome reading plus the adjacent status reading.
    ///
    /// The decoding ladder, in order:
    /// 1. missing/blank outcome reading: the measurement was never made;
    /// 2. unparseable text: reading format failure;
    /// 3. negative value: outcome format failure;
    /// 4. zero: success, no flags;
    /// 5. positive: measurement failed, with per-bit refinement.
    pub fn decode(&self, outcome_reading: Option<&str>, status_reading: Option<&str>) -> ParsedOutcome {
        let raw = match outcome_reading.map(str::trim) {
            None | Some("") | Some("nil") => {
                return ParsedOutcome::new(
                    MeasurementOutcomes::MEASUREMENT_NOT_MADE,
                    "Measurement not made: firmware reported no outcome",
                );
            }
            Some(raw) => raw,
        };

        let value = match parse_outcome_word(raw) {
            Ok(value) => value,
            Err(_) => {
                return ParsedOutcome::new(
                    MeasurementOutcomes::MEASUREMENT_FAILED
                        | MeasurementOutcomes::UNEXPECTED_READING_FORMAT,
                    format!(
                        "Unexpected reading format: outcome reading '{raw}' is not an integer \
                         (while decoding firmware outcome)"
                    ),
                );
            }
        };

        if value < 0 {
            return ParsedOutcome::new(
                MeasurementOutcomes::MEASUREMENT_FAILED
                    | MeasurementOutcomes::UNEXPECTED_OUTCOME_FORMAT,
                format!("Unexpected outcome format: firmware outcome {value} is negative"),
            );
        }

        if value == 0 {
            return ParsedOutcome::new(MeasurementOutcomes::empty(), "");
        }

        self.decode_nonzero(value, status_reading)
    }

    fn decode_nonzero(&self, value: i64, status_reading: Option<&str>) -> ParsedOutcome {
        let mut outcome = MeasurementOutcomes::MEASUREMENT_FAILED;
        let mut details: Vec<String> = Vec::new();
        let mut needs_status_register = false;
        let bits = FirmwareOutcomes::from_bits_truncate(value as u32);

        if bits.contains(FirmwareOutcomes::BAD_STATUS) {
            outcome |= MeasurementOutcomes::DEVICE_ERROR;
            needs_status_register = true;
            match status_reading.map(str::trim) {
                Some(status) if !status.is_empty() && status != "nil" => {
                    details.push(format!("bad status; firmware status reading: {status}"));
                }
                _ => details.push("bad status; no firmware status reading".to_string()),
            }
        }
        if bits.contains(FirmwareOutcomes::BAD_TIME_STAMPS) {
            outcome |= MeasurementOutcomes::UNSPECIFIED_FIRMWARE_OUTCOME;
            details.push("sampling returned bad time stamps".to_string());
        }
        if bits.contains(FirmwareOutcomes::CONFIG_FAILED) {
            outcome |= MeasurementOutcomes::UNSPECIFIED_PROGRAM_FAILURE;
            details.push("measurement configuration failed".to_string());
        }
        if bits.contains(FirmwareOutcomes::INITIATION_FAILED) {
            outcome |= MeasurementOutcomes::UNSPECIFIED_PROGRAM_FAILURE;
            details.push("measurement initiation failed".to_string());
        }
        if bits.contains(FirmwareOutcomes::LOAD_FAILED) {
            outcome |= MeasurementOutcomes::UNSPECIFIED_PROGRAM_FAILURE;
            details.push("firmware script load failed".to_string());
        }
        if bits.contains(FirmwareOutcomes::MEASUREMENT_FAILED) {
            details.push("firmware reported a failed measurement".to_string());
        }
        if bits.contains(FirmwareOutcomes::OPEN_LEADS) {
            outcome |= MeasurementOutcomes::OPEN_LEADS;
            details.push("open leads detected".to_string());
        }

        let unknown = value & !self.generation.known_bits();
        if unknown != 0 {
            outcome |= MeasurementOutcomes::UNKNOWN_OUTCOME
                | MeasurementOutcomes::UNSPECIFIED_FIRMWARE_OUTCOME;
            details.push(format!("outcome has undefined high bits 0x{unknown:X}"));
        }

        ParsedOutcome {
            outcome,
            detail: format!("firmware outcome {value}: {}", details.join("; ")),
            needs_status_register,
        }
    }
}

/// The firmware prints the outcome word as a Lua number, so both "16" and
/// "1.600000000e+01" must decode to 16.
fn parse_outcome_word(raw: &str) -> TtmResult<i64> {
    if let Ok(value) = raw.parse::<i64>() {
        return Ok(value);
    }
    match raw.parse::<f64>() {
        Ok(value) if value.fract() == 0.0 => Ok(value as i64),
        _ => Err(TtmError::Parse {
            reading: raw.to_string(),
            target: "outcome word",
        }),
    }
}
