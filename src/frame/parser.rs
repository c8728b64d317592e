//! # Frame Parser
//!
//! Converts a well-formed telemetry line into a [`TelemetryRecord`].

use super::protocol::{RawFrame, TelemetryRecord, FIELD_DELIMITER, FIELD_NAMES, TELEMETRY_FIELD_COUNT};
use crate::error::ParseError;

/// Parse a validated frame into a record
///
/// The record is stamped with the frame's receipt time, not the time of
/// parsing. Character classes are not re-checked; callers are expected to
/// run [`is_well_formed`](super::is_well_formed) first.
///
/// # Arguments
///
/// * `frame` - Frame that passed validation
///
/// # Returns
///
/// * `Result<TelemetryRecord, ParseError>` - Parsed record, or why it was rejected
///
/// # Errors
///
/// - `FieldCountMismatch` if the line does not split into exactly 16 fields
/// - `NotNumeric` if any field is not a finite decimal number
pub fn parse(frame: &RawFrame) -> Result<TelemetryRecord, ParseError> {
    let fields = parse_fields(frame.content())?;
    Ok(TelemetryRecord::from_fields(frame.received_at(), fields))
}

/// Split a line on commas and convert each field to `f64`
pub fn parse_fields(line: &str) -> Result<[f64; TELEMETRY_FIELD_COUNT], ParseError> {
    let found = line.split(FIELD_DELIMITER).count();
    if found != TELEMETRY_FIELD_COUNT {
        return Err(ParseError::FieldCountMismatch {
            expected: TELEMETRY_FIELD_COUNT,
            found,
        });
    }

    let mut fields = [0.0; TELEMETRY_FIELD_COUNT];

    for (index, (slot, text)) in fields.iter_mut().zip(line.split(FIELD_DELIMITER)).enumerate() {
        match text.parse::<f64>() {
            Ok(value) if value.is_finite() => *slot = value,
            _ => {
                return Err(ParseError::NotNumeric {
                    index,
                    field: FIELD_NAMES[index],
                    value: text.to_string(),
                })
            }
        }
    }

    Ok(fields)
}
