//! # Frame Validator
//!
//! Character-class corruption check for telemetry lines.
//!
//! Radio noise tends to show up as letters, control characters or replacement
//! characters in the line. A digit that flipped into another digit cannot be
//! detected here and will pass through; that is accepted.
//!
//! Allowed characters:
//! - ASCII digits `0-9`
//! - `,` (field delimiter) and `.` (decimal point)
//! - `-` only as the first character of a field (RSSI is negative)

use super::protocol::FIELD_DELIMITER;

/// Check whether a line contains only characters a telemetry line may contain
///
/// This is a syntactic check only. A well-formed line may still fail
/// [`parse`](super::parse), e.g. because of a wrong field count or a
/// field like `1.2.3`.
///
/// # Examples
///
/// ```
/// use cansat_ground_station::frame::is_well_formed;
///
/// assert!(is_well_formed("57.0,25.0,-60"));
/// assert!(!is_well_formed("57.0,25.0,AB"));
/// ```
pub fn is_well_formed(line: &str) -> bool {
    find_corruption(line).is_none()
}

/// Locate the first character that marks a line as corrupted
///
/// # Returns
///
/// * `Option<(usize, char)>` - Char index and character of the first violation,
///   or `None` if the line is well-formed
pub fn find_corruption(line: &str) -> Option<(usize, char)> {
    let mut at_field_start = true;

    for (index, c) in line.chars().enumerate() {
        let allowed = match c {
            '0'..='9' | '.' => true,
            c if c == FIELD_DELIMITER => true,
            '-' => at_field_start,
            _ => false,
        };

        if !allowed {
            return Some((index, c));
        }

        at_field_start = c == FIELD_DELIMITER;
    }

    None
}
