//! # Frame Module
//!
//! Telemetry frames as they arrive from the base station radio.
//!
//! This module handles:
//! - The raw line type and the parsed 16-field record type
//! - Cheap character-class corruption detection
//! - Splitting and numeric conversion of well-formed lines

pub mod protocol;
pub mod validator;
pub mod parser;

pub use parser::parse;
pub use protocol::{RawFrame, TelemetryRecord};
pub use validator::is_well_formed;
