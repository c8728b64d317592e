//! # Telemetry Module
//!
//! Where received telemetry ends up.
//!
//! This module handles:
//! - The in-memory, time-ordered store of parsed records read by consumers
//! - The durable CSV log of every raw line, parsed or not
//! - The optional rotating JSONL export of parsed records

pub mod durable_log;
pub mod export;
pub mod store;

pub use durable_log::{DurableLog, FrameRecorder};
pub use export::RecordExporter;
pub use store::{StoreWriter, TelemetryStore};
