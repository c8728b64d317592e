//! # CanSat Ground Station Library
//!
//! Receive telemetry from a CanSat over the base station's serial radio link.
//!
//! This library provides the ingest core: it keeps the link open across
//! dropouts, separates corrupted lines from usable ones, logs every received
//! line durably, and exposes parsed readings to display consumers through a
//! concurrently readable store.

pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod pipeline;
pub mod serial;
pub mod telemetry;
