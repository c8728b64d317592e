//! # Telemetry Frame Definitions
//!
//! Constants and types for the comma-separated telemetry line format.
//!
//! ## Line Structure
//!
//! ```text
//! lat,lon,speed,alt,temp,humid,press,eco2,co2,tvoc,no2,pm1,pm25,pm10,rssi,snr\r\n
//! ```
//!
//! Sixteen decimal fields separated by commas, terminated by a line ending.
//! No checksum is carried, so corruption can only be detected by character class.

use chrono::{DateTime, Local};
use serde::Serialize;

/// Number of fields in a telemetry line
pub const TELEMETRY_FIELD_COUNT: usize = 16;

/// Separator between fields
pub const FIELD_DELIMITER: char = ',';

/// Semantic field names, in wire order
pub const FIELD_NAMES: [&str; TELEMETRY_FIELD_COUNT] = [
    "latitude",
    "longitude",
    "speed",
    "altitude",
    "temperature",
    "humidity",
    "pressure",
    "eco2",
    "co2",
    "tvoc",
    "no2",
    "pm1_0",
    "pm2_5",
    "pm10",
    "rssi",
    "snr",
];

/// Header row written once at the top of every durable log file
pub const LOG_HEADER: [&str; TELEMETRY_FIELD_COUNT + 1] = [
    "Time",
    "Latitude",
    "Longitude",
    "Speed",
    "Altitude",
    "Temp",
    "Humidity",
    "Pressure",
    "eCO2",
    "CO2",
    "TVOC",
    "NO2",
    "PM1.0",
    "PM2.5",
    "PM10",
    "RSSI",
    "SNR",
];

/// One line exactly as received from the link, minus its line ending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    content: String,
    received_at: DateTime<Local>,
}

impl RawFrame {
    /// Create a frame from already-decoded text
    pub fn new(content: impl Into<String>, received_at: DateTime<Local>) -> Self {
        Self {
            content: content.into(),
            received_at,
        }
    }

    /// Create a frame from the bytes of one line read off the link
    ///
    /// Strips a trailing `\n` or `\r\n`. Bytes that are not valid UTF-8 are
    /// replaced with U+FFFD so the validator will reject the line while the
    /// durable log still keeps it.
    pub fn from_bytes(line: &[u8], received_at: DateTime<Local>) -> Self {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        Self::new(String::from_utf8_lossy(line).into_owned(), received_at)
    }

    /// Line text without the line ending
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Time the line was read off the link
    pub fn received_at(&self) -> DateTime<Local> {
        self.received_at
    }
}

/// A validated, parsed telemetry reading.
///
/// Only ever built by [`parse`](super::parse) from a frame that passed
/// validation, so every field is present and finite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    /// Receipt time of the originating frame
    pub timestamp: DateTime<Local>,
    /// Degrees
    pub latitude: f64,
    /// Degrees
    pub longitude: f64,
    /// km/h
    pub speed: f64,
    /// Meters
    pub altitude: f64,
    /// Celsius
    pub temperature: f64,
    /// Percent
    pub humidity: f64,
    /// Pascal
    pub pressure: f64,
    /// ppm
    pub eco2: f64,
    /// ppm
    pub co2: f64,
    /// ug/m^3
    pub tvoc: f64,
    /// ppm
    pub no2: f64,
    pub pm1_0: f64,
    pub pm2_5: f64,
    pub pm10: f64,
    /// dBm, as measured by the base station radio
    pub rssi: f64,
    /// dB
    pub snr: f64,
}

impl TelemetryRecord {
    /// Build a record from fields in wire order
    pub fn from_fields(timestamp: DateTime<Local>, fields: [f64; TELEMETRY_FIELD_COUNT]) -> Self {
        let [latitude, longitude, speed, altitude, temperature, humidity, pressure, eco2, co2, tvoc, no2, pm1_0, pm2_5, pm10, rssi, snr] =
            fields;

        Self {
            timestamp,
            latitude,
            longitude,
            speed,
            altitude,
            temperature,
            humidity,
            pressure,
            eco2,
            co2,
            tvoc,
            no2,
            pm1_0,
            pm2_5,
            pm10,
            rssi,
            snr,
        }
    }

    /// Fields in wire order
    pub fn fields(&self) -> [f64; TELEMETRY_FIELD_COUNT] {
        [
            self.latitude,
            self.longitude,
            self.speed,
            self.altitude,
            self.temperature,
            self.humidity,
            self.pressure,
            self.eco2,
            self.co2,
            self.tvoc,
            self.no2,
            self.pm1_0,
            self.pm2_5,
            self.pm10,
            self.rssi,
            self.snr,
        ]
    }

    /// Format the fields back into a telemetry line (without line ending)
    pub fn to_line(&self) -> String {
        self.fields()
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether the unit has a GPS lock
    ///
    /// The unit transmits zero coordinates until its receiver gets a fix, so
    /// only the integer part of the latitude is checked.
    pub fn has_position_fix(&self) -> bool {
        self.latitude.trunc() != 0.0
    }
}
