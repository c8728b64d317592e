//! # Durable Raw Frame Log
//!
//! Append-only CSV record of every line received from the link, whether or
//! not it could be parsed.
//!
//! ## File Layout
//!
//! ```text
//! Time,Latitude,Longitude,...,RSSI,SNR
//! 12:00:01,"57.0,25.0,12.3,...,-60,9",ok
//! 12:00:02,"57.0,25.0,AB,100.0",corrupted
//! ```
//!
//! The header names the sixteen telemetry fields for tools that split the
//! raw column. Each entry row holds the local receipt time (`HH:MM:SS`), the
//! raw line, and the validation outcome.
//!
//! A new file with a unique name is created at startup; existing files are
//! never opened for writing, so a restart cannot overwrite a previous run.

use csv::WriterBuilder;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::DurableLogConfig;
use crate::error::PersistenceError;
use crate::frame::protocol::LOG_HEADER;
use crate::frame::RawFrame;

/// Receipt time format of each entry
const TIME_FORMAT: &str = "%H:%M:%S";

/// Give up looking for an unused file name after this many candidates
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Sink for every raw frame the pipeline receives
#[cfg_attr(test, mockall::automock)]
pub trait FrameRecorder: Send {
    /// Append one entry for `frame`, tagged with its validation outcome
    fn record(&mut self, frame: &RawFrame, well_formed: bool) -> Result<(), PersistenceError>;
}

/// CSV-backed [`FrameRecorder`]
pub struct DurableLog {
    file: File,
    path: PathBuf,
    sync_each_write: bool,
    entries: u64,
    /// Bytes known to hold complete rows
    len: u64,
}

impl std::fmt::Debug for DurableLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableLog")
            .field("path", &self.path)
            .field("sync_each_write", &self.sync_each_write)
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl DurableLog {
    /// Create a new log file in `dir`
    ///
    /// The file is named `<prefix>_<YYYYmmdd_HHMMSS>.csv`, with a numeric
    /// suffix added if that name is taken. The header row is written and
    /// synced before returning.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory for log files (created if missing)
    /// * `prefix` - File name prefix
    /// * `sync_each_write` - fsync after every entry; when false each entry is
    ///   only flushed to the OS and may be lost on power failure
    ///
    /// # Errors
    ///
    /// Returns error if the directory or file cannot be created
    pub fn create(dir: impl AsRef<Path>, prefix: &str, sync_each_write: bool) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let (mut file, path) = create_unique(dir, prefix)?;

        let header = encode_row(LOG_HEADER)?;
        file.write_all(&header)?;
        file.sync_all()?;

        debug!("Created durable log {}", path.display());

        Ok(Self {
            file,
            path,
            sync_each_write,
            entries: 0,
            len: header.len() as u64,
        })
    }

    /// Create a log from the `[durable_log]` configuration section
    pub fn from_config(config: &DurableLogConfig) -> Result<Self, PersistenceError> {
        Self::create(&config.dir, &config.file_prefix, config.sync_each_write)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries written (excluding the header)
    pub fn entries(&self) -> u64 {
        self.entries
    }
}

impl FrameRecorder for DurableLog {
    fn record(&mut self, frame: &RawFrame, well_formed: bool) -> Result<(), PersistenceError> {
        let time = frame.received_at().format(TIME_FORMAT).to_string();
        let status = if well_formed { "ok" } else { "corrupted" };

        let row = encode_row([time.as_str(), frame.content(), status])?;

        if let Err(e) = self.append(&row) {
            self.discard_partial_row();
            return Err(e.into());
        }

        self.len += row.len() as u64;
        self.entries += 1;
        Ok(())
    }
}

impl DurableLog {
    fn append(&mut self, row: &[u8]) -> io::Result<()> {
        self.file.write_all(row)?;
        if self.sync_each_write {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Cut off whatever part of a failed row reached the file
    fn discard_partial_row(&mut self) {
        if let Err(e) = self.file.set_len(self.len) {
            warn!("Could not trim partial entry from {}: {}", self.path.display(), e);
        }
    }
}

/// Format one CSV row, line terminator included
///
/// Each row is encoded on its own so a failed write can never leave a row
/// buffered for the next one.
fn encode_row<I, T>(fields: I) -> Result<Vec<u8>, PersistenceError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let mut writer = WriterBuilder::new().from_writer(Vec::with_capacity(128));
    writer.write_record(fields)?;
    writer.into_inner().map_err(|e| PersistenceError::Io(e.into_error()))
}

fn create_unique(dir: &Path, prefix: &str) -> io::Result<(File, PathBuf)> {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = match attempt {
            0 => format!("{}_{}.csv", prefix, stamp),
            n => format!("{}_{}_{}.csv", prefix, stamp, n),
        };
        let path = dir.join(name);

        match OpenOptions::new().append(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no unused log file name for prefix {:?} in {}", prefix, dir.display()),
    ))
}
