//! # Parsed Record Export
//!
//! Writes every stored record as one JSON object per line (JSONL), rotating
//! to a new file every `max_records_per_file` records and deleting the
//! oldest files beyond `max_files_to_keep`.
//!
//! The raw durable log is the authoritative history; this export is a
//! convenience for post-flight analysis tools.

use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::ExportConfig;
use crate::error::PersistenceError;
use crate::frame::TelemetryRecord;

const FILE_PREFIX: &str = "records_";
const FILE_EXTENSION: &str = ".jsonl";

/// Rotating JSONL writer for parsed records
#[derive(Debug)]
pub struct RecordExporter {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    current: Option<(File, PathBuf)>,
    records_in_file: usize,
    sequence: u32,
}

impl RecordExporter {
    /// Create an exporter writing into `dir` (created if missing)
    ///
    /// No file is created until the first record is exported.
    pub fn new(
        dir: impl AsRef<Path>,
        max_records_per_file: usize,
        max_files_to_keep: usize,
    ) -> Result<Self, PersistenceError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            current: None,
            records_in_file: 0,
            sequence: 0,
        })
    }

    /// Create an exporter from the `[export]` configuration section
    pub fn from_config(config: &ExportConfig) -> Result<Self, PersistenceError> {
        Self::new(&config.dir, config.max_records_per_file, config.max_files_to_keep)
    }

    /// Path of the file currently being written, if any
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|(_, path)| path.as_path())
    }

    /// Append one record, rotating first if the current file is full
    pub fn export(&mut self, record: &TelemetryRecord) -> Result<(), PersistenceError> {
        if self.current.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        if let Some((file, _)) = self.current.as_mut() {
            file.write_all(&line)?;
            file.flush()?;
        }

        self.records_in_file += 1;
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), PersistenceError> {
        self.current = None;
        self.sequence += 1;

        let name = format!(
            "{}{}_{:04}{}",
            FILE_PREFIX,
            Local::now().format("%Y%m%d_%H%M%S"),
            self.sequence,
            FILE_EXTENSION
        );
        let path = self.dir.join(name);
        let file = OpenOptions::new().append(true).create_new(true).open(&path)?;

        info!("Exporting records to {}", path.display());
        self.current = Some((file, path));
        self.records_in_file = 0;

        self.prune();
        Ok(())
    }

    /// Delete the oldest export files beyond the retention limit
    fn prune(&self) {
        let mut files = match export_files(&self.dir) {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to list export files in {}: {}", self.dir.display(), e);
                return;
            }
        };

        if files.len() <= self.max_files_to_keep {
            return;
        }

        files.sort();
        let excess = files.len() - self.max_files_to_keep;

        for path in files.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed old export file {}", path.display()),
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

/// Export files in `dir`; names sort oldest first
fn export_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_export = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(FILE_PREFIX) && name.ends_with(FILE_EXTENSION))
            .unwrap_or(false);

        if is_export {
            files.push(path);
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(latitude: f64) -> TelemetryRecord {
        let mut fields = [0.0; 16];
        fields[0] = latitude;
        fields[14] = -60.0;
        TelemetryRecord::from_fields(Local::now(), fields)
    }

    #[test]
    fn test_no_file_until_first_record() {
        let dir = TempDir::new().unwrap();
        let exporter = RecordExporter::new(dir.path(), 10, 3).unwrap();

        assert!(exporter.current_path().is_none());
        assert_eq!(export_files(dir.path()).unwrap().len(), 0);
    }

    #[test]
    fn test_export_writes_json_lines() {
        let dir = TempDir::new().unwrap();
        let mut exporter = RecordExporter::new(dir.path(), 10, 3).unwrap();

        exporter.export(&record(57.0)).unwrap();
        exporter.export(&record(57.5)).unwrap();

        let contents = fs::read_to_string(exporter.current_path().unwrap()).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["latitude"], 57.0);
        assert_eq!(lines[1]["latitude"], 57.5);
        assert_eq!(lines[1]["rssi"], -60.0);
    }

    #[test]
    fn test_rotation_after_max_records() {
        let dir = TempDir::new().unwrap();
        let mut exporter = RecordExporter::new(dir.path(), 2, 10).unwrap();

        for i in 0..5 {
            exporter.export(&record(i as f64)).unwrap();
        }

        let mut files = export_files(dir.path()).unwrap();
        files.sort();
        assert_eq!(files.len(), 3);

        let line_counts: Vec<usize> = files
            .iter()
            .map(|path| fs::read_to_string(path).unwrap().lines().count())
            .collect();
        assert_eq!(line_counts, vec![2, 2, 1]);
    }

    #[test]
    fn test_retention_keeps_newest_files() {
        let dir = TempDir::new().unwrap();
        let mut exporter = RecordExporter::new(dir.path(), 1, 2).unwrap();

        for i in 0..5 {
            exporter.export(&record(i as f64)).unwrap();
        }

        let mut files = export_files(dir.path()).unwrap();
        files.sort();
        assert_eq!(files.len(), 2);

        let last = fs::read_to_string(&files[1]).unwrap();
        let value: serde_json::Value = serde_json::from_str(last.trim()).unwrap();
        assert_eq!(value["latitude"], 4.0);
        assert_eq!(files[1].as_path(), exporter.current_path().unwrap());
    }

    #[test]
    fn test_unrelated_files_are_not_pruned() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();
        let mut exporter = RecordExporter::new(dir.path(), 1, 1).unwrap();

        for i in 0..3 {
            exporter.export(&record(i as f64)).unwrap();
        }

        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(export_files(dir.path()).unwrap().len(), 1);
    }
}
