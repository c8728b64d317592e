//! # Telemetry Store
//!
//! Append-only, time-ordered in-memory sequence of parsed records.
//!
//! The store is split into two handles sharing one allocation:
//! - [`StoreWriter`] is unique (not `Clone`) and owned by the pipeline worker,
//!   so there is exactly one writer.
//! - [`TelemetryStore`] is a cheap cloneable reader handle for consumers.
//!
//! Records are published as `Arc<TelemetryRecord>` only after they are fully
//! built, so a reader can never observe a partially constructed record.
//! The store grows for the lifetime of the process; there is no eviction.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::StoreError;
use crate::frame::TelemetryRecord;

struct Inner {
    records: RwLock<Vec<Arc<TelemetryRecord>>>,
    latest: watch::Sender<Option<Arc<TelemetryRecord>>>,
}

/// The single mutating handle to a store
pub struct StoreWriter {
    inner: Arc<Inner>,
}

/// Read-only handle to a store, safe to use concurrently with appends
#[derive(Clone)]
pub struct TelemetryStore {
    inner: Arc<Inner>,
}

impl TelemetryStore {
    /// Create an empty store, returning its writer and a reader handle
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (StoreWriter, TelemetryStore) {
        let (latest, _) = watch::channel(None);
        let inner = Arc::new(Inner {
            records: RwLock::new(Vec::new()),
            latest,
        });

        (
            StoreWriter {
                inner: Arc::clone(&inner),
            },
            TelemetryStore { inner },
        )
    }

    /// Most recently appended record, if any
    pub fn latest(&self) -> Option<Arc<TelemetryRecord>> {
        self.inner.records.read().last().cloned()
    }

    /// Point-in-time copy of every record, in arrival order
    pub fn snapshot(&self) -> Vec<Arc<TelemetryRecord>> {
        self.inner.records.read().clone()
    }

    /// Records appended at or after position `cursor`
    ///
    /// Lets a polling consumer fetch only what is new since its last read by
    /// passing the previous `len()`.
    pub fn since(&self, cursor: usize) -> Vec<Arc<TelemetryRecord>> {
        let records = self.inner.records.read();
        records.get(cursor..).map(<[_]>::to_vec).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Watch channel updated with each newly appended record
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<TelemetryRecord>>> {
        self.inner.latest.subscribe()
    }
}

impl std::fmt::Debug for TelemetryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryStore")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl StoreWriter {
    /// Append a record
    ///
    /// # Errors
    ///
    /// Returns `OutOfOrder` if the record is older than the current latest
    /// record; the store is left unchanged.
    pub fn append(&mut self, record: TelemetryRecord) -> Result<Arc<TelemetryRecord>, StoreError> {
        let record = Arc::new(record);

        {
            let mut records = self.inner.records.write();
            if let Some(latest) = records.last() {
                if record.timestamp < latest.timestamp {
                    return Err(StoreError::OutOfOrder {
                        latest: latest.timestamp.to_rfc3339(),
                        record: record.timestamp.to_rfc3339(),
                    });
                }
            }
            records.push(Arc::clone(&record));
        }

        self.inner.latest.send_replace(Some(Arc::clone(&record)));
        Ok(record)
    }

    /// Reader handle for the store this writer appends to
    pub fn reader(&self) -> TelemetryStore {
        TelemetryStore {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for StoreWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreWriter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Local, TimeZone};

    fn record_at(seconds: i64, latitude: f64) -> TelemetryRecord {
        let base = Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut fields = [0.0; 16];
        fields[0] = latitude;
        TelemetryRecord::from_fields(base + Duration::seconds(seconds), fields)
    }

    #[test]
    fn test_empty_store() {
        let (_writer, store) = TelemetryStore::new();
        assert!(store.is_empty());
        assert!(store.latest().is_none());
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_append_and_latest() {
        let (mut writer, store) = TelemetryStore::new();

        writer.append(record_at(0, 1.0)).unwrap();
        writer.append(record_at(1, 2.0)).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.latest().unwrap().latitude, 2.0);

        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].latitude, 1.0);
        assert_eq!(snapshot[1].latitude, 2.0);
    }

    #[test]
    fn test_equal_timestamps_allowed() {
        let (mut writer, store) = TelemetryStore::new();
        writer.append(record_at(5, 1.0)).unwrap();
        writer.append(record_at(5, 2.0)).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let (mut writer, store) = TelemetryStore::new();
        writer.append(record_at(10, 1.0)).unwrap();

        let result = writer.append(record_at(9, 2.0));
        assert!(matches!(result, Err(StoreError::OutOfOrder { .. })));
        assert_eq!(store.len(), 1);
        assert_eq!(store.latest().unwrap().latitude, 1.0);
    }

    #[test]
    fn test_snapshot_is_point_in_time() {
        let (mut writer, store) = TelemetryStore::new();
        writer.append(record_at(0, 1.0)).unwrap();

        let snapshot = store.snapshot();
        writer.append(record_at(1, 2.0)).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_since_cursor() {
        let (mut writer, store) = TelemetryStore::new();
        for i in 0..5 {
            writer.append(record_at(i, i as f64)).unwrap();
        }

        let new = store.since(3);
        assert_eq!(new.len(), 2);
        assert_eq!(new[0].latitude, 3.0);
        assert!(store.since(5).is_empty());
        assert!(store.since(100).is_empty());
    }

    #[test]
    fn test_reader_from_writer_shares_records() {
        let (mut writer, _store) = TelemetryStore::new();
        let reader = writer.reader();
        writer.append(record_at(0, 1.0)).unwrap();
        assert_eq!(reader.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_sees_new_latest() {
        let (mut writer, store) = TelemetryStore::new();
        let mut rx = store.subscribe();

        writer.append(record_at(0, 42.0)).unwrap();

        rx.changed().await.unwrap();
        let latest = rx.borrow_and_update().clone();
        assert_eq!(latest.unwrap().latitude, 42.0);
    }

    #[test]
    fn test_concurrent_readers_see_ordered_prefixes() {
        let (mut writer, store) = TelemetryStore::new();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut last_len = 0;
                    for _ in 0..200 {
                        let snapshot = store.snapshot();
                        assert!(snapshot.len() >= last_len);
                        last_len = snapshot.len();

                        for pair in snapshot.windows(2) {
                            assert!(pair[0].timestamp <= pair[1].timestamp);
                            assert_eq!(pair[0].latitude + 1.0, pair[1].latitude);
                        }
                        if let Some(latest) = store.latest() {
                            assert!(latest.latitude >= (last_len as f64) - 1.0);
                        }
                    }
                })
            })
            .collect();

        for i in 0..1000 {
            writer.append(record_at(i, i as f64)).unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.len(), 1000);
    }
}
