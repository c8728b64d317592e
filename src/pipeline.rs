//! # Ingest Pipeline
//!
//! Wires the link to the validator, parser, store and durable log, and runs
//! the whole thing on one dedicated worker.
//!
//! ## Per-frame flow
//!
//! ```text
//! read_line ──► validate ──► durable log (always, first)
//!                   │
//!                   ├─ corrupted ──► stop
//!                   └─ well-formed ──► parse ──► store ──► export
//! ```
//!
//! ## State machine
//!
//! `Disconnected → Connecting → Streaming → Disconnected` on link failure,
//! `Stopped` once shutdown is requested. The store and the durable log are
//! untouched across reconnects.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

use crate::error::{ParseError, PersistenceError, StoreError};
use crate::events::{shutdown_channel, EventBus, PipelineEvent, Shutdown, ShutdownTrigger};
use crate::frame::{parse, validator, RawFrame};
use crate::serial::port_trait::Connector;
use crate::serial::LinkManager;
use crate::telemetry::{FrameRecorder, RecordExporter, StoreWriter};

/// Name of the worker thread started by [`Pipeline::spawn`]
pub const WORKER_THREAD_NAME: &str = "telemetry-ingest";

/// Acquisition state of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Disconnected = 0,
    Connecting = 1,
    Streaming = 2,
    Stopped = 3,
}

impl PipelineState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PipelineState::Connecting,
            2 => PipelineState::Streaming,
            3 => PipelineState::Stopped,
            _ => PipelineState::Disconnected,
        }
    }
}

/// What happened to one frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Parsed and appended to the store
    Stored,
    /// Failed the character-class check
    Corrupted,
    /// Well-formed but not a valid record
    ParseFailed(ParseError),
    /// Parsed but refused by the store
    Rejected(StoreError),
}

/// Counters shared between the worker and its observers
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_received: AtomicU64,
    frames_corrupted: AtomicU64,
    parse_failures: AtomicU64,
    records_stored: AtomicU64,
    persistence_failures: AtomicU64,
    link_failures: AtomicU64,
    reconnect_attempts: Arc<AtomicU64>,
    state: AtomicU8,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub frames_received: u64,
    pub frames_corrupted: u64,
    pub parse_failures: u64,
    pub records_stored: u64,
    pub persistence_failures: u64,
    pub link_failures: u64,
    pub reconnect_attempts: u64,
}

impl PipelineStats {
    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_corrupted: self.frames_corrupted.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            records_stored: self.records_stored.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            link_failures: self.link_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
        }
    }

    fn set_state(&self, state: PipelineState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// The ingest orchestrator
pub struct Pipeline<C: Connector> {
    link: LinkManager<C>,
    recorder: Box<dyn FrameRecorder>,
    exporter: Option<RecordExporter>,
    store: StoreWriter,
    events: EventBus,
    stats: Arc<PipelineStats>,
    persistence_degraded: bool,
}

impl<C: Connector> Pipeline<C> {
    /// Assemble a pipeline
    ///
    /// # Arguments
    ///
    /// * `link` - Link manager for the sensor link
    /// * `recorder` - Durable log receiving every raw frame
    /// * `store` - The store's writer handle; the pipeline becomes its only writer
    /// * `events` - Bus for parse and persistence diagnostics
    pub fn new(link: LinkManager<C>, recorder: Box<dyn FrameRecorder>, store: StoreWriter, events: EventBus) -> Self {
        let stats = PipelineStats {
            reconnect_attempts: link.reconnect_attempts(),
            ..Default::default()
        };

        Self {
            link,
            recorder,
            exporter: None,
            store,
            events,
            stats: Arc::new(stats),
            persistence_degraded: false,
        }
    }

    /// Also export each stored record
    pub fn with_exporter(mut self, exporter: RecordExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Whether the last durable log write failed
    pub fn is_persistence_degraded(&self) -> bool {
        self.persistence_degraded
    }

    /// Run one frame through persistence, validation, parsing and the store
    ///
    /// Never fails: every failure is counted, logged and, where relevant,
    /// emitted as an event.
    pub fn process_frame(&mut self, frame: RawFrame) -> FrameOutcome {
        PipelineStats::incr(&self.stats.frames_received);

        let corruption = validator::find_corruption(frame.content());
        self.persist(&frame, corruption.is_none());

        if let Some((index, c)) = corruption {
            PipelineStats::incr(&self.stats.frames_corrupted);
            debug!("Corrupted frame ({:?} at {}): {:?}", c, index, frame.content());
            return FrameOutcome::Corrupted;
        }

        let record = match parse(&frame) {
            Ok(record) => record,
            Err(e) => {
                PipelineStats::incr(&self.stats.parse_failures);
                warn!("Dropping unparseable frame: {}", e);
                self.events.emit(PipelineEvent::ParseFailure {
                    line: frame.content().to_string(),
                    error: e.to_string(),
                });
                return FrameOutcome::ParseFailed(e);
            }
        };

        let record = match self.store.append(record) {
            Ok(record) => record,
            Err(e) => {
                warn!("Store rejected record: {}", e);
                return FrameOutcome::Rejected(e);
            }
        };
        PipelineStats::incr(&self.stats.records_stored);

        if let Some(exporter) = self.exporter.as_mut() {
            if let Err(e) = exporter.export(&record) {
                PipelineStats::incr(&self.stats.persistence_failures);
                warn!("Record export failed: {}", e);
                self.events.emit(PipelineEvent::PersistenceFailure {
                    error: format!("record export: {}", e),
                });
            }
        }

        FrameOutcome::Stored
    }

    fn persist(&mut self, frame: &RawFrame, well_formed: bool) {
        match self.recorder.record(frame, well_formed) {
            Ok(()) => {
                if self.persistence_degraded {
                    info!("Durable log writes restored");
                    self.persistence_degraded = false;
                }
            }
            Err(e) => self.persistence_failed(e),
        }
    }

    fn persistence_failed(&mut self, e: PersistenceError) {
        PipelineStats::incr(&self.stats.persistence_failures);

        if self.persistence_degraded {
            debug!("Durable log write failed again: {}", e);
        } else {
            error!("Durable log write failed, continuing without persistence: {}", e);
            self.persistence_degraded = true;
        }

        self.events.emit(PipelineEvent::PersistenceFailure {
            error: format!("durable log: {}", e),
        });
    }

    /// Run until `shutdown` is triggered
    ///
    /// Connects (retrying forever), streams frames until the link fails,
    /// closes, and starts over. Returns only on shutdown, after closing the
    /// current session.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        info!("Ingest pipeline started for {}", self.link.address());

        while !shutdown.is_triggered() {
            self.stats.set_state(PipelineState::Connecting);
            if !self.link.connect(&mut shutdown).await {
                break;
            }

            self.stats.set_state(PipelineState::Streaming);

            loop {
                let result = tokio::select! {
                    biased;
                    _ = shutdown.triggered() => None,
                    result = self.link.read_line() => Some(result),
                };

                match result {
                    Some(Ok(frame)) => {
                        self.process_frame(frame);
                    }
                    Some(Err(e)) => {
                        PipelineStats::incr(&self.stats.link_failures);
                        warn!("Link failure on {}: {}", self.link.address(), e);
                        break;
                    }
                    None => break,
                }
            }

            self.link.close();
            self.stats.set_state(PipelineState::Disconnected);
        }

        self.link.close();
        self.stats.set_state(PipelineState::Stopped);

        let stats = self.stats.snapshot();
        info!(
            "Ingest pipeline stopped: {} frames received, {} records stored",
            stats.frames_received, stats.records_stored
        );
    }
}

impl<C: Connector + 'static> Pipeline<C> {
    /// Start the pipeline on its own thread
    ///
    /// The worker gets a private single-threaded runtime, so a stalled link
    /// can never occupy a thread that serves consumer reads.
    ///
    /// # Errors
    ///
    /// Returns error if the OS refuses to create the thread
    pub fn spawn(self) -> std::io::Result<PipelineHandle> {
        let (trigger, shutdown) = shutdown_channel();
        let stats = self.stats();

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to start ingest runtime: {}", e);
                        return;
                    }
                };
                runtime.block_on(self.run(shutdown));
            })?;

        Ok(PipelineHandle { trigger, thread, stats })
    }
}

/// Owner's handle to a pipeline started with [`Pipeline::spawn`]
#[derive(Debug)]
pub struct PipelineHandle {
    trigger: ShutdownTrigger,
    thread: thread::JoinHandle<()>,
    stats: Arc<PipelineStats>,
}

impl PipelineHandle {
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Ask the worker to stop; returns immediately
    pub fn shutdown(&self) {
        self.trigger.trigger();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Stop the worker, wait for it to exit, and return the final counters
    pub fn join(self) -> thread::Result<StatsSnapshot> {
        self.trigger.trigger();
        self.thread.join()?;
        Ok(self.stats.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::serial::port_trait::mocks::{ScriptedConnector, ScriptedRead};
    use crate::telemetry::durable_log::MockFrameRecorder;
    use crate::telemetry::{DurableLog, TelemetryStore};
    use chrono::Local;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    const SCENARIO_A: &str = "57.0,25.0,12.3,100.0,21.5,40.0,101300,400,450,10,5,1,2,3,-60,9";
    const SCENARIO_B: &str = "57.0,25.0,AB,100.0";

    /// Recorder keeping entries in memory
    #[derive(Clone, Default)]
    struct MemoryRecorder {
        entries: Arc<Mutex<Vec<(String, bool)>>>,
    }

    impl FrameRecorder for MemoryRecorder {
        fn record(&mut self, frame: &RawFrame, well_formed: bool) -> Result<(), PersistenceError> {
            self.entries
                .lock()
                .unwrap()
                .push((frame.content().to_string(), well_formed));
            Ok(())
        }
    }

    fn line(index: usize) -> String {
        format!("57.{},25.0,12.3,100.0,21.5,40.0,101300,400,450,10,5,1,2,3,-60,9", index)
    }

    fn build(
        connector: ScriptedConnector,
        recorder: Box<dyn FrameRecorder>,
    ) -> (Pipeline<ScriptedConnector>, TelemetryStore, EventBus) {
        let events = EventBus::new(256);
        let link = LinkManager::new(connector, "COM4", events.clone())
            .with_read_timeout(Duration::from_millis(200))
            .with_reconnect_interval(Duration::from_millis(5));
        let (writer, store) = TelemetryStore::new();
        (Pipeline::new(link, recorder, writer, events.clone()), store, events)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn log_rows(path: &Path) -> Vec<Vec<String>> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .has_headers(true)
            .from_path(path)
            .unwrap();
        reader
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_scenario_a_valid_frame_is_stored_and_logged() {
        let recorder = MemoryRecorder::default();
        let (mut pipeline, store, _events) = build(ScriptedConnector::new(), Box::new(recorder.clone()));

        let outcome = pipeline.process_frame(RawFrame::new(SCENARIO_A, Local::now()));

        assert_eq!(outcome, FrameOutcome::Stored);
        let record = store.latest().unwrap();
        assert_eq!(record.latitude, 57.0);
        assert_eq!(record.pressure, 101300.0);
        assert_eq!(record.rssi, -60.0);
        assert_eq!(record.snr, 9.0);
        assert_eq!(*recorder.entries.lock().unwrap(), vec![(SCENARIO_A.to_string(), true)]);
    }

    #[test]
    fn test_scenario_b_corrupted_frame_only_logged() {
        let recorder = MemoryRecorder::default();
        let (mut pipeline, store, events) = build(ScriptedConnector::new(), Box::new(recorder.clone()));
        let mut rx = events.subscribe();

        let outcome = pipeline.process_frame(RawFrame::new(SCENARIO_B, Local::now()));

        assert_eq!(outcome, FrameOutcome::Corrupted);
        assert!(store.is_empty());
        assert_eq!(*recorder.entries.lock().unwrap(), vec![(SCENARIO_B.to_string(), false)]);
        assert_eq!(pipeline.stats().snapshot().frames_corrupted, 1);
        // Corruption is a classification, not a diagnostic event
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_parse_failure_is_logged_and_reported() {
        let recorder = MemoryRecorder::default();
        let (mut pipeline, store, events) = build(ScriptedConnector::new(), Box::new(recorder.clone()));
        let mut rx = events.subscribe();

        let outcome = pipeline.process_frame(RawFrame::new("57.0,25.0,12.3", Local::now()));

        assert_eq!(
            outcome,
            FrameOutcome::ParseFailed(ParseError::FieldCountMismatch { expected: 16, found: 3 })
        );
        assert!(store.is_empty());
        assert_eq!(recorder.entries.lock().unwrap().len(), 1);
        assert!(matches!(
            rx.try_recv().unwrap(),
            PipelineEvent::ParseFailure { line, .. } if line == "57.0,25.0,12.3"
        ));
    }

    #[test]
    fn test_every_frame_recorded_exactly_once() {
        let recorder = MemoryRecorder::default();
        let (mut pipeline, store, _events) = build(ScriptedConnector::new(), Box::new(recorder.clone()));

        let inputs = [SCENARIO_A, SCENARIO_B, "", "1.2.3", "57,25", SCENARIO_A, "\u{FFFD}"];
        for input in inputs {
            pipeline.process_frame(RawFrame::new(input, Local::now()));
        }

        let entries = recorder.entries.lock().unwrap();
        let recorded: Vec<&str> = entries.iter().map(|(content, _)| content.as_str()).collect();
        assert_eq!(recorded, inputs);
        assert_eq!(store.len(), 2);

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.frames_received, 7);
        assert_eq!(stats.records_stored, 2);
        assert_eq!(stats.frames_corrupted, 2);
        assert_eq!(stats.parse_failures, 3);
    }

    #[test]
    fn test_persistence_failure_does_not_stop_ingestion() {
        let mut recorder = MockFrameRecorder::new();
        recorder
            .expect_record()
            .times(3)
            .returning(|_, _| Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into()));
        let (mut pipeline, store, events) = build(ScriptedConnector::new(), Box::new(recorder));
        let mut rx = events.subscribe();

        for _ in 0..3 {
            assert_eq!(
                pipeline.process_frame(RawFrame::new(SCENARIO_A, Local::now())),
                FrameOutcome::Stored
            );
        }

        assert_eq!(store.len(), 3);
        assert!(pipeline.is_persistence_degraded());
        assert_eq!(pipeline.stats().snapshot().persistence_failures, 3);

        for _ in 0..3 {
            match rx.try_recv().unwrap() {
                PipelineEvent::PersistenceFailure { error } => assert!(error.contains("disk full")),
                other => panic!("Expected PersistenceFailure, got: {:?}", other),
            }
        }
    }

    #[test]
    fn test_persistence_recovers_after_failure() {
        let mut recorder = MockFrameRecorder::new();
        let mut seq = mockall::Sequence::new();
        recorder
            .expect_record()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into()));
        recorder
            .expect_record()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        let (mut pipeline, _store, _events) = build(ScriptedConnector::new(), Box::new(recorder));

        pipeline.process_frame(RawFrame::new(SCENARIO_A, Local::now()));
        assert!(pipeline.is_persistence_degraded());

        pipeline.process_frame(RawFrame::new(SCENARIO_A, Local::now()));
        assert!(!pipeline.is_persistence_degraded());
    }

    #[test]
    fn test_export_receives_stored_records() {
        let dir = TempDir::new().unwrap();
        let exporter = RecordExporter::new(dir.path(), 100, 2).unwrap();
        let (pipeline, _store, _events) = build(ScriptedConnector::new(), Box::new(MemoryRecorder::default()));
        let mut pipeline = pipeline.with_exporter(exporter);

        pipeline.process_frame(RawFrame::new(SCENARIO_A, Local::now()));
        pipeline.process_frame(RawFrame::new(SCENARIO_B, Local::now()));

        let path = pipeline.exporter.as_ref().unwrap().current_path().unwrap().to_path_buf();
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_scenario_c_reconnects_and_keeps_records() {
        let dir = TempDir::new().unwrap();
        let log = DurableLog::create(dir.path(), "data", true).unwrap();
        let log_path = log.path().to_path_buf();

        let connector = ScriptedConnector::new();
        connector
            .push_session(vec![
                ScriptedRead::line(&line(1)),
                ScriptedRead::line(&line(2)),
                ScriptedRead::line(&line(3)),
                ScriptedRead::Error(std::io::ErrorKind::BrokenPipe),
            ])
            .push_failure(LinkError::NotFound("COM4".to_string()))
            .push_failure(LinkError::NotFound("COM4".to_string()))
            .push_session(vec![ScriptedRead::line(&line(4))]);

        let (pipeline, store, events) = build(connector.clone(), Box::new(log));
        let mut rx = events.subscribe();
        let stats = pipeline.stats();
        let (trigger, shutdown) = shutdown_channel();
        let worker = tokio::spawn(pipeline.run(shutdown));

        wait_for(|| store.len() == 3).await;
        let before: Vec<_> = store.snapshot();

        wait_for(|| store.len() == 4 && connector.open_attempts() >= 4).await;
        trigger.trigger();
        assert_ok!(worker.await);

        let after = store.snapshot();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!(Arc::ptr_eq(a, b), "earlier records must be untouched");
        }
        assert_eq!(after[3].latitude, 57.4);
        assert_eq!(stats.state(), PipelineState::Stopped);
        assert!(stats.snapshot().link_failures >= 1);
        assert!(stats.snapshot().reconnect_attempts >= 3);

        let raw: Vec<String> = log_rows(&log_path).into_iter().map(|row| row[1].clone()).collect();
        assert_eq!(raw, vec![line(1), line(2), line(3), line(4)]);

        let mut lifecycle = Vec::new();
        while let Ok(event) = rx.try_recv() {
            lifecycle.push(event);
        }
        assert!(lifecycle.contains(&PipelineEvent::Connected { address: "COM4".to_string() }));
        assert!(lifecycle
            .iter()
            .any(|e| matches!(e, PipelineEvent::Disconnected { reason, .. } if reason.contains("Mock read error"))));
        assert!(lifecycle
            .iter()
            .any(|e| matches!(e, PipelineEvent::Connecting { attempt: 3, .. })));
    }

    #[tokio::test]
    async fn test_link_flapping_never_duplicates_or_reorders() {
        let recorder = MemoryRecorder::default();
        let connector = ScriptedConnector::new();
        let mut expected = Vec::new();

        for session in 0..5 {
            let mut reads = Vec::new();
            for i in 0..3 {
                let text = line(session * 3 + i);
                reads.push(ScriptedRead::line(&text));
                expected.push(text);
            }
            // Half a line, then the link drops
            reads.push(ScriptedRead::Bytes(b"57.9,25".to_vec()));
            connector.push_session(reads);
            connector.push_failure(LinkError::Io("unplugged".to_string()));
        }

        let (pipeline, store, _events) = build(connector, Box::new(recorder.clone()));
        let (trigger, shutdown) = shutdown_channel();
        let worker = tokio::spawn(pipeline.run(shutdown));

        wait_for(|| store.len() == 15).await;
        trigger.trigger();
        assert_ok!(worker.await);

        let recorded: Vec<String> = recorder
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(content, _)| content.clone())
            .collect();
        assert_eq!(recorded, expected);

        let snapshot = store.snapshot();
        for pair in snapshot.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn test_stalled_link_triggers_reconnect() {
        let connector = ScriptedConnector::new();
        connector
            .push_session(vec![ScriptedRead::line(SCENARIO_A), ScriptedRead::Stall])
            .push_session(vec![ScriptedRead::line(SCENARIO_A)]);

        let (pipeline, store, _events) = build(connector.clone(), Box::new(MemoryRecorder::default()));
        let (trigger, shutdown) = shutdown_channel();
        let worker = tokio::spawn(pipeline.run(shutdown));

        wait_for(|| store.len() == 2).await;
        trigger.trigger();
        assert_ok!(worker.await);
        assert!(connector.open_attempts() >= 2);
    }

    #[tokio::test]
    async fn test_shutdown_while_streaming() {
        let connector = ScriptedConnector::new();
        connector.push_session(vec![ScriptedRead::line(SCENARIO_A), ScriptedRead::Stall]);

        let (pipeline, store, events) = build(connector, Box::new(MemoryRecorder::default()));
        let mut rx = events.subscribe();
        let stats = pipeline.stats();
        let (trigger, shutdown) = shutdown_channel();
        let worker = tokio::spawn(pipeline.run(shutdown));

        wait_for(|| store.len() == 1).await;
        assert_eq!(stats.state(), PipelineState::Streaming);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker should stop promptly")
            .unwrap();

        assert_eq!(stats.state(), PipelineState::Stopped);
        let mut saw_disconnect = false;
        while let Ok(event) = rx.try_recv() {
            saw_disconnect |= matches!(event, PipelineEvent::Disconnected { .. });
        }
        assert!(saw_disconnect, "shutdown must close the open session");
    }

    #[tokio::test]
    async fn test_dropped_trigger_stops_without_reopening() {
        let connector = ScriptedConnector::new();
        connector.push_session(vec![ScriptedRead::line(SCENARIO_A), ScriptedRead::Stall]);
        for _ in 0..10 {
            connector.push_session(vec![ScriptedRead::line(SCENARIO_A), ScriptedRead::line(SCENARIO_A)]);
        }

        let (pipeline, store, _events) = build(connector.clone(), Box::new(MemoryRecorder::default()));
        let stats = pipeline.stats();
        let (trigger, shutdown) = shutdown_channel();
        let worker = tokio::spawn(pipeline.run(shutdown));

        wait_for(|| store.len() == 1).await;
        drop(trigger);

        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker must not outlive its trigger")
            .unwrap();

        assert_eq!(connector.open_attempts(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(stats.state(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_dropped_trigger_before_start_never_opens() {
        let connector = ScriptedConnector::new();
        connector.push_session(vec![ScriptedRead::line(SCENARIO_A)]);

        let (pipeline, store, _events) = build(connector.clone(), Box::new(MemoryRecorder::default()));
        let (trigger, shutdown) = shutdown_channel();
        drop(trigger);

        tokio::time::timeout(Duration::from_secs(1), pipeline.run(shutdown))
            .await
            .expect("run should return at once");

        assert_eq!(connector.open_attempts(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_during_backoff() {
        let connector = ScriptedConnector::new();
        let (pipeline, _store, _events) = build(connector.clone(), Box::new(MemoryRecorder::default()));
        let stats = pipeline.stats();
        let (trigger, shutdown) = shutdown_channel();
        let worker = tokio::spawn(pipeline.run(shutdown));

        wait_for(|| connector.open_attempts() >= 3).await;
        assert_eq!(stats.state(), PipelineState::Connecting);
        assert!(stats.snapshot().reconnect_attempts >= 2);

        trigger.trigger();
        assert_ok!(worker.await);
        assert_eq!(stats.state(), PipelineState::Stopped);
    }

    #[test]
    fn test_spawn_runs_on_dedicated_thread() {
        let connector = ScriptedConnector::new();
        connector.push_session(vec![ScriptedRead::line(SCENARIO_A)]);
        let (pipeline, store, _events) = build(connector, Box::new(MemoryRecorder::default()));

        let handle = pipeline.spawn().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while store.len() < 1 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(store.len(), 1);
        assert_eq!(handle.stats().snapshot().records_stored, 1);

        let totals = handle.join().unwrap();
        assert_eq!(totals.frames_received, 1);
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            PipelineState::Disconnected,
            PipelineState::Connecting,
            PipelineState::Streaming,
            PipelineState::Stopped,
        ] {
            assert_eq!(PipelineState::from_u8(state as u8), state);
        }
    }
}
