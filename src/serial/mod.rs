//! # Serial Communication Module
//!
//! Owns the lifecycle of the link to the base station radio.
//!
//! This module handles:
//! - Opening the serial port (9600 baud, 8N1 by default)
//! - Blocking line reads with a no-data timeout
//! - Failure detection, close, and fixed-interval reconnection
//! - Stamping each received line with a monotonic receipt time
//!
//! It knows nothing about what a line means.

pub mod port_trait;

use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::events::{EventBus, PipelineEvent, Shutdown};
use crate::frame::RawFrame;
use port_trait::{Connector, LineSource};

/// Baud rate of the base station radio
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Treat the link as dead after this long without a complete line
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait between reconnection attempts
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(250);

/// State of the current link session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Open,
    Failed,
}

/// One connection attempt and, while open, its handle
///
/// Sessions are never repaired: a failed session is closed and replaced by
/// a fresh one on the next open.
pub struct LinkSession {
    state: LinkState,
    handle: Option<Box<dyn LineSource>>,
    retries: u32,
    last_error: Option<LinkError>,
}

impl LinkSession {
    fn closed(retries: u32) -> Self {
        Self {
            state: LinkState::Closed,
            handle: None,
            retries,
            last_error: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Failed open attempts since the link was last connected
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn last_error(&self) -> Option<&LinkError> {
        self.last_error.as_ref()
    }
}

impl std::fmt::Debug for LinkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSession")
            .field("state", &self.state)
            .field("retries", &self.retries)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

/// Wall clock that never goes backwards
///
/// Receipt times feed the store's ordering invariant, so an NTP step or a
/// manual clock change must not reorder frames.
#[derive(Debug, Default)]
pub struct ReceiptClock {
    last: Option<DateTime<Local>>,
}

impl ReceiptClock {
    pub fn now(&mut self) -> DateTime<Local> {
        self.stamp(Local::now())
    }

    /// Clamp `time` to be no earlier than the previous stamp
    pub fn stamp(&mut self, time: DateTime<Local>) -> DateTime<Local> {
        let time = match self.last {
            Some(last) if time < last => last,
            _ => time,
        };
        self.last = Some(time);
        time
    }
}

/// Link lifecycle manager
///
/// Generic over the [`Connector`] so the reconnect logic can be exercised
/// without hardware.
pub struct LinkManager<C: Connector> {
    connector: C,
    address: String,
    read_timeout: Duration,
    reconnect_interval: Duration,
    session: LinkSession,
    events: EventBus,
    clock: ReceiptClock,
    buf: Vec<u8>,
    attempted: bool,
    reconnect_attempts: Arc<AtomicU64>,
}

impl<C: Connector> std::fmt::Debug for LinkManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkManager")
            .field("address", &self.address)
            .field("read_timeout", &self.read_timeout)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> LinkManager<C> {
    /// Create a manager for `address` with default timeouts
    pub fn new(connector: C, address: impl Into<String>, events: EventBus) -> Self {
        Self {
            connector,
            address: address.into(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            session: LinkSession::closed(0),
            events,
            clock: ReceiptClock::default(),
            buf: Vec::with_capacity(256),
            attempted: false,
            reconnect_attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a manager from the `[link]` configuration section
    pub fn from_config(connector: C, config: &LinkConfig, events: EventBus) -> Self {
        Self::new(connector, config.port.clone(), events)
            .with_read_timeout(Duration::from_millis(config.read_timeout_ms))
            .with_reconnect_interval(Duration::from_millis(config.reconnect_interval_ms))
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> LinkState {
        self.session.state
    }

    pub fn session(&self) -> &LinkSession {
        &self.session
    }

    /// Open attempts made by [`connect`](Self::connect) after the first one
    ///
    /// Cumulative over the manager's lifetime; the counter is shared so it
    /// can be read while a connect is in progress.
    pub fn reconnect_attempts(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.reconnect_attempts)
    }

    /// Open a fresh session, closing any previous one first
    ///
    /// # Errors
    ///
    /// Returns the connector's error; the session is left `Failed` and its
    /// retry counter incremented.
    pub async fn open(&mut self) -> Result<(), LinkError> {
        if self.session.handle.is_some() {
            self.close();
        }

        let attempt = self.session.retries + 1;
        debug!("Opening {} (attempt {})", self.address, attempt);
        self.events.emit(PipelineEvent::Connecting {
            address: self.address.clone(),
            attempt,
        });

        match self.connector.open(&self.address).await {
            Ok(handle) => {
                info!("Connected to {}", self.address);
                self.session = LinkSession {
                    state: LinkState::Open,
                    handle: Some(handle),
                    retries: 0,
                    last_error: None,
                };
                self.events.emit(PipelineEvent::Connected {
                    address: self.address.clone(),
                });
                Ok(())
            }
            Err(e) => {
                warn!("No connection to {}: {}", self.address, e);
                self.session.state = LinkState::Failed;
                self.session.retries = attempt;
                self.session.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Wait for the next complete line
    ///
    /// Suspends until a `\n`-terminated line arrives, the link fails, or the
    /// read timeout elapses. A partial line left at end of stream is
    /// discarded, never returned.
    ///
    /// # Errors
    ///
    /// Any error leaves the session `Failed`; the caller must [`close`](Self::close)
    /// and reopen.
    pub async fn read_line(&mut self) -> Result<RawFrame, LinkError> {
        let handle = match (self.session.state, self.session.handle.as_mut()) {
            (LinkState::Open, Some(handle)) => handle,
            _ => return Err(LinkError::NotOpen),
        };

        self.buf.clear();
        let timeout = self.read_timeout;

        let read = tokio::time::timeout(timeout, handle.read_line(&mut self.buf)).await;
        let result = match read {
            Err(_) => Err(LinkError::Timeout(timeout)),
            Ok(Ok(0)) => Err(LinkError::Closed),
            Ok(Ok(_)) if self.buf.last() != Some(&b'\n') => Err(LinkError::Closed),
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(LinkError::Io(e.to_string())),
        };

        match result {
            Ok(()) => {
                let frame = RawFrame::from_bytes(&self.buf, self.clock.now());
                debug!("Received line ({} bytes)", self.buf.len());
                Ok(frame)
            }
            Err(e) => {
                self.session.state = LinkState::Failed;
                self.session.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Drop the current session's handle
    ///
    /// Emits `Disconnected` if a handle was held. The retry counter carries
    /// over to the replacement session.
    pub fn close(&mut self) {
        let retries = self.session.retries;
        let previous = std::mem::replace(&mut self.session, LinkSession::closed(retries));

        if previous.handle.is_some() {
            let reason = match previous.last_error {
                Some(e) => e.to_string(),
                None => "closed".to_string(),
            };
            info!("Disconnected from {}: {}", self.address, reason);
            self.events.emit(PipelineEvent::Disconnected {
                address: self.address.clone(),
                reason,
            });
        }
    }

    /// Open the link, retrying at the reconnect interval until it succeeds
    ///
    /// There is no retry limit; the link is expected to be restored
    /// externally. Returns `false` if shutdown was requested first.
    pub async fn connect(&mut self, shutdown: &mut Shutdown) -> bool {
        loop {
            if shutdown.is_triggered() {
                return false;
            }

            if self.attempted {
                self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            }
            self.attempted = true;

            if self.open().await.is_ok() {
                return true;
            }

            tokio::select! {
                _ = shutdown.triggered() => return false,
                _ = tokio::time::sleep(self.reconnect_interval) => {}
            }
        }
    }
}
