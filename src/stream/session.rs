//! Server-side stream session.
//!
//! One session per connected viewer. It pushes the full document on connect and
//! after every published change, sends heartbeats while open, and tears itself
//! down when the client leaves, the lifetime cap expires or the transport fails.
//!
//! ```text
//! Opening --> Active --> Closing --> Closed
//! ```
//!
//! Heartbeats, bus callbacks and teardown triggers may fire concurrently. They
//! all go through one atomic state: only the first trigger tears down, and every
//! write re-checks the state under the sink lock, so nothing is written once
//! teardown has started.

use crate::bus::{ChangeBus, Subscription};
use crate::error::StreamError;
use crate::store::StateStore;
use crossbeam_channel::{after, bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::event::{StreamEvent, LOAD_FAILED_MESSAGE};
use super::transport::EventSink;

/// Default period between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default cap on a session's lifetime.
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(5 * 60);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Session timing.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Period between heartbeat events.
    pub heartbeat_interval: Duration,

    /// The session is closed this long after opening, whatever the client does.
    pub max_lifetime: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_lifetime: DEFAULT_MAX_LIFETIME,
        }
    }
}

/// Unique identifier for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    fn next() -> Self {
        SessionId(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    Opening = 0,
    Active = 1,
    Closing = 2,
    /// Terminal.
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Opening,
            1 => SessionState::Active,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// Why a session was torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The client went away (abort signal, or the owner dropped the session).
    ClientDisconnected,
    /// The lifetime cap expired.
    LifetimeExpired,
    /// Writing to the transport failed.
    EmitFailed,
}

struct SessionInner {
    id: SessionId,
    state: AtomicU8,
    store: Arc<StateStore>,
    sink: Mutex<Box<dyn EventSink>>,
    subscription: Mutex<Option<Subscription>>,
    /// Dropping the sender stops the timer thread.
    cancel_timers: Mutex<Option<Sender<()>>>,
    close_reason: Mutex<Option<CloseReason>>,
    closed_tx: Sender<CloseReason>,
    emitted: AtomicU64,
}

impl SessionInner {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn is_open(&self) -> bool {
        self.state() < SessionState::Closing
    }

    /// Build an event and write it, unless teardown has started.
    ///
    /// The event is built under the sink lock so frames leave in generation order.
    /// A transport failure closes the session.
    fn emit<F>(&self, build: F) -> Result<(), StreamError>
    where
        F: FnOnce() -> StreamEvent,
    {
        let result = {
            let mut sink = self.sink.lock();
            if !self.is_open() {
                return Err(StreamError::Closed);
            }

            let frame = build().to_frame()?;
            sink.send(&frame).map_err(StreamError::Emit)
        };

        match result {
            Ok(()) => {
                self.emitted.fetch_add(1, Ordering::SeqCst);
            }
            Err(ref e) => {
                tracing::warn!(session = %self.id, error = %e, "stream write failed");
                self.close(CloseReason::EmitFailed);
            }
        }

        result
    }

    /// Send the current document, or an error event if it cannot be loaded.
    fn emit_update(&self) -> Result<(), StreamError> {
        self.emit(|| match self.store.load() {
            Ok(state) => StreamEvent::GameStateUpdate(state),
            Err(e) => {
                tracing::warn!(session = %self.id, error = %e, "failed to load game state for update");
                StreamEvent::error(LOAD_FAILED_MESSAGE)
            }
        })
    }

    /// Tear down. Only the first caller does any work; returns whether this call did.
    fn close(&self, reason: CloseReason) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if SessionState::from_u8(current) >= SessionState::Closing {
                return false;
            }
            match self.state.compare_exchange(
                current,
                SessionState::Closing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        *self.close_reason.lock() = Some(reason);

        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }

        // Stops both the heartbeat and the lifetime timer.
        drop(self.cancel_timers.lock().take());

        if let Err(e) = self.sink.lock().close() {
            tracing::debug!(session = %self.id, error = %e, "error closing stream");
        }

        self.state.store(SessionState::Closed as u8, Ordering::SeqCst);
        let _ = self.closed_tx.try_send(reason);

        tracing::info!(
            session = %self.id,
            ?reason,
            emitted = self.emitted.load(Ordering::SeqCst),
            "stream session closed"
        );
        true
    }
}

/// Cloneable trigger for the client-disconnect teardown path.
///
/// Holds no strong reference: aborting a session that is already gone is a no-op.
#[derive(Clone)]
pub struct AbortHandle {
    inner: Weak<SessionInner>,
}

impl AbortHandle {
    /// Close the session as disconnected. Returns `true` if this call tore it down.
    pub fn abort(&self) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.close(CloseReason::ClientDisconnected),
            None => false,
        }
    }
}

/// A live stream to one client.
///
/// Dropping the session closes it as [`CloseReason::ClientDisconnected`].
pub struct StreamSession {
    inner: Arc<SessionInner>,
    closed_rx: Receiver<CloseReason>,
    timers: Option<JoinHandle<()>>,
}

impl StreamSession {
    /// Open a session writing to `sink`.
    ///
    /// Subscribes to `bus`, sends the current document and starts the heartbeat
    /// and lifetime timers. Bus callbacks run on the publishing thread, so a slow
    /// sink slows down writers.
    pub fn open<S>(
        store: Arc<StateStore>,
        bus: &dyn ChangeBus,
        sink: S,
        config: SessionConfig,
    ) -> Result<Self, StreamError>
    where
        S: EventSink + 'static,
    {
        let (closed_tx, closed_rx) = bounded(1);
        let (cancel_tx, cancel_rx) = bounded::<()>(0);

        let inner = Arc::new(SessionInner {
            id: SessionId::next(),
            state: AtomicU8::new(SessionState::Opening as u8),
            store,
            sink: Mutex::new(Box::new(sink)),
            subscription: Mutex::new(None),
            cancel_timers: Mutex::new(Some(cancel_tx)),
            close_reason: Mutex::new(None),
            closed_tx,
            emitted: AtomicU64::new(0),
        });

        // Subscribe before the first snapshot so no change can fall in between.
        let weak = Arc::downgrade(&inner);
        let subscription = bus.subscribe(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                let _ = inner.emit_update();
            }
        }));
        *inner.subscription.lock() = Some(subscription);

        let mut session = Self {
            inner,
            closed_rx,
            timers: None,
        };

        session.inner.emit_update()?;

        let weak = Arc::downgrade(&session.inner);
        let handle = thread::Builder::new()
            .name(format!("stream-session-{}", session.inner.id))
            .spawn(move || run_timers(weak, cancel_rx, config))?;
        session.timers = Some(handle);

        let _ = session.inner.state.compare_exchange(
            SessionState::Opening as u8,
            SessionState::Active as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        tracing::info!(session = %session.inner.id, "stream session opened");
        Ok(session)
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    /// Number of events written so far.
    pub fn emitted_count(&self) -> u64 {
        self.inner.emitted.load(Ordering::SeqCst)
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Close as disconnected. Returns `true` if this call tore the session down.
    pub fn abort(&self) -> bool {
        self.inner.close(CloseReason::ClientDisconnected)
    }

    /// Send the current document now.
    pub fn push_update(&self) -> Result<(), StreamError> {
        self.inner.emit_update()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.inner.close_reason.lock()
    }

    /// Block until the session is closed.
    pub fn wait(&self) -> CloseReason {
        if let Some(reason) = self.close_reason() {
            if self.state() == SessionState::Closed {
                return reason;
            }
        }
        match self.closed_rx.recv() {
            Ok(reason) => reason,
            // Only reachable if the reason was already taken by an earlier wait.
            Err(_) => self
                .close_reason()
                .unwrap_or(CloseReason::ClientDisconnected),
        }
    }

    /// Block until the session is closed or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CloseReason> {
        if self.state() == SessionState::Closed {
            return self.close_reason();
        }
        match self.closed_rx.recv_timeout(timeout) {
            Ok(reason) => Some(reason),
            Err(_) if self.state() == SessionState::Closed => self.close_reason(),
            Err(_) => None,
        }
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.inner.close(CloseReason::ClientDisconnected);
        if let Some(handle) = self.timers.take() {
            let _ = handle.join();
        }
    }
}

/// Heartbeat and lifetime timers for one session.
fn run_timers(inner: Weak<SessionInner>, cancel: Receiver<()>, config: SessionConfig) {
    let heartbeat = tick(config.heartbeat_interval);
    let deadline = after(config.max_lifetime);

    loop {
        select! {
            recv(heartbeat) -> _ => {
                let inner = match inner.upgrade() {
                    Some(inner) => inner,
                    None => break,
                };
                if inner.emit(StreamEvent::heartbeat).is_err() && !inner.is_open() {
                    break;
                }
            }
            recv(deadline) -> _ => {
                if let Some(inner) = inner.upgrade() {
                    inner.close(CloseReason::LifetimeExpired);
                }
                break;
            }
            recv(cancel) -> _ => break,
        }
    }
}
