//! Client that keeps one logical subscription alive across transport drops.

use crate::error::ClientError;
use crate::stream::{EventParser, RawEvent, StreamEvent};
use crate::types::{GameState, Timestamp};
use crossbeam_channel::{after, bounded, select, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::connector::{CancelHandle, Connector};

/// Default wait before reconnecting after the stream ends.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Documents buffered for [`ReconnectingClient::updates`] before new ones are dropped.
const UPDATE_BUFFER: usize = 256;

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Fixed delay before each reconnect attempt.
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

/// Connectivity as shown to viewers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Live,
    Reconnecting,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Live => f.write_str("Live Updates"),
            ConnectionStatus::Reconnecting => f.write_str("Reconnecting..."),
        }
    }
}

struct ClientShared {
    connected: AtomicBool,
    stopped: AtomicBool,
    game_state: RwLock<Option<GameState>>,
    /// `lastUpdated` of the newest document received over a stream.
    last_received: Mutex<Option<Timestamp>>,
    /// Hangs up the stream currently being read.
    cancel: Mutex<Option<CancelHandle>>,
    updates_tx: Sender<GameState>,
    connect_attempts: AtomicU64,
    parse_failures: AtomicU64,
}

impl ClientShared {
    fn last_updated(&self) -> Option<Timestamp> {
        *self.last_received.lock()
    }

    /// Remember how to hang up the current stream. Fires it at once if a stop
    /// request raced with connecting.
    fn set_cancel(&self, cancel: Option<CancelHandle>) {
        *self.cancel.lock() = cancel;
        if self.stopped.load(Ordering::SeqCst) {
            self.fire_cancel();
        }
    }

    fn fire_cancel(&self) {
        let cancel = self.cancel.lock().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }

    fn handle(&self, raw: RawEvent) {
        match StreamEvent::decode(&raw) {
            Ok(Some(StreamEvent::GameStateUpdate(state))) => {
                tracing::debug!(last_updated = %state.last_updated, "game state update received");
                *self.last_received.lock() = Some(state.last_updated);
                *self.game_state.write() = Some(state.clone());
                if let Err(TrySendError::Full(_)) = self.updates_tx.try_send(state) {
                    tracing::trace!("update buffer full, dropping notification");
                }
            }
            Ok(Some(StreamEvent::Heartbeat { timestamp })) => {
                tracing::trace!(%timestamp, "heartbeat received");
            }
            Ok(Some(StreamEvent::Error { error })) => {
                tracing::warn!(%error, "server reported an error");
            }
            Ok(None) => {
                tracing::trace!(event = %raw.event, "ignoring unknown event");
            }
            Err(e) => {
                self.parse_failures.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(error = %e, "failed to parse event");
            }
        }
    }

    /// Read events until the stream ends or the client is stopped.
    fn consume(&self, stream: &mut (dyn BufRead + Send)) -> io::Result<()> {
        let mut parser = EventParser::new();
        while let Some(raw) = parser.next_event(stream)? {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            self.handle(raw);
        }
        Ok(())
    }
}

/// Maintains a believed-connected flag and the latest document.
///
/// A worker thread connects on start and after every disconnect, presenting
/// the last received `lastUpdated` as a resume hint. Each disconnect schedules
/// exactly one attempt after `reconnect_delay`; the delay never grows.
pub struct ReconnectingClient {
    shared: Arc<ClientShared>,
    updates_rx: Receiver<GameState>,
    /// Dropping the sender stops the worker.
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl ReconnectingClient {
    /// Start connecting with no document yet.
    pub fn start<C: Connector>(connector: C, config: ClientConfig) -> io::Result<Self> {
        Self::spawn(connector, config, None)
    }

    /// Start with a document already known (for example one rendered with the page).
    ///
    /// The document is shown until the first update arrives. It does not count
    /// as received: the first connection carries no resume hint.
    pub fn with_initial_state<C: Connector>(
        connector: C,
        config: ClientConfig,
        initial: GameState,
    ) -> io::Result<Self> {
        Self::spawn(connector, config, Some(initial))
    }

    fn spawn<C: Connector>(
        connector: C,
        config: ClientConfig,
        initial: Option<GameState>,
    ) -> io::Result<Self> {
        let (updates_tx, updates_rx) = bounded(UPDATE_BUFFER);
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let shared = Arc::new(ClientShared {
            connected: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            game_state: RwLock::new(initial),
            last_received: Mutex::new(None),
            cancel: Mutex::new(None),
            updates_tx,
            connect_attempts: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("reconnecting-client".to_string())
            .spawn(move || run(connector, worker_shared, stop_rx, config))?;

        Ok(Self {
            shared,
            updates_rx,
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.is_connected() {
            ConnectionStatus::Live
        } else {
            ConnectionStatus::Reconnecting
        }
    }

    /// Most recently received document.
    pub fn game_state(&self) -> Option<GameState> {
        self.shared.game_state.read().clone()
    }

    /// `lastUpdated` of the most recently received document; sent as the resume hint.
    pub fn last_updated(&self) -> Option<Timestamp> {
        self.shared.last_updated()
    }

    /// Every document received, in arrival order.
    pub fn updates(&self) -> &Receiver<GameState> {
        &self.updates_rx
    }

    pub fn connect_attempts(&self) -> u64 {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    /// Events whose payload could not be decoded.
    pub fn parse_failures(&self) -> u64 {
        self.shared.parse_failures.load(Ordering::SeqCst)
    }

    /// Stop reconnecting, hang up the current stream and wait for the worker.
    ///
    /// With a connector that offers no cancel hook, this waits for the stream's
    /// next event.
    pub fn shutdown(mut self) {
        self.signal_stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn signal_stop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.stop_tx.take();
        self.shared.fire_cancel();
    }
}

impl Drop for ReconnectingClient {
    fn drop(&mut self) {
        // Hang up and detach; the worker exits on its own.
        self.signal_stop();
    }
}

fn run<C: Connector>(
    mut connector: C,
    shared: Arc<ClientShared>,
    stop: Receiver<()>,
    config: ClientConfig,
) {
    loop {
        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }

        let hint = shared.last_updated();
        shared.connect_attempts.fetch_add(1, Ordering::SeqCst);

        match connector.connect(hint) {
            Ok(connection) => {
                let (mut stream, cancel) = connection.into_parts();
                shared.set_cancel(cancel);
                shared.connected.store(true, Ordering::SeqCst);
                tracing::info!(resume_hint = ?hint, "event stream connected");

                let result = shared.consume(&mut *stream);
                shared.connected.store(false, Ordering::SeqCst);
                shared.cancel.lock().take();

                match result {
                    Ok(()) => tracing::info!("event stream closed"),
                    Err(e) => tracing::warn!(error = %ClientError::Transport(e), "event stream failed"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %ClientError::Connect(e), "event stream connection failed");
            }
        }

        select! {
            recv(stop) -> _ => break,
            recv(after(config.reconnect_delay)) -> _ => {
                tracing::debug!("attempting to reconnect");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::EventStream;
    use std::collections::VecDeque;
    use std::io::Cursor;

    fn frames(events: &[StreamEvent]) -> String {
        events.iter().map(|e| e.to_frame().unwrap()).collect()
    }

    fn state_titled(title: &str) -> GameState {
        let mut state = GameState::initial();
        state.game_title = title.to_string();
        state
    }

    /// Connector replaying canned streams, recording the hints it was given.
    fn scripted(streams: Vec<String>) -> (impl Connector, Receiver<Option<Timestamp>>) {
        let mut queue: VecDeque<String> = streams.into();
        let (hints_tx, hints_rx) = crossbeam_channel::unbounded();
        let connector = move |hint: Option<Timestamp>| -> io::Result<EventStream> {
            let _ = hints_tx.send(hint);
            match queue.pop_front() {
                Some(body) => Ok(Box::new(Cursor::new(body.into_bytes()))),
                None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "server down")),
            }
        };
        (connector, hints_rx)
    }

    fn fast() -> ClientConfig {
        ClientConfig {
            reconnect_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_reconnects_with_resume_hint() {
        let first = state_titled("first");
        let mut second = state_titled("second");
        second.last_updated = Timestamp::now_after(Some(first.last_updated));
        let (connector, hints) = scripted(vec![
            frames(&[StreamEvent::GameStateUpdate(first.clone())]),
            frames(&[StreamEvent::GameStateUpdate(second.clone())]),
        ]);

        let client = ReconnectingClient::start(connector, fast()).unwrap();

        let timeout = Duration::from_secs(2);
        assert_eq!(client.updates().recv_timeout(timeout).unwrap(), first);
        assert_eq!(client.updates().recv_timeout(timeout).unwrap(), second);

        assert_eq!(hints.recv_timeout(timeout).unwrap(), None);
        assert_eq!(hints.recv_timeout(timeout).unwrap(), Some(first.last_updated));

        // Stream ended: another attempt follows, carrying the latest hint.
        assert_eq!(hints.recv_timeout(timeout).unwrap(), Some(second.last_updated));
        assert_eq!(client.game_state(), Some(second));
        client.shutdown();
    }

    #[test]
    fn test_malformed_payload_keeps_stream() {
        let good = state_titled("after");
        let mut body = "event: gameStateUpdate\ndata: {not json}\n\n".to_string();
        body.push_str(&frames(&[
            StreamEvent::heartbeat(),
            StreamEvent::error("Failed to load game state"),
            StreamEvent::GameStateUpdate(good.clone()),
        ]));
        let (connector, hints) = scripted(vec![body]);

        let client = ReconnectingClient::start(connector, fast()).unwrap();

        let received = client.updates().recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received, good);
        assert_eq!(client.parse_failures(), 1);

        // The good update arrived on the first connection.
        assert_eq!(hints.recv_timeout(Duration::from_secs(2)).unwrap(), None);
        client.shutdown();
    }

    #[test]
    fn test_connect_failure_retries_at_fixed_delay() {
        let (connector, hints) = scripted(Vec::new());
        let client = ReconnectingClient::start(connector, fast()).unwrap();

        for _ in 0..3 {
            assert_eq!(hints.recv_timeout(Duration::from_secs(2)).unwrap(), None);
        }
        assert!(!client.is_connected());
        assert_eq!(client.status(), ConnectionStatus::Reconnecting);
        client.shutdown();
    }

    #[test]
    fn test_initial_state_is_not_a_resume_hint() {
        let initial = state_titled("rendered");
        let mut received = state_titled("received");
        received.last_updated = Timestamp::now_after(Some(initial.last_updated));
        let (connector, hints) =
            scripted(vec![frames(&[StreamEvent::GameStateUpdate(received.clone())])]);
        let client =
            ReconnectingClient::with_initial_state(connector, fast(), initial.clone()).unwrap();

        // Never presented as a hint.
        assert_eq!(hints.recv_timeout(Duration::from_secs(2)).unwrap(), None);

        assert_eq!(client.updates().recv_timeout(Duration::from_secs(2)).unwrap(), received);
        assert_eq!(
            hints.recv_timeout(Duration::from_secs(2)).unwrap(),
            Some(received.last_updated)
        );
        assert_eq!(client.last_updated(), Some(received.last_updated));
        client.shutdown();
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(ConnectionStatus::Live.to_string(), "Live Updates");
        assert_eq!(ConnectionStatus::Reconnecting.to_string(), "Reconnecting...");
    }
}
