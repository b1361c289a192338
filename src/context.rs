//! Process-wide server context.

use crate::bus::{ChangeBus, LocalBus};
use crate::error::{Result, StreamError};
use crate::store::{StateStore, StoreConfig};
use crate::stream::{ChannelSink, EventSink, FrameReader, SessionConfig, StreamSession};
use crate::types::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Server configuration.
#[derive(Clone, Debug, Default)]
pub struct ServerConfig {
    pub store: StoreConfig,
    pub session: SessionConfig,
}

/// Owns the bus and the store, and opens stream sessions against them.
///
/// Built once at startup and shared (usually behind an `Arc`) with whatever
/// serves requests.
pub struct ServerContext {
    bus: Arc<dyn ChangeBus>,
    store: Arc<StateStore>,
    session_config: SessionConfig,
    sessions_opened: AtomicU64,
}

impl ServerContext {
    /// Open the store with an in-process bus.
    pub fn open(config: ServerConfig) -> Result<Self> {
        Self::with_bus(config, Arc::new(LocalBus::new()))
    }

    /// Open the store publishing to `bus`.
    pub fn with_bus(config: ServerConfig, bus: Arc<dyn ChangeBus>) -> Result<Self> {
        let store = StateStore::open(config.store, Arc::clone(&bus))?;
        Ok(Self {
            bus,
            store: Arc::new(store),
            session_config: config.session,
            sessions_opened: AtomicU64::new(0),
        })
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<dyn ChangeBus> {
        &self.bus
    }

    pub fn session_config(&self) -> &SessionConfig {
        &self.session_config
    }

    /// Total sessions opened through this context.
    pub fn sessions_opened(&self) -> u64 {
        self.sessions_opened.load(Ordering::Relaxed)
    }

    /// Open a session streaming to `sink`.
    ///
    /// `resume_hint` is the `lastUpdated` the client last saw. It is logged only:
    /// every session starts with a full snapshot.
    pub fn open_session<S>(
        &self,
        sink: S,
        resume_hint: Option<Timestamp>,
    ) -> std::result::Result<StreamSession, StreamError>
    where
        S: EventSink + 'static,
    {
        let session = StreamSession::open(
            Arc::clone(&self.store),
            &*self.bus,
            sink,
            self.session_config.clone(),
        )?;
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);

        match resume_hint {
            Some(hint) => tracing::debug!(session = %session.id(), %hint, "client resuming"),
            None => tracing::debug!(session = %session.id(), "client connected"),
        }

        Ok(session)
    }

    /// Open a session and return its frames as a byte stream.
    ///
    /// The reader owns the session: dropping it disconnects.
    pub fn connect(&self, resume_hint: Option<Timestamp>) -> std::result::Result<FrameReader, StreamError> {
        let (sink, frames) = ChannelSink::channel();
        let session = self.open_session(sink, resume_hint)?;
        Ok(FrameReader::new(frames).with_session(session))
    }
}
