//! # Scoreline
//!
//! Keeps one shared game state document in sync between a few writers and
//! many passive viewers, pushing changes instead of polling.
//!
//! ## Core Concepts
//!
//! - **Store**: the document on disk, with default initialization and atomic saves
//! - **Bus**: in-process fan-out of "the document changed" notifications
//! - **Sessions**: one event stream per viewer, with heartbeats and a lifetime cap
//! - **Client**: viewer-side consumer that reconnects after drops
//!
//! ## Example
//!
//! ```ignore
//! use scoreline::{PlayerUpdate, ServerConfig, ServerContext, StoreConfig};
//!
//! let context = ServerContext::open(ServerConfig {
//!     store: StoreConfig {
//!         path: "./data".into(),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! })?;
//!
//! // A viewer connects and receives the current document
//! let (sink, frames) = ChannelSink::channel();
//! let session = context.open_session(sink, None)?;
//!
//! // A writer eliminates player 1; the viewer gets the new document
//! context
//!     .store()
//!     .update_player(1, &PlayerUpdate::default().health(0).active(false))?;
//! ```

pub mod bus;
pub mod client;
pub mod commands;
pub mod context;
pub mod error;
pub mod store;
pub mod stream;
pub mod types;

// Re-exports
pub use bus::{listener, ChangeBus, Listener, ListenerId, LocalBus, Subscription};
pub use client::{
    CancelHandle, ClientConfig, Connection, ConnectionStatus, Connector, EventStream,
    LocalConnector, ReconnectingClient,
};
pub use commands::{execute, AdminCommand, CommandOutcome, OutcomeKind};
pub use context::{ServerConfig, ServerContext};
pub use error::{ClientError, Result, StoreError, StreamError};
pub use store::{StateStore, StoreConfig};
pub use stream::{
    AbortHandle, ChannelSink, CloseReason, EventParser, EventSink, FrameReader, RawEvent,
    SessionConfig, SessionId, SessionState, StreamEvent, StreamSession, WriterSink,
    DEFAULT_FRAME_BUFFER, STREAM_HEADERS,
};
pub use types::*;
