//! Live event streams to viewers.
//!
//! A [`StreamSession`] owns one client connection. It writes `gameStateUpdate`
//! frames on connect and after every change, `heartbeat` frames while open, and
//! an `error` frame when the document cannot be loaded.
//!
//! # Example
//!
//! ```ignore
//! let (sink, frames) = ChannelSink::channel();
//! let session = StreamSession::open(store, &*bus, sink, SessionConfig::default())?;
//!
//! for frame in frames.iter() {
//!     response.write_all(frame.as_bytes())?;
//! }
//! ```

mod event;
mod session;
mod transport;

pub use event::{
    EventParser, RawEvent, StreamEvent, ERROR, GAME_STATE_UPDATE, HEARTBEAT, LOAD_FAILED_MESSAGE,
};
pub use session::{
    AbortHandle, CloseReason, SessionConfig, SessionId, SessionState, StreamSession,
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_LIFETIME,
};
pub use transport::{
    ChannelSink, EventSink, FrameReader, WriterSink, DEFAULT_FRAME_BUFFER, STREAM_HEADERS,
};
