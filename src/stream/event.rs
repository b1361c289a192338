//! Event stream wire format.
//!
//! Every event is framed as
//!
//! ```text
//! event: <name>
//! data: <JSON>
//!
//! ```
//!
//! The parser side follows the usual event-stream rules: `:` starts a comment,
//! repeated `data` lines are joined with `\n`, unknown fields are ignored and a
//! blank line dispatches the event.

use crate::error::ClientError;
use crate::types::{GameState, Timestamp};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead};

/// Full document after a change (or on connect).
pub const GAME_STATE_UPDATE: &str = "gameStateUpdate";

/// Liveness tick.
pub const HEARTBEAT: &str = "heartbeat";

/// Server-side failure the client may treat as fatal.
pub const ERROR: &str = "error";

/// Message sent when the document cannot be loaded for an update.
pub const LOAD_FAILED_MESSAGE: &str = "Failed to load game state";

/// Events written to a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    GameStateUpdate(GameState),
    Heartbeat { timestamp: Timestamp },
    Error { error: String },
}

#[derive(Serialize, Deserialize)]
struct HeartbeatPayload {
    timestamp: Timestamp,
}

#[derive(Serialize, Deserialize)]
struct ErrorPayload {
    error: String,
}

impl StreamEvent {
    /// A heartbeat stamped now.
    pub fn heartbeat() -> Self {
        StreamEvent::Heartbeat {
            timestamp: Timestamp::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            error: message.into(),
        }
    }

    /// Event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::GameStateUpdate(_) => GAME_STATE_UPDATE,
            StreamEvent::Heartbeat { .. } => HEARTBEAT,
            StreamEvent::Error { .. } => ERROR,
        }
    }

    /// JSON payload carried in the `data` line.
    pub fn payload(&self) -> serde_json::Result<String> {
        match self {
            StreamEvent::GameStateUpdate(state) => serde_json::to_string(state),
            StreamEvent::Heartbeat { timestamp } => serde_json::to_string(&HeartbeatPayload {
                timestamp: *timestamp,
            }),
            StreamEvent::Error { error } => serde_json::to_string(&ErrorPayload {
                error: error.clone(),
            }),
        }
    }

    /// The complete frame, including the terminating blank line.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        Ok(format!("event: {}\ndata: {}\n\n", self.name(), self.payload()?))
    }

    /// Decode a parsed frame. Unknown event names yield `Ok(None)`.
    pub fn decode(raw: &RawEvent) -> Result<Option<Self>, ClientError> {
        let malformed = |e: serde_json::Error| ClientError::MalformedPayload {
            event: raw.event.clone(),
            message: e.to_string(),
        };

        let event = match raw.event.as_str() {
            GAME_STATE_UPDATE => {
                StreamEvent::GameStateUpdate(serde_json::from_str(&raw.data).map_err(malformed)?)
            }
            HEARTBEAT => {
                let payload: HeartbeatPayload =
                    serde_json::from_str(&raw.data).map_err(malformed)?;
                StreamEvent::Heartbeat {
                    timestamp: payload.timestamp,
                }
            }
            ERROR => {
                let payload: ErrorPayload = serde_json::from_str(&raw.data).map_err(malformed)?;
                StreamEvent::Error {
                    error: payload.error,
                }
            }
            _ => return Ok(None),
        };

        Ok(Some(event))
    }
}

/// An event as framed on the wire, before its payload is decoded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawEvent {
    /// Event name (`message` when the frame has no `event` field).
    pub event: String,
    pub data: String,
    pub id: Option<String>,
    /// Reconnection delay hint in milliseconds.
    pub retry: Option<u64>,
}

/// Incremental, line-oriented event parser.
#[derive(Debug, Default)]
pub struct EventParser {
    event: Option<String>,
    data: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (with or without its line terminator).
    ///
    /// Returns an event when `line` is the blank line that completes one.
    pub fn feed_line(&mut self, line: &str) -> Option<RawEvent> {
        let line = line.trim_end_matches(&['\n', '\r'][..]);

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => match self.data {
                Some(ref mut data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "id" => self.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse::<u64>() {
                    self.retry = Some(ms);
                }
            }
            other => tracing::trace!(field = other, "ignoring unknown event field"),
        }

        None
    }

    /// Read lines from `reader` until an event completes.
    ///
    /// Returns `Ok(None)` at end of stream; a trailing incomplete event is discarded.
    pub fn next_event<R: BufRead + ?Sized>(&mut self, reader: &mut R) -> io::Result<Option<RawEvent>> {
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                *self = Self::default();
                return Ok(None);
            }
            if let Some(event) = self.feed_line(&line) {
                return Ok(Some(event));
            }
        }
    }

    fn dispatch(&mut self) -> Option<RawEvent> {
        let event = self.event.take();
        let data = self.data.take();
        let retry = self.retry.take();
        // The last event id persists across events.
        let id = self.id.clone();

        data.map(|data| RawEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
            id,
            retry,
        })
    }
}
