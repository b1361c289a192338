//! Viewer-side stream consumer.
//!
//! A [`ReconnectingClient`] keeps the latest document and a connectivity flag
//! up to date. When the stream drops it waits a fixed delay and connects again,
//! passing the last seen `lastUpdated` as a resume hint. The server answers
//! every connection with a full snapshot, so resuming is just reconnecting.
//!
//! # Example
//!
//! ```ignore
//! let client = ReconnectingClient::start(LocalConnector::new(context), ClientConfig::default())?;
//!
//! for state in client.updates().iter() {
//!     render(&state, client.status());
//! }
//! ```

mod connector;
mod reconnect;

pub use connector::{CancelHandle, Connection, Connector, EventStream, LocalConnector};
pub use reconnect::{ClientConfig, ConnectionStatus, ReconnectingClient, DEFAULT_RECONNECT_DELAY};
