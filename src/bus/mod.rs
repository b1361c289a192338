//! Change notification bus.
//!
//! The bus tells interested parties that the document changed. Events carry
//! no payload: a listener re-reads the store when it is invoked.
//!
//! - Listeners run synchronously on the publishing thread, in registration order
//! - A panicking listener is isolated from the others
//! - Nothing is buffered: a listener registered after a publish never sees it
//!
//! # Example
//!
//! ```ignore
//! let bus = LocalBus::new();
//!
//! let subscription = bus.subscribe(Arc::new(|| println!("document changed")));
//! bus.publish();
//!
//! subscription.unsubscribe();
//! subscription.unsubscribe(); // no-op
//! ```

mod local;
mod types;

pub use local::LocalBus;
pub use types::{listener, ChangeBus, Listener, ListenerId, Subscription};
