//! Bus abstraction and subscription handles.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Callback invoked once per published change.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener<F>(f: F) -> Listener
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Publish/subscribe fan-out of "the document changed" notifications.
///
/// The store publishes and stream sessions subscribe, both through this trait,
/// so an out-of-process broker can stand in for [`super::LocalBus`].
pub trait ChangeBus: Send + Sync {
    /// Register a listener. It stays registered until the returned handle is unsubscribed.
    fn subscribe(&self, listener: Listener) -> Subscription;

    /// Invoke every currently registered listener.
    fn publish(&self);
}

/// Unique identifier for a registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Cancel = Box<dyn FnOnce() + Send>;

/// Handle to a registered listener.
///
/// Dropping the handle does not unsubscribe.
pub struct Subscription {
    id: ListenerId,
    cancel: Mutex<Option<Cancel>>,
}

impl Subscription {
    /// Create a handle that runs `cancel` the first time it is unsubscribed.
    pub fn new<F>(id: ListenerId, cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            id,
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener. Returns `true` only for the call that removed it.
    pub fn unsubscribe(&self) -> bool {
        let cancel = self.cancel.lock().take();
        match cancel {
            Some(cancel) => {
                cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.lock().is_some()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
