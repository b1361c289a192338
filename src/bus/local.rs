//! In-process change bus.

use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::types::{ChangeBus, Listener, ListenerId, Subscription};

struct Registry {
    /// Registration order is invocation order.
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
    published: AtomicU64,
    panicked: AtomicU64,
}

impl Registry {
    fn remove(&self, id: ListenerId) {
        let mut listeners = self.listeners.write();
        if let Some(pos) = listeners.iter().position(|(lid, _)| *lid == id) {
            listeners.remove(pos);
            tracing::debug!(listener = %id, "listener removed");
        }
    }
}

/// Fan-out bus for a single process.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct LocalBus {
    registry: Arc<Registry>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
            }),
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.registry.listeners.read().len()
    }

    /// Number of completed publish passes.
    pub fn publish_count(&self) -> u64 {
        self.registry.published.load(Ordering::SeqCst)
    }

    /// Number of listener invocations that panicked.
    pub fn panic_count(&self) -> u64 {
        self.registry.panicked.load(Ordering::SeqCst)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBus for LocalBus {
    fn subscribe(&self, listener: Listener) -> Subscription {
        let id = ListenerId(self.registry.next_id.fetch_add(1, Ordering::SeqCst));
        self.registry.listeners.write().push((id, listener));
        tracing::debug!(listener = %id, "listener registered");

        let registry: Weak<Registry> = Arc::downgrade(&self.registry);
        Subscription::new(id, move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(id);
            }
        })
    }

    fn publish(&self) {
        // Snapshot so listeners may (un)subscribe while being invoked.
        let listeners: Vec<(ListenerId, Listener)> = self.registry.listeners.read().clone();

        for (id, listener) in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                self.registry.panicked.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(listener = %id, "listener panicked during publish");
            }
        }

        self.registry.published.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::listener;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribe_unsubscribe() {
        let bus = LocalBus::new();

        let sub = bus.subscribe(listener(|| {}));
        assert_eq!(bus.listener_count(), 1);

        assert!(sub.unsubscribe());
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = LocalBus::new();
        let first = bus.subscribe(listener(|| {}));
        let _second = bus.subscribe(listener(|| {}));

        assert!(first.unsubscribe());
        assert!(!first.unsubscribe());
        assert!(!first.is_active());

        // Only the first listener was removed
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn test_publish_in_registration_order() {
        let bus = LocalBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut subs = Vec::new();
        for i in 0..5 {
            let order = Arc::clone(&order);
            subs.push(bus.subscribe(listener(move || order.lock().push(i))));
        }

        bus.publish();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(bus.publish_count(), 1);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let bus = LocalBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&calls);
        let _a = bus.subscribe(listener(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        let _b = bus.subscribe(listener(|| panic!("listener failure")));
        let c = Arc::clone(&calls);
        let _c = bus.subscribe(listener(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        bus.publish();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(bus.panic_count(), 1);
    }

    #[test]
    fn test_no_replay_for_late_subscribers() {
        let bus = LocalBus::new();
        bus.publish();

        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let _sub = bus.subscribe(listener(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        bus.publish();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_can_unsubscribe_itself() {
        let bus = LocalBus::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&slot);
        let c = Arc::clone(&calls);
        let sub = bus.subscribe(listener(move || {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = s.lock().as_ref() {
                sub.unsubscribe();
            }
        }));
        *slot.lock() = Some(sub);

        bus.publish();
        bus.publish();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_concurrent_subscribe_and_publish() {
        let bus = LocalBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bus = bus.clone();
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let c = Arc::clone(&calls);
                        let sub = bus.subscribe(listener(move || {
                            c.fetch_add(1, Ordering::SeqCst);
                        }));
                        bus.publish();
                        sub.unsubscribe();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(bus.listener_count(), 0);
        assert_eq!(bus.publish_count(), 400);
        // Each publish saw at least the publishing thread's own listener
        assert!(calls.load(Ordering::SeqCst) >= 400);
    }
}
