//! Subscribe/notify fan-out with RAII deregistration
//!
//! Used for ICE gathering notifications, connection resource events and
//! session state changes. A [`Subscription`] only holds a weak reference to
//! its registry, so a subscriber never keeps a released resource alive, and
//! dropping the subscription removes it from the registry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

struct RegistryInner<T> {
    next_id: u64,
    observers: HashMap<u64, mpsc::UnboundedSender<T>>,
    closed: bool,
}

/// Registry of observers for values of type `T`
pub struct ObserverRegistry<T> {
    inner: Arc<Mutex<RegistryInner<T>>>,
}

impl<T> Clone for ObserverRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for ObserverRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for ObserverRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ObserverRegistry")
            .field("observers", &inner.observers.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl<T> ObserverRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 0,
                observers: HashMap::new(),
                closed: false,
            })),
        }
    }

    /// Register a new observer
    ///
    /// On a closed registry the returned subscription is already ended.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;

        if !inner.closed {
            inner.observers.insert(id, tx);
        }

        Subscription {
            id,
            receiver: rx,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Number of registered observers
    pub fn len(&self) -> usize {
        self.inner.lock().observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Drop every observer and refuse new ones
    ///
    /// Pending values already queued stay readable; receivers then end.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.observers.clear();
    }
}

impl<T: Clone> ObserverRegistry<T> {
    /// Deliver `value` to every observer
    ///
    /// Delivery happens under the registry lock, so concurrent notifiers are
    /// observed in one global order by every subscriber.
    pub fn notify(&self, value: T) {
        let mut inner = self.inner.lock();
        inner
            .observers
            .retain(|_, tx| tx.send(value.clone()).is_ok());
    }
}

/// Handle to one registered observer; deregisters on drop
pub struct Subscription<T> {
    id: u64,
    receiver: mpsc::UnboundedReceiver<T>,
    registry: Weak<Mutex<RegistryInner<T>>>,
}

impl<T> Subscription<T> {
    /// Wait for the next value; `None` once the registry is closed or gone
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Take the next value if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.lock().observers.remove(&self.id);
        }
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
