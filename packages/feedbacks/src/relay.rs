//! Single-slot replay broadcaster for states.
//!
//! # Guarantees
//!
//! - **Replay of one**: a new subscriber first receives the latest published
//!   state, then everything published afterwards
//! - **No drops**: each subscriber has its own unbounded queue, so a slow
//!   feedback never misses a state
//! - **Strict order**: publish and subscribe are serialized by one lock, so
//!   every subscriber sees states in production order
//!
//! Dropped subscribers are pruned on the next publish.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::warn;

use crate::core::State;
use crate::feedback::StateFeed;

struct RelayInner<S> {
    latest: Option<S>,
    subscribers: Vec<mpsc::UnboundedSender<S>>,
}

/// The state broadcaster closing a system's loop.
///
/// Cheap to clone; clones share the same slot and subscriber list.
///
/// # Example
///
/// ```ignore
/// let relay = StateRelay::new();
/// relay.publish(Screen::Loading);
///
/// // Late subscriber still sees the latest state first
/// let mut states = relay.subscribe();
/// assert_eq!(states.next().await, Some(Screen::Loading));
/// ```
pub struct StateRelay<S> {
    inner: Arc<Mutex<RelayInner<S>>>,
}

impl<S> Clone for StateRelay<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: State> StateRelay<S> {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RelayInner {
                latest: None,
                subscribers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RelayInner<S>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("state relay mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Store `state` as the latest value and deliver it to every subscriber.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, state: S) -> usize {
        let mut inner = self.lock();
        inner
            .subscribers
            .retain(|subscriber| subscriber.send(state.clone()).is_ok());
        inner.latest = Some(state);
        inner.subscribers.len()
    }

    /// Subscribe to the relay, starting with the latest state if one exists.
    pub fn subscribe(&self) -> StateFeed<S> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        if let Some(latest) = &inner.latest {
            // Receiver is alive, this cannot fail.
            let _ = tx.send(latest.clone());
        }
        inner.subscribers.push(tx);
        UnboundedReceiverStream::new(rx).boxed()
    }

    /// The latest published state.
    pub fn latest(&self) -> Option<S> {
        self.lock().latest.clone()
    }

    /// Number of subscribers still registered.
    ///
    /// Dropped subscribers are only noticed on the next publish.
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

impl<S: State> Default for StateRelay<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: State> std::fmt::Debug for StateRelay<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("StateRelay")
            .field("latest", &inner.latest)
            .field("subscriber_count", &inner.subscribers.len())
            .finish()
    }
}
