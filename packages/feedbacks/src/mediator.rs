//! Mediators: broadcast relays that let engines talk without knowing each
//! other.
//!
//! A mediator is a cheap `Clone` handle to a shared subscriber set. Any
//! party holding a clone can [`Mediator::send`] a value or
//! [`Mediator::subscribe`] to the values sent after that point.
//!
//! # Delivery
//!
//! - `send` enumerates a snapshot of the subscribers taken when it starts,
//!   so callbacks may subscribe or unsubscribe while being notified
//! - sending with no subscriber drops the value silently
//! - [`CurrentValueMediator`] additionally replays its latest value to every
//!   new subscriber

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::warn;
use uuid::Uuid;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;
type Snapshot<T> = SmallVec<[Callback<T>; 4]>;

/// Subscriber set shared by every mediator flavour.
struct Subscribers<T> {
    callbacks: DashMap<Uuid, Callback<T>>,
}

impl<T: Send + Sync + 'static> Subscribers<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            callbacks: DashMap::new(),
        })
    }

    fn insert(self: &Arc<Self>, callback: Callback<T>) -> Subscription {
        let id = Uuid::new_v4();
        self.callbacks.insert(id, callback);

        let subscribers: Weak<Self> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(subscribers) = subscribers.upgrade() {
                subscribers.callbacks.remove(&id);
            }
        })
    }

    /// Never hold a shard lock while running a callback.
    fn snapshot(&self) -> Snapshot<T> {
        self.callbacks
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn notify(&self, value: &T) -> usize {
        deliver(&self.snapshot(), value)
    }

    fn len(&self) -> usize {
        self.callbacks.len()
    }
}

fn deliver<T>(snapshot: &Snapshot<T>, value: &T) -> usize {
    for callback in snapshot {
        callback(value);
    }
    snapshot.len()
}

/// Handle to one mediator subscription.
///
/// Dropping the handle cancels the subscription.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop receiving values. Cancelling twice is a no-op.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Returns true until the subscription is cancelled.
    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// A stream of mediator values, subscribed when it was created.
///
/// Dropping the stream cancels its subscription.
pub struct MediatorStream<T> {
    values: UnboundedReceiverStream<T>,
    subscription: Subscription,
}

impl<T> MediatorStream<T> {
    /// Returns true until the stream is dropped or its subscription cancelled.
    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_active()
    }
}

impl<T> Stream for MediatorStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.values).poll_next(cx)
    }
}

impl<T> fmt::Debug for MediatorStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediatorStream")
            .field("subscription", &self.subscription)
            .finish()
    }
}

/// A broadcast relay between engines or the outside world.
pub trait Mediator<T: Clone + Send + Sync + 'static>: Clone + Send + Sync + 'static {
    /// Deliver `value` to the current subscribers.
    ///
    /// Returns the number of subscribers notified.
    fn send(&self, value: T) -> usize;

    /// Call `on_value` with every value sent until the subscription ends.
    fn subscribe<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static;

    /// Number of live subscriptions.
    fn subscriber_count(&self) -> usize;

    /// Subscribe now and expose the values as a stream.
    ///
    /// The subscription lives as long as the stream.
    fn stream(&self) -> MediatorStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |value: &T| {
            let _ = tx.send(value.clone());
        });
        MediatorStream {
            values: UnboundedReceiverStream::new(rx),
            subscription,
        }
    }
}

/// Relays values to the subscribers present at send time.
pub struct PassthroughMediator<T> {
    subscribers: Arc<Subscribers<T>>,
}

impl<T> Clone for PassthroughMediator<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: self.subscribers.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> PassthroughMediator<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Subscribers::new(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for PassthroughMediator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Mediator<T> for PassthroughMediator<T> {
    fn send(&self, value: T) -> usize {
        self.subscribers.notify(&value)
    }

    fn subscribe<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.subscribers.insert(Arc::new(on_value))
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<T> fmt::Debug for PassthroughMediator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassthroughMediator")
            .field("subscriber_count", &self.subscribers.callbacks.len())
            .finish()
    }
}

/// Keeps the latest value and replays it to new subscribers.
///
/// The replay runs while the value is locked, so a subscriber never misses a
/// concurrent `send`. Callbacks must not call [`CurrentValueMediator::value`]
/// or `send` on the same mediator.
///
/// # Example
///
/// ```ignore
/// let mediator = CurrentValueMediator::new(-1);
/// let _sub = mediator.subscribe(|value| println!("{value}")); // prints -1
/// mediator.send(1);                                           // prints 1
/// assert_eq!(mediator.value(), 1);
/// ```
pub struct CurrentValueMediator<T> {
    current: Arc<Mutex<T>>,
    subscribers: Arc<Subscribers<T>>,
}

impl<T> Clone for CurrentValueMediator<T> {
    fn clone(&self) -> Self {
        Self {
            current: self.current.clone(),
            subscribers: self.subscribers.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> CurrentValueMediator<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: Arc::new(Mutex::new(initial)),
            subscribers: Subscribers::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("mediator value mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// The latest value.
    pub fn value(&self) -> T {
        self.lock().clone()
    }
}

impl<T: Clone + Send + Sync + 'static> Mediator<T> for CurrentValueMediator<T> {
    fn send(&self, value: T) -> usize {
        let snapshot = {
            let mut current = self.lock();
            *current = value.clone();
            self.subscribers.snapshot()
        };
        deliver(&snapshot, &value)
    }

    fn subscribe<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let on_value: Callback<T> = Arc::new(on_value);
        let current = self.lock();
        on_value(&*current);
        self.subscribers.insert(on_value)
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<T: fmt::Debug + Clone + Send + Sync + 'static> fmt::Debug for CurrentValueMediator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurrentValueMediator")
            .field("value", &*self.lock())
            .field("subscriber_count", &self.subscribers.len())
            .finish()
    }
}
