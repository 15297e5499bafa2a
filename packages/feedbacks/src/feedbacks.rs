//! Ordered feedback sets and the merged event stream.
//!
//! A [`Feedbacks`] set is where a system's effects are registered. When the
//! loop starts, every feedback is subscribed to the state relay and run on
//! its own scheduler; their events meet at a single merge point that the
//! transitions consume one at a time.
//!
//! # Ordering
//!
//! - Every feedback receives every broadcast state, in production order
//! - Events from different feedbacks are **not** ordered relative to each
//!   other; only the consumption at the merge point is serialized

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::core::{Event, State};
use crate::error::Result;
use crate::feedback::{EventFeed, Feedback};
use crate::relay::StateRelay;
use crate::scheduler::Scheduler;

/// An ordered list of feedbacks.
///
/// # Example
///
/// ```ignore
/// let feedbacks = Feedbacks::new()
///     .with(load_feedback)
///     .with(log_feedback.execute(Scheduler::named("logger")))
///     .execute(Scheduler::named("effects"));
/// ```
pub struct Feedbacks<S: State, E: Event> {
    feedbacks: Vec<Feedback<S, E>>,
}

impl<S: State, E: Event> Clone for Feedbacks<S, E> {
    fn clone(&self) -> Self {
        Self {
            feedbacks: self.feedbacks.clone(),
        }
    }
}

impl<S: State, E: Event> Feedbacks<S, E> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            feedbacks: Vec::new(),
        }
    }

    /// Append a feedback.
    pub fn with(mut self, feedback: Feedback<S, E>) -> Self {
        self.feedbacks.push(feedback);
        self
    }

    /// Append a feedback in place.
    pub fn push(&mut self, feedback: Feedback<S, E>) {
        self.feedbacks.push(feedback);
    }

    /// Number of feedbacks.
    pub fn len(&self) -> usize {
        self.feedbacks.len()
    }

    /// Returns true if the set has no feedback.
    pub fn is_empty(&self) -> bool {
        self.feedbacks.is_empty()
    }

    /// Iterate over the feedbacks in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Feedback<S, E>> {
        self.feedbacks.iter()
    }

    /// The most recently registered feedback.
    pub fn last(&self) -> Option<&Feedback<S, E>> {
        self.feedbacks.last()
    }

    /// Bind every feedback without its own scheduler to `scheduler`.
    ///
    /// Feedbacks that already carry a scheduler keep it.
    pub fn execute(self, scheduler: Scheduler) -> Self {
        Self {
            feedbacks: self
                .feedbacks
                .into_iter()
                .map(|feedback| feedback.execute(scheduler.clone()))
                .collect(),
        }
    }

    /// Subscribe every feedback to `relay` and merge their events.
    ///
    /// Feedbacks on a non-immediate scheduler are spawned there and forward
    /// their events through a channel; the others are polled inline by
    /// whoever consumes the returned stream. Dropping the stream stops every
    /// spawned feedback.
    pub fn event_stream(&self, relay: &StateRelay<S>) -> Result<EventFeed<E>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inline = Vec::new();

        for feedback in &self.feedbacks {
            let events = feedback.side_effect(relay.subscribe());
            match feedback.scheduler() {
                Some(scheduler) if !scheduler.is_immediate() => {
                    debug!(
                        feedback = feedback.name(),
                        scheduler = ?scheduler.label(),
                        "spawning feedback"
                    );
                    scheduler.spawn(
                        "feedback",
                        forward(feedback.name().to_string(), events, tx.clone()),
                    )?;
                }
                _ => {
                    debug!(feedback = feedback.name(), "running feedback inline");
                    inline.push(events);
                }
            }
        }

        let spawned = UnboundedReceiverStream::new(rx);
        Ok(stream::select(spawned, stream::select_all(inline)).boxed())
    }
}

/// Drive one feedback's events into the merge point until either side ends.
async fn forward<E: Event>(name: String, mut events: EventFeed<E>, tx: mpsc::UnboundedSender<E>) {
    loop {
        tokio::select! {
            biased;
            _ = tx.closed() => break,
            next = events.next() => match next {
                Some(event) => {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
    debug!(feedback = %name, "feedback stopped");
}

impl<S: State, E: Event> Default for Feedbacks<S, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: State, E: Event> FromIterator<Feedback<S, E>> for Feedbacks<S, E> {
    fn from_iter<I: IntoIterator<Item = Feedback<S, E>>>(iter: I) -> Self {
        Self {
            feedbacks: iter.into_iter().collect(),
        }
    }
}

impl<S: State, E: Event> std::fmt::Debug for Feedbacks<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.feedbacks.iter()).finish()
    }
}
