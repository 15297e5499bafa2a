//! The engine: a feedback loop closed over a transition table.
//!
//! ```text
//!               ┌───────────── StateRelay ◄────────────┐
//!               │                                      │ publish
//!               ▼ subscribe (replay latest)            │
//!   Feedback A ─┐                                      │
//!   Feedback B ─┼─► merged events ─► Transitions ──────┘
//!   Feedback C ─┘                   (one at a time)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use feedbacks::{Engine, Feedbacks, Transitions, Scheduler};
//!
//! let mut engine = Engine::with_initial_state(Screen::Loading, feedbacks, transitions)
//!     .execute(Scheduler::named("screen"));
//!
//! // Drive the loop from a background task
//! engine.start()?;
//!
//! // Or consume the states yourself
//! let mut states = engine.stream();
//! while let Some(state) = states.next().await { /* render */ }
//! ```
//!
//! # Lifecycle
//!
//! [`Engine::stream`] is lazy: nothing runs until it is first polled, and
//! dropping it tears down every feedback it started. [`Engine::start`] keeps
//! one such stream alive in a background task until [`Engine::stop`] or the
//! engine is dropped. Each call to `start` (or `stream`) runs an independent
//! loop.

use std::fmt;
use std::sync::Arc;

use futures::future;
use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info};

use crate::core::{Event, State};
use crate::error::Result;
use crate::feedback::{Feedback, StateFeed};
use crate::feedbacks::Feedbacks;
use crate::relay::StateRelay;
use crate::scheduler::Scheduler;
use crate::transitions::Transitions;

type InitialState<S> = Arc<dyn Fn() -> S + Send + Sync>;

/// Logs the end of a state loop when its stream is dropped.
struct LoopGuard {
    label: Option<Arc<str>>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        info!(scheduler = ?self.label, "state loop stopped");
    }
}

/// One started loop: cancelled when dropped.
struct Running {
    _cancel: DropGuard,
    task: JoinHandle<()>,
}

impl Running {
    fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }
}

/// A self-regulating system of states, feedbacks and transitions.
pub struct Engine<S: State, E: Event> {
    initial: InitialState<S>,
    feedbacks: Feedbacks<S, E>,
    transitions: Transitions<S, E>,
    scheduler: Option<Scheduler>,
    subscriptions: Vec<Running>,
}

impl<S: State, E: Event> Engine<S, E> {
    /// Create an engine whose initial state is computed by `initial` each
    /// time a loop starts.
    pub fn new<F>(initial: F, feedbacks: Feedbacks<S, E>, transitions: Transitions<S, E>) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        Self {
            initial: Arc::new(initial),
            feedbacks,
            transitions,
            scheduler: None,
            subscriptions: Vec::new(),
        }
    }

    /// Create an engine starting from a fixed state.
    pub fn with_initial_state(
        state: S,
        feedbacks: Feedbacks<S, E>,
        transitions: Transitions<S, E>,
    ) -> Self {
        Self::new(move || state.clone(), feedbacks, transitions)
    }

    /// Set the engine's default scheduler, unless one is already set.
    ///
    /// Feedbacks and a table without their own scheduler are bound to it.
    pub fn execute(mut self, scheduler: Scheduler) -> Self {
        if self.scheduler.is_some() {
            return self;
        }
        self.feedbacks = std::mem::take(&mut self.feedbacks).execute(scheduler.clone());
        self.transitions = std::mem::take(&mut self.transitions).execute(scheduler.clone());
        self.scheduler = Some(scheduler);
        self
    }

    /// Register one more feedback.
    ///
    /// Loops that are already running keep the feedbacks they started with.
    pub fn with_feedback(mut self, feedback: Feedback<S, E>) -> Self {
        self.feedbacks.push(feedback);
        self
    }

    pub(crate) fn push_feedback(&mut self, feedback: Feedback<S, E>) {
        self.feedbacks.push(feedback);
    }

    /// The registered feedbacks.
    pub fn feedbacks(&self) -> &Feedbacks<S, E> {
        &self.feedbacks
    }

    /// The transition table.
    pub fn transitions(&self) -> &Transitions<S, E> {
        &self.transitions
    }

    /// The default scheduler, if set.
    pub fn scheduler(&self) -> Option<&Scheduler> {
        self.scheduler.as_ref()
    }

    /// Compute a fresh initial state.
    pub fn initial_state(&self) -> S {
        (self.initial)()
    }

    /// The stream of states produced by a new loop.
    ///
    /// The first item is the initial state; each following item is the
    /// result of one reduction, identity reductions included. The stream ends
    /// only if every feedback ends.
    pub fn stream(&self) -> StateFeed<S> {
        let initial = self.initial.clone();
        let scheduler = self.scheduler.clone().unwrap_or_default();
        let feedbacks = self.feedbacks.clone().execute(scheduler.clone());
        let transitions = self.transitions.clone().execute(scheduler.clone());

        stream::once(async move {
            let relay = StateRelay::new();
            let initial = initial();
            let events = match feedbacks.event_stream(&relay) {
                Ok(events) => events,
                Err(err) => {
                    error!(error = %err, "state loop could not start its feedbacks");
                    return stream::once(future::ready(initial)).boxed();
                }
            };

            info!(
                scheduler = ?scheduler.label(),
                feedbacks = feedbacks.len(),
                initial = ?initial.kind(),
                "state loop started"
            );
            relay.publish(initial.clone());

            let guard = LoopGuard {
                label: scheduler.label().map(Arc::from),
            };
            let reduced = transitions
                .scheduled_reducer(initial.clone(), events)
                .map(move |state| {
                    debug!(scheduler = ?guard.label, state = ?state.kind(), "state produced");
                    relay.publish(state.clone());
                    state
                });

            stream::once(future::ready(initial)).chain(reduced).boxed()
        })
        .flatten()
        .boxed()
    }

    /// Run a loop in a background task.
    ///
    /// Equivalent to `start_on(Scheduler::immediate())`: the loop task is
    /// spawned on the ambient runtime.
    pub fn start(&mut self) -> Result<&mut Self> {
        self.start_on(Scheduler::immediate())
    }

    /// Run a loop in a background task spawned on `scheduler`.
    ///
    /// Each call starts an independent loop; all of them run until
    /// [`Engine::stop`].
    pub fn start_on(&mut self, scheduler: Scheduler) -> Result<&mut Self> {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let mut states = self.stream();

        let task = scheduler.spawn("engine", async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    next = states.next() => match next {
                        Some(state) => debug!(state = ?state.kind(), "engine observed state"),
                        None => break,
                    },
                }
            }
        })?;

        self.subscriptions.retain(Running::is_alive);
        self.subscriptions.push(Running {
            _cancel: token.drop_guard(),
            task,
        });
        info!(
            scheduler = ?scheduler.label(),
            subscriptions = self.subscriptions.len(),
            "engine started"
        );
        Ok(self)
    }

    /// Cancel every running loop. Calling it again is a no-op.
    pub fn stop(&mut self) {
        if self.subscriptions.is_empty() {
            return;
        }
        let count = self.subscriptions.len();
        self.subscriptions.clear();
        info!(subscriptions = count, "engine stopped");
    }

    /// Returns true while at least one started loop is alive.
    ///
    /// A loop whose states ended on their own no longer counts.
    pub fn is_running(&self) -> bool {
        self.subscriptions.iter().any(Running::is_alive)
    }
}

impl<S: State, E: Event> Drop for Engine<S, E> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<S: State, E: Event> fmt::Debug for Engine<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("feedbacks", &self.feedbacks)
            .field("transitions", &self.transitions)
            .field("scheduler", &self.scheduler)
            .field("running", &self.is_running())
            .finish()
    }
}
