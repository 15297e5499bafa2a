//! Testing utilities for transition tables and running engines.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! feedbacks = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ## Using `assert_transition!`
//!
//! ```ignore
//! use feedbacks::testing::assert_transition;
//!
//! assert_transition!(
//!     transitions,
//!     Screen::Loading, Signal::Loaded(1) => Screen::Loaded { page: 1 },
//!     Screen::Loaded { page: 1 }, Signal::Refresh => Screen::Loading,
//! );
//! ```
//!
//! ## Using the fluent builder
//!
//! ```ignore
//! use feedbacks::testing::TransitionsTestExt;
//!
//! transitions
//!     .test(Screen::Loading)
//!     .when(Signal::Loaded(1))
//!     .expect(Screen::Loaded { page: 1 })
//!     .when(Signal::Failed)
//!     .expect_kind(ScreenKind::Loaded);
//! ```
//!
//! ## Using `StateRecorder` on a live engine
//!
//! ```ignore
//! let recorder = StateRecorder::new();
//! let mut engine = engine.with_feedback(recorder.feedback());
//! engine.start()?;
//!
//! // Wait for meaning, not time
//! let states = recorder.wait_for(3).await;
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use futures::future;
use futures::stream::StreamExt;
use tokio::sync::Notify;

use crate::core::{Event, State};
use crate::feedback::Feedback;
use crate::transitions::Transitions;

/// Asserts a sequence of `(state, event) => next state` reductions.
///
/// # Syntax
///
/// ```ignore
/// assert_transition!(
///     transitions,
///     state1, event1 => expected1,
///     state2, event2 => expected2,
/// );
/// ```
///
/// # Panics
///
/// Panics on the first reduction that does not produce the expected state.
#[macro_export]
macro_rules! assert_transition {
    ($transitions:expr, $($state:expr, $event:expr => $expected:expr),+ $(,)?) => {
        $(
            let state = $state;
            let event = $event;
            let expected = $expected;
            let actual = $transitions.reduce(&state, &event);
            assert_eq!(
                actual, expected,
                "Unexpected state for {:?} on {:?}\n  expected: {:?}\n  actual: {:?}",
                state, event, expected, actual
            );
        )+
    };
}

pub use assert_transition;

/// Fluent test builder walking a transition table one event at a time.
pub struct TransitionTest<'a, S: State, E: Event> {
    transitions: &'a Transitions<S, E>,
    state: S,
}

impl<'a, S, E> TransitionTest<'a, S, E>
where
    S: State + PartialEq,
    E: Event,
{
    /// Start from `initial`.
    pub fn new(transitions: &'a Transitions<S, E>, initial: S) -> Self {
        Self {
            transitions,
            state: initial,
        }
    }

    /// Reduce the current state with `event`.
    pub fn when(mut self, event: E) -> Self {
        self.state = self.transitions.reduce(&self.state, &event);
        self
    }

    /// Assert the current state equals `expected`.
    pub fn expect(self, expected: S) -> Self {
        assert_eq!(
            self.state, expected,
            "State mismatch\n  expected: {:?}\n  actual: {:?}",
            expected, self.state
        );
        self
    }

    /// Assert the current state has kind `kind`.
    pub fn expect_kind(self, kind: S::Kind) -> Self {
        assert_eq!(
            self.state.kind(),
            kind,
            "Kind mismatch for state {:?}",
            self.state
        );
        self
    }

    /// Assert the current state matches a predicate.
    pub fn expect_state<F>(self, predicate: F) -> Self
    where
        F: FnOnce(&S) -> bool,
    {
        assert!(predicate(&self.state), "State predicate failed for {:?}", self.state);
        self
    }

    /// The current state.
    pub fn state(&self) -> &S {
        &self.state
    }

    /// Consume the test and return the current state.
    pub fn into_state(self) -> S {
        self.state
    }
}

/// Extension trait for transition tables to enable fluent testing.
pub trait TransitionsTestExt<S: State + PartialEq, E: Event> {
    /// Create a test builder starting from `initial`.
    fn test(&self, initial: S) -> TransitionTest<'_, S, E>;

    /// Assert that `state` reduces to `expected` on `event`.
    fn assert_that(&self, state: S, event: E, expected: S);

    /// Assert that `event` leaves `state` unchanged.
    fn assert_unchanged(&self, state: S, event: E);
}

impl<S: State + PartialEq, E: Event> TransitionsTestExt<S, E> for Transitions<S, E> {
    fn test(&self, initial: S) -> TransitionTest<'_, S, E> {
        TransitionTest::new(self, initial)
    }

    fn assert_that(&self, state: S, event: E, expected: S) {
        TransitionTest::new(self, state).when(event).expect(expected);
    }

    fn assert_unchanged(&self, state: S, event: E) {
        self.assert_that(state.clone(), event, state);
    }
}

// =============================================================================
// State Recorder
// =============================================================================

struct RecorderInner<S> {
    states: Mutex<Vec<S>>,
    notify: Notify,
}

/// Collects the states broadcast to a feedback.
///
/// Clones share the same record.
pub struct StateRecorder<S> {
    inner: Arc<RecorderInner<S>>,
}

impl<S> Clone for StateRecorder<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: State> StateRecorder<S> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                states: Mutex::new(Vec::new()),
                notify: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<S>> {
        match self.inner.states.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append a state and wake waiters.
    pub fn record(&self, state: S) {
        self.lock().push(state);
        self.inner.notify.notify_waiters();
    }

    /// A feedback that records every state and never emits.
    pub fn feedback<E: Event>(&self) -> Feedback<S, E> {
        let recorder = self.clone();
        Feedback::from_states(move |states| {
            let recorder = recorder.clone();
            states.filter_map(move |state| {
                recorder.record(state);
                future::ready(None::<E>)
            })
        })
        .named("state-recorder")
    }

    /// Everything recorded so far.
    pub fn states(&self) -> Vec<S> {
        self.lock().clone()
    }

    /// Number of recorded states.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Wait until at least `count` states were recorded and return them.
    ///
    /// Wrap in `tokio::time::timeout` when the loop might stall.
    pub async fn wait_for(&self, count: usize) -> Vec<S> {
        loop {
            // Register for notification BEFORE checking
            let notified = self.inner.notify.notified();
            {
                let states = self.lock();
                if states.len() >= count {
                    return states.clone();
                }
            }
            notified.await;
        }
    }
}

impl<S: State> Default for StateRecorder<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: State> std::fmt::Debug for StateRecorder<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRecorder")
            .field("states", &*self.lock())
            .finish()
    }
}
