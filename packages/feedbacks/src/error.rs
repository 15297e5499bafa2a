//! Structured error types for feedbacks.
//!
//! `FeedbacksError` provides pattern-matchable errors for the few places the
//! runtime itself can fail. None of them ever travels through a state or
//! event stream: those streams have no failure channel.
//!
//! # The Error Boundary Rule
//!
//! > **No error ever crosses the merge point.**
//!
//! - A feedback effect that can fail converts the failure into a domain
//!   event before emitting it (see [`Feedback::from_fallible`]).
//! - A reducer is total: an unmatched `(state, event)` pair is the identity
//!   transition, not an error.
//! - A reducer that panics is contained by the loop and logged; the state is
//!   left unchanged.
//!
//! [`Feedback::from_fallible`]: crate::Feedback::from_fallible

use thiserror::Error;

/// Errors produced by the feedbacks runtime.
#[derive(Debug, Error)]
pub enum FeedbacksError {
    /// Work had to be spawned but no tokio runtime was available.
    #[error("no tokio runtime available to spawn `{what}`")]
    NoRuntime {
        /// What was being spawned.
        what: &'static str,
    },

    /// A reducer panicked while computing the next state.
    #[error("reducer panicked on state {state} with event {event}: {message}")]
    ReducerPanicked {
        /// Kind of the input state.
        state: String,
        /// Kind of the incoming event.
        event: String,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// A scheduled unit of work was cancelled before it completed.
    #[error("work scheduled on `{label}` was cancelled")]
    TaskCancelled {
        /// Label of the scheduler the work was sent to.
        label: String,
    },
}

impl FeedbacksError {
    /// Returns true if this error is a contained reducer panic.
    pub fn is_reducer_panic(&self) -> bool {
        matches!(self, FeedbacksError::ReducerPanicked { .. })
    }
}

/// Result type alias for feedbacks operations.
pub type Result<T> = std::result::Result<T, FeedbacksError>;

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
