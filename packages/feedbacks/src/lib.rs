//! # Feedbacks
//!
//! A self-regulating reactive engine: states go out to feedbacks, events
//! come back, and a pure reducer folds them into the next state.
//!
//! ## Core Concepts
//!
//! - [`State`] = a snapshot of the system (what it is)
//! - [`Event`] = a stimulus (what happened)
//! - [`Feedback`] = a side effect turning states into events
//! - [`Transitions`] = the pure reducer `(state, event) -> state`
//! - [`Engine`] = the loop closing feedbacks over transitions
//! - [`Mediator`] = a broadcast relay wiring engines together
//!
//! ## Architecture
//!
//! ```text
//! initial state
//!     │
//!     ▼ publish
//! StateRelay ──────────────────────────────────────┐
//!     │                                            │
//!     ▼ subscribe (replay latest)                  │
//!     ├─► Feedback A (scheduler a) ─► events ──┐   │
//!     ├─► Feedback B (scheduler b) ─► events ──┤   │
//!     └─► Feedback C (inline)      ─► events ──┤   │
//!                                              ▼   │
//!                                       merge point│
//!                                              │   │
//!                      Transitions.reduce() ◄──┘   │
//!                      (table scheduler)           │
//!                              │                   │
//!                              └─► next state ─────┘
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Reducers are pure** - No IO; all IO lives inside feedback effects
//! 2. **Every feedback sees every state** - In production order, no drops
//!    (besides its own kind filter)
//! 3. **Reductions are serialized** - One event at a time per loop, in the
//!    order events reach the merge point
//! 4. **No failure channel** - Unmatched pairs are identity transitions;
//!    failing effects convert errors into events
//! 5. **Schedulers are explicit** - The innermost scheduler wins
//!
//! ## Example
//!
//! ```ignore
//! use feedbacks::{Engine, Feedback, Feedbacks, FromState, Scheduler, State, Event, Strategy, Transitions};
//!
//! let load = Feedback::on_kind(ScreenKind::Loading, Strategy::CancelOnNewState, |_| {
//!     futures::stream::once(async { Signal::Loaded(fetch_page().await) })
//! });
//!
//! let transitions = Transitions::new()
//!     .from(FromState::kind(ScreenKind::Loading).on(SignalKind::Loaded, |_, event| match event {
//!         Signal::Loaded(page) => Screen::Loaded(*page),
//!         _ => Screen::Loading,
//!     }))
//!     .from(FromState::kind(ScreenKind::Loaded).on_transition_to(SignalKind::Refresh, Screen::Loading));
//!
//! let mut engine = Engine::with_initial_state(Screen::Loading, Feedbacks::new().with(load), transitions)
//!     .execute(Scheduler::named("screen"));
//!
//! engine.start()?;
//! ```
//!
//! ## What This Is Not
//!
//! Feedbacks is **not**:
//! - A persistence layer
//! - A network protocol
//! - A UI framework

// Core modules
mod attach;
mod core;
mod engine;
mod error;
mod feedback;
mod feedbacks;
mod mediator;
mod relay;
mod scheduler;
mod transitions;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export core traits
pub use crate::core::{kind_name, Event, Kind, Matcher, State};

// Re-export error types
pub use crate::error::{FeedbacksError, Result};

// Re-export feedbacks
pub use crate::feedback::{EventFeed, Feedback, StateFeed, Strategy};
pub use crate::feedbacks::Feedbacks;

// Re-export transitions
pub use crate::transitions::{FromState, Reducer, TransitionDescription, Transitions};

// Re-export the loop
pub use crate::engine::Engine;
pub use crate::relay::StateRelay;
pub use crate::scheduler::Scheduler;

// Re-export mediators
pub use crate::mediator::{
    CurrentValueMediator, Mediator, MediatorStream, PassthroughMediator, Subscription,
};
