//! Feedbacks: side-effect units that turn observed states into events.
//!
//! A feedback is applied to the stream of states a system broadcasts and
//! produces a stream of events. Most feedbacks are written per state: an
//! effect is invoked for each delivered state and returns a (possibly
//! asynchronous, possibly infinite) stream of events.
//!
//! # Strategies
//!
//! When a new state arrives while an earlier invocation is still producing
//! events, the [`Strategy`] decides what happens to the earlier one:
//!
//! | Strategy             | Earlier invocation |
//! |----------------------|--------------------|
//! | `ContinueOnNewState` | keeps running, events are merged |
//! | `CancelOnNewState`   | dropped before the new invocation starts |
//!
//! # State filter
//!
//! A feedback built with [`Feedback::on_kind`] only sees states of that
//! kind. Other states are not delivered at all, so they never cancel a
//! running invocation either.
//!
//! # Example
//!
//! ```ignore
//! use feedbacks::{Feedback, Strategy};
//!
//! let load = Feedback::from_async(Strategy::CancelOnNewState, |state: Screen| async move {
//!     match state {
//!         Screen::Loading => Some(ScreenEvent::Loaded { page: 1 }),
//!         _ => None,
//!     }
//! })
//! .named("load");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, SelectAll, Stream, StreamExt};
use tracing::{trace, warn};

use crate::core::{Event, State};
use crate::scheduler::Scheduler;

/// A stream of states, as seen by a feedback.
pub type StateFeed<S> = BoxStream<'static, S>;

/// A stream of events, as produced by a feedback.
pub type EventFeed<E> = BoxStream<'static, E>;

type SideEffect<S, E> = Arc<dyn Fn(StateFeed<S>) -> EventFeed<E> + Send + Sync>;
type Effect<S, E> = Arc<dyn Fn(S) -> EventFeed<E> + Send + Sync>;

/// What happens to a still-running effect when a new state arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Strategy {
    /// Earlier invocations keep running alongside the new one.
    ContinueOnNewState,
    /// Earlier invocations are cancelled before the new one starts.
    #[default]
    CancelOnNewState,
}

/// A single side-effect unit of a system.
///
/// Feedbacks are immutable: modifiers return a new value.
pub struct Feedback<S: State, E: Event> {
    name: Cow<'static, str>,
    strategy: Strategy,
    filter: Option<S::Kind>,
    scheduler: Option<Scheduler>,
    side_effect: SideEffect<S, E>,
}

impl<S: State, E: Event> Clone for Feedback<S, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            strategy: self.strategy,
            filter: self.filter,
            scheduler: self.scheduler.clone(),
            side_effect: self.side_effect.clone(),
        }
    }
}

impl<S: State, E: Event> Feedback<S, E> {
    /// Create a feedback invoking `effect` for every state.
    pub fn new<F, St>(strategy: Strategy, effect: F) -> Self
    where
        F: Fn(S) -> St + Send + Sync + 'static,
        St: Stream<Item = E> + Send + 'static,
    {
        Self::per_state(strategy, None, effect)
    }

    /// Create a feedback invoking `effect` only for states of `kind`.
    pub fn on_kind<F, St>(kind: S::Kind, strategy: Strategy, effect: F) -> Self
    where
        F: Fn(S) -> St + Send + Sync + 'static,
        St: Stream<Item = E> + Send + 'static,
    {
        Self::per_state(strategy, Some(kind), effect)
    }

    /// Create a feedback whose effect resolves to at most one event.
    pub fn from_async<F, Fut>(strategy: Strategy, effect: F) -> Self
    where
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<E>> + Send + 'static,
    {
        Self::new(strategy, move |state| {
            stream::once(effect(state)).filter_map(|event| async move { event })
        })
    }

    /// Create a feedback whose effect may fail.
    ///
    /// A failure is logged and converted into the event returned by
    /// `on_error`, so it reaches the transitions like any other event.
    pub fn from_fallible<F, Fut, H>(strategy: Strategy, effect: F, on_error: H) -> Self
    where
        F: Fn(S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<E>>> + Send + 'static,
        H: Fn(&anyhow::Error) -> E + Send + Sync + 'static,
    {
        let on_error = Arc::new(on_error);
        Self::from_async(strategy, move |state| {
            let attempt = effect(state);
            let on_error = on_error.clone();
            async move {
                match attempt.await {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(error = %err, "feedback effect failed");
                        Some(on_error(&err))
                    }
                }
            }
        })
    }

    /// Create a feedback from a function of the whole state stream.
    ///
    /// The function is called once per loop with every broadcast state.
    /// Such a feedback has no filter and uses `ContinueOnNewState`.
    pub fn from_states<F, St>(side_effect: F) -> Self
    where
        F: Fn(StateFeed<S>) -> St + Send + Sync + 'static,
        St: Stream<Item = E> + Send + 'static,
    {
        Self {
            name: Cow::Borrowed("feedback"),
            strategy: Strategy::ContinueOnNewState,
            filter: None,
            scheduler: None,
            side_effect: Arc::new(move |states| side_effect(states).boxed()),
        }
    }

    /// A feedback that never emits.
    pub fn empty() -> Self {
        Self::from_states(|_| stream::empty()).named("empty")
    }

    fn per_state<F, St>(strategy: Strategy, filter: Option<S::Kind>, effect: F) -> Self
    where
        F: Fn(S) -> St + Send + Sync + 'static,
        St: Stream<Item = E> + Send + 'static,
    {
        let effect: Effect<S, E> = Arc::new(move |state| effect(state).boxed());
        Self {
            name: Cow::Borrowed("feedback"),
            strategy,
            filter,
            scheduler: None,
            side_effect: Arc::new(move |states| {
                Invocations {
                    states: Some(states),
                    running: SelectAll::new(),
                    effect: effect.clone(),
                    strategy,
                    filter,
                }
                .boxed()
            }),
        }
    }

    /// Name this feedback (used in logs).
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Run this feedback on `scheduler`, unless it already has one.
    pub fn execute(mut self, scheduler: Scheduler) -> Self {
        if self.scheduler.is_none() {
            self.scheduler = Some(scheduler);
        }
        self
    }

    /// The feedback's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The cancellation strategy.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// The state kind this feedback is restricted to, if any.
    pub fn filter(&self) -> Option<S::Kind> {
        self.filter
    }

    /// The scheduler this feedback is bound to, if any.
    pub fn scheduler(&self) -> Option<&Scheduler> {
        self.scheduler.as_ref()
    }

    /// Returns true if `state` would be delivered to this feedback.
    pub fn accepts(&self, state: &S) -> bool {
        self.filter.map_or(true, |kind| state.kind() == kind)
    }

    /// Apply the feedback to a stream of states.
    pub fn side_effect<St>(&self, states: St) -> EventFeed<E>
    where
        St: Stream<Item = S> + Send + 'static,
    {
        (self.side_effect)(states.boxed())
    }
}

impl<S: State, E: Event> std::fmt::Debug for Feedback<S, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feedback")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("filter", &self.filter)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

/// Per-state invocations of an effect, merged according to a strategy.
///
/// States are always drained before events are read, so an invocation
/// cancelled by a new state cannot emit after that state was observed.
struct Invocations<S: State, E: Event> {
    states: Option<StateFeed<S>>,
    running: SelectAll<EventFeed<E>>,
    effect: Effect<S, E>,
    strategy: Strategy,
    filter: Option<S::Kind>,
}

// No field is ever pinned in place.
impl<S: State, E: Event> Unpin for Invocations<S, E> {}

impl<S: State, E: Event> Invocations<S, E> {
    fn invoke(&mut self, state: S) {
        if let Some(kind) = self.filter {
            if state.kind() != kind {
                return;
            }
        }
        if self.strategy == Strategy::CancelOnNewState && !self.running.is_empty() {
            trace!(state = ?state.kind(), "cancelling in-flight effect");
            self.running = SelectAll::new();
        }
        self.running.push((self.effect)(state));
    }
}

impl<S: State, E: Event> Stream for Invocations<S, E> {
    type Item = E;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        let this = self.get_mut();

        while let Some(states) = this.states.as_mut() {
            match states.poll_next_unpin(cx) {
                Poll::Ready(Some(state)) => this.invoke(state),
                Poll::Ready(None) => this.states = None,
                Poll::Pending => break,
            }
        }

        if let Poll::Ready(Some(event)) = this.running.poll_next_unpin(cx) {
            return Poll::Ready(Some(event));
        }

        if this.states.is_none() && this.running.is_empty() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    #[derive(Debug, Clone, PartialEq)]
    enum Phase {
        Idle,
        Busy(u32),
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum PhaseKind {
        Idle,
        Busy,
    }

    impl State for Phase {
        type Kind = PhaseKind;

        fn kind(&self) -> PhaseKind {
            match self {
                Phase::Idle => PhaseKind::Idle,
                Phase::Busy(_) => PhaseKind::Busy,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Signal {
        Seen(u32),
        Failed(String),
    }

    impl Event for Signal {
        type Kind = ();

        fn kind(&self) -> Self::Kind {}
    }

    fn seen(state: &Phase) -> u32 {
        match state {
            Phase::Idle => 0,
            Phase::Busy(n) => *n,
        }
    }

    #[tokio::test]
    async fn test_effect_is_invoked_per_state() {
        let feedback = Feedback::new(Strategy::ContinueOnNewState, |state: Phase| {
            stream::iter(vec![Signal::Seen(seen(&state))])
        });

        let events: Vec<_> = feedback
            .side_effect(stream::iter(vec![Phase::Idle, Phase::Busy(2), Phase::Busy(3)]))
            .collect()
            .await;

        assert_eq!(
            events,
            vec![Signal::Seen(0), Signal::Seen(2), Signal::Seen(3)]
        );
    }

    #[tokio::test]
    async fn test_kind_filter_skips_other_states() {
        let feedback = Feedback::on_kind(PhaseKind::Busy, Strategy::ContinueOnNewState, |state| {
            stream::iter(vec![Signal::Seen(seen(&state))])
        });

        assert!(feedback.accepts(&Phase::Busy(1)));
        assert!(!feedback.accepts(&Phase::Idle));

        let events: Vec<_> = feedback
            .side_effect(stream::iter(vec![Phase::Idle, Phase::Busy(5), Phase::Idle]))
            .collect()
            .await;

        assert_eq!(events, vec![Signal::Seen(5)]);
    }

    #[tokio::test]
    async fn test_from_async_emits_at_most_one_event() {
        let feedback = Feedback::from_async(Strategy::ContinueOnNewState, |state: Phase| async move {
            match state {
                Phase::Busy(n) => Some(Signal::Seen(n)),
                Phase::Idle => None,
            }
        });

        let events: Vec<_> = feedback
            .side_effect(stream::iter(vec![Phase::Idle, Phase::Busy(8)]))
            .collect()
            .await;

        assert_eq!(events, vec![Signal::Seen(8)]);
    }

    #[tokio::test]
    async fn test_from_fallible_turns_errors_into_events() {
        let feedback = Feedback::from_fallible(
            Strategy::ContinueOnNewState,
            |state: Phase| async move {
                match state {
                    Phase::Idle => anyhow::bail!("nothing to do"),
                    Phase::Busy(n) => Ok(Some(Signal::Seen(n))),
                }
            },
            |err| Signal::Failed(err.to_string()),
        );

        let events: Vec<_> = feedback
            .side_effect(stream::iter(vec![Phase::Busy(1), Phase::Idle]))
            .collect()
            .await;

        assert_eq!(
            events,
            vec![Signal::Seen(1), Signal::Failed("nothing to do".into())]
        );
    }

    #[tokio::test]
    async fn test_cancel_on_new_state_drops_previous_invocation() {
        let (states_tx, states_rx) = mpsc::unbounded_channel();

        // Each invocation ticks forever, tagged with the state that started it.
        let feedback = Feedback::new(Strategy::CancelOnNewState, |state: Phase| {
            let tag = seen(&state);
            stream::unfold((), move |_| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Some((Signal::Seen(tag), ()))
            })
        });

        let mut events = feedback.side_effect(UnboundedReceiverStream::new(states_rx));

        states_tx.send(Phase::Busy(1)).unwrap();
        assert_eq!(events.next().await, Some(Signal::Seen(1)));

        states_tx.send(Phase::Busy(2)).unwrap();
        // Anything after the switch comes from the second invocation only.
        for _ in 0..5 {
            assert_eq!(events.next().await, Some(Signal::Seen(2)));
        }
    }

    #[tokio::test]
    async fn test_continue_on_new_state_keeps_previous_invocation() {
        let (states_tx, states_rx) = mpsc::unbounded_channel();
        let feedback = Feedback::new(Strategy::ContinueOnNewState, |state: Phase| {
            let tag = seen(&state);
            stream::unfold((), move |_| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Some((Signal::Seen(tag), ()))
            })
        });

        let mut events = feedback.side_effect(UnboundedReceiverStream::new(states_rx));

        states_tx.send(Phase::Busy(1)).unwrap();
        assert_eq!(events.next().await, Some(Signal::Seen(1)));
        states_tx.send(Phase::Busy(2)).unwrap();

        let mut from_first = 0;
        let mut from_second = 0;
        for _ in 0..10 {
            match events.next().await {
                Some(Signal::Seen(1)) => from_first += 1,
                Some(Signal::Seen(2)) => from_second += 1,
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(from_first > 0, "first invocation was cancelled");
        assert!(from_second > 0, "second invocation never ran");
    }

    #[tokio::test]
    async fn test_filtered_out_state_does_not_cancel() {
        let (states_tx, states_rx) = mpsc::unbounded_channel();
        let feedback = Feedback::on_kind(PhaseKind::Busy, Strategy::CancelOnNewState, |state| {
            let tag = seen(&state);
            stream::unfold((), move |_| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Some((Signal::Seen(tag), ()))
            })
        });

        let mut events = feedback.side_effect(UnboundedReceiverStream::new(states_rx));

        states_tx.send(Phase::Busy(4)).unwrap();
        assert_eq!(events.next().await, Some(Signal::Seen(4)));
        states_tx.send(Phase::Idle).unwrap();
        assert_eq!(events.next().await, Some(Signal::Seen(4)));
    }

    #[tokio::test]
    async fn test_stream_ends_when_states_and_invocations_end() {
        let feedback = Feedback::new(Strategy::CancelOnNewState, |_state: Phase| {
            stream::empty::<Signal>()
        });
        let events: Vec<_> = feedback
            .side_effect(stream::iter(vec![Phase::Idle]))
            .collect()
            .await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_empty_feedback_emits_nothing() {
        let feedback = Feedback::<Phase, Signal>::empty();
        assert_eq!(feedback.name(), "empty");
        let events: Vec<_> = feedback.side_effect(stream::pending()).collect().await;
        assert!(events.is_empty());
    }

    #[test]
    fn test_execute_keeps_first_scheduler() {
        let feedback = Feedback::<Phase, Signal>::empty()
            .execute(Scheduler::named("inner"))
            .execute(Scheduler::named("outer"));
        assert_eq!(feedback.scheduler().and_then(Scheduler::label), Some("inner"));
    }

    #[test]
    fn test_defaults() {
        assert_eq!(Strategy::default(), Strategy::CancelOnNewState);

        let feedback = Feedback::new(Strategy::ContinueOnNewState, |_: Phase| {
            stream::empty::<Signal>()
        })
        .named("watcher");
        assert_eq!(feedback.name(), "watcher");
        assert_eq!(feedback.strategy(), Strategy::ContinueOnNewState);
        assert_eq!(feedback.filter(), None);
        assert!(feedback.scheduler().is_none());
        assert!(format!("{:?}", feedback).contains("watcher"));
    }
}
