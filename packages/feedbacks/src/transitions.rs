//! Transition tables: the pure reducer of a system.
//!
//! A [`Transitions`] table maps `(state kind, event kind)` pairs to reducers.
//! Rules are grouped by the state they start from ([`FromState`]); either
//! side of a rule may be the wildcard.
//!
//! # Lookup priority
//!
//! For a state of kind `s` and an event of kind `e` the first match wins:
//!
//! 1. `s` and `e`
//! 2. `s` and any event
//! 3. any state and `e`
//! 4. any state and any event
//!
//! With no match, or while a disable predicate holds, the reduction is the
//! identity: the input state is returned unchanged. This is never an error.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, trace};

use crate::core::{kind_name, Event, Matcher, State};
use crate::error::{panic_message, FeedbacksError};
use crate::feedback::{EventFeed, StateFeed};
use crate::scheduler::Scheduler;

/// A shareable reducer function.
pub type Reducer<S, E> = Arc<dyn Fn(&S, &E) -> S + Send + Sync>;

type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;

struct Rule<S: State, E: Event> {
    state: Matcher<S::Kind>,
    event: Matcher<E::Kind>,
    to: Option<S::Kind>,
    reducer: Reducer<S, E>,
}

impl<S: State, E: Event> Clone for Rule<S, E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state,
            event: self.event,
            to: self.to,
            reducer: self.reducer.clone(),
        }
    }
}

/// The rules starting from one state kind (or from any state).
///
/// # Example
///
/// ```ignore
/// let loading = FromState::kind(ScreenKind::Loading)
///     .on_to(SignalKind::Loaded, ScreenKind::Loaded, |_, event| match event {
///         Signal::Loaded(page) => Screen::Loaded { page: *page },
///         _ => unreachable!(),
///     })
///     .on_transition_to(SignalKind::Failed, Screen::Failed);
/// ```
pub struct FromState<S: State, E: Event> {
    state: Matcher<S::Kind>,
    rules: Vec<Rule<S, E>>,
}

impl<S: State, E: Event> FromState<S, E> {
    /// Rules for states of kind `kind`.
    pub fn kind(kind: S::Kind) -> Self {
        Self {
            state: Matcher::Kind(kind),
            rules: Vec::new(),
        }
    }

    /// Rules for any state.
    pub fn any() -> Self {
        Self {
            state: Matcher::Any,
            rules: Vec::new(),
        }
    }

    fn rule<F>(mut self, event: Matcher<E::Kind>, to: Option<S::Kind>, reducer: F) -> Self
    where
        F: Fn(&S, &E) -> S + Send + Sync + 'static,
    {
        self.rules.push(Rule {
            state: self.state,
            event,
            to,
            reducer: Arc::new(reducer),
        });
        self
    }

    /// Reduce events of kind `event` with `reducer`.
    pub fn on<F>(self, event: E::Kind, reducer: F) -> Self
    where
        F: Fn(&S, &E) -> S + Send + Sync + 'static,
    {
        self.rule(Matcher::Kind(event), None, reducer)
    }

    /// Reduce any event with `reducer`.
    pub fn on_any<F>(self, reducer: F) -> Self
    where
        F: Fn(&S, &E) -> S + Send + Sync + 'static,
    {
        self.rule(Matcher::Any, None, reducer)
    }

    /// Like [`FromState::on`], declaring the kind of the produced state.
    ///
    /// The declared kind only feeds [`Transitions::description`].
    pub fn on_to<F>(self, event: E::Kind, to: S::Kind, reducer: F) -> Self
    where
        F: Fn(&S, &E) -> S + Send + Sync + 'static,
    {
        self.rule(Matcher::Kind(event), Some(to), reducer)
    }

    /// Move to a fixed `state` on events of kind `event`.
    pub fn on_transition_to(self, event: E::Kind, state: S) -> Self {
        let to = state.kind();
        self.rule(Matcher::Kind(event), Some(to), move |_, _| state.clone())
    }

    /// Move to a fixed `state` on any event.
    pub fn on_any_transition_to(self, state: S) -> Self {
        let to = state.kind();
        self.rule(Matcher::Any, Some(to), move |_, _| state.clone())
    }
}

/// One declared transition, named by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionDescription {
    pub from: String,
    pub to: String,
    pub event: String,
}

/// A system's reducer, assembled from [`FromState`] groups.
///
/// Tables are values: cloning is cheap and every builder method returns a
/// new table.
pub struct Transitions<S: State, E: Event> {
    rules: Vec<Rule<S, E>>,
    index: HashMap<(Matcher<S::Kind>, Matcher<E::Kind>), usize>,
    disabled: Vec<Predicate>,
    scheduler: Option<Scheduler>,
}

impl<S: State, E: Event> Clone for Transitions<S, E> {
    fn clone(&self) -> Self {
        Self {
            rules: self.rules.clone(),
            index: self.index.clone(),
            disabled: self.disabled.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}

impl<S: State, E: Event> Transitions<S, E> {
    /// Create an empty table. Every reduction is the identity.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            index: HashMap::new(),
            disabled: Vec::new(),
            scheduler: None,
        }
    }

    /// Add a group of rules.
    ///
    /// Groups sharing a state matcher merge; a rule for an event matcher that
    /// is already present replaces the earlier one in place.
    pub fn from(mut self, group: FromState<S, E>) -> Self {
        for rule in group.rules {
            let key = (rule.state, rule.event);
            match self.index.get(&key) {
                Some(&position) => self.rules[position] = rule,
                None => {
                    self.index.insert(key, self.rules.len());
                    self.rules.push(rule);
                }
            }
        }
        self
    }

    /// Make every reduction the identity while `predicate` returns true.
    ///
    /// Several predicates disable the table when any of them holds. They are
    /// evaluated on every reduction.
    pub fn disable<P>(mut self, predicate: P) -> Self
    where
        P: Fn() -> bool + Send + Sync + 'static,
    {
        self.disabled.push(Arc::new(predicate));
        self
    }

    /// Run reductions on `scheduler`, unless the table already has one.
    pub fn execute(mut self, scheduler: Scheduler) -> Self {
        if self.scheduler.is_none() {
            self.scheduler = Some(scheduler);
        }
        self
    }

    /// The scheduler reductions run on, if bound.
    pub fn scheduler(&self) -> Option<&Scheduler> {
        self.scheduler.as_ref()
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if the table has no rule.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn is_disabled(&self) -> bool {
        self.disabled.iter().any(|predicate| predicate())
    }

    fn lookup(&self, state: S::Kind, event: E::Kind) -> Option<&Rule<S, E>> {
        [
            (Matcher::Kind(state), Matcher::Kind(event)),
            (Matcher::Kind(state), Matcher::Any),
            (Matcher::Any, Matcher::Kind(event)),
            (Matcher::Any, Matcher::Any),
        ]
        .iter()
        .find_map(|key| self.index.get(key))
        .map(|&position| &self.rules[position])
    }

    /// Compute the state following `state` on `event`.
    pub fn reduce(&self, state: &S, event: &E) -> S {
        if self.is_disabled() {
            return state.clone();
        }
        match self.lookup(state.kind(), event.kind()) {
            Some(rule) => (rule.reducer)(state, event),
            None => state.clone(),
        }
    }

    /// The table as a standalone reducer.
    pub fn reducer(&self) -> Reducer<S, E> {
        let table = self.clone();
        Arc::new(move |state, event| table.reduce(state, event))
    }

    /// Every concrete transition with a declared destination, in declaration
    /// order.
    pub fn description(&self) -> Vec<TransitionDescription> {
        self.rules
            .iter()
            .filter_map(|rule| {
                let from = rule.state.kind()?;
                let event = rule.event.kind()?;
                let to = rule.to?;
                Some(TransitionDescription {
                    from: kind_name(&from),
                    to: kind_name(&to),
                    event: kind_name(&event),
                })
            })
            .collect()
    }

    /// Reduce on the table's scheduler (inline when unbound).
    ///
    /// A panicking reducer leaves the state unchanged.
    pub(crate) async fn reduce_scheduled(self: &Arc<Self>, state: S, event: E) -> S {
        let scheduler = self.scheduler.clone().unwrap_or_else(Scheduler::immediate);
        let table = Arc::clone(self);
        let (input, trigger) = (state.clone(), event.clone());
        let outcome = scheduler
            .run(move || panic::catch_unwind(AssertUnwindSafe(|| table.reduce(&input, &trigger))))
            .await;

        match outcome {
            Ok(Ok(next)) => {
                trace!(
                    from = ?state.kind(),
                    event = ?event.kind(),
                    to = ?next.kind(),
                    "reduced"
                );
                next
            }
            Ok(Err(payload)) => {
                let err = FeedbacksError::ReducerPanicked {
                    state: kind_name(&state.kind()),
                    event: kind_name(&event.kind()),
                    message: panic_message(payload.as_ref()),
                };
                error!(error = %err, "keeping current state");
                state
            }
            Err(err) => {
                error!(error = %err, "reduction did not run, keeping current state");
                state
            }
        }
    }

    /// Fold `events` from `initial`, emitting every produced state.
    ///
    /// The initial state itself is not emitted. Reductions are serialized.
    pub fn scheduled_reducer(&self, initial: S, events: EventFeed<E>) -> StateFeed<S> {
        let table = Arc::new(self.clone());
        stream::unfold((initial, events), move |(state, mut events)| {
            let table = table.clone();
            async move {
                let event = events.next().await?;
                let next = table.reduce_scheduled(state, event).await;
                Some((next.clone(), (next, events)))
            }
        })
        .boxed()
    }
}

impl<S: State, E: Event> Default for Transitions<S, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: State, E: Event> fmt::Debug for Transitions<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transitions")
            .field("rules", &self.rules.len())
            .field("disable_predicates", &self.disabled.len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum Door {
        Open,
        Closed,
        Locked(u32),
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum DoorKind {
        Open,
        Closed,
        Locked,
    }

    impl State for Door {
        type Kind = DoorKind;

        fn kind(&self) -> DoorKind {
            match self {
                Door::Open => DoorKind::Open,
                Door::Closed => DoorKind::Closed,
                Door::Locked(_) => DoorKind::Locked,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Action {
        Push,
        Pull,
        Turn(u32),
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum ActionKind {
        Push,
        Pull,
        Turn,
    }

    impl Event for Action {
        type Kind = ActionKind;

        fn kind(&self) -> ActionKind {
            match self {
                Action::Push => ActionKind::Push,
                Action::Pull => ActionKind::Pull,
                Action::Turn(_) => ActionKind::Turn,
            }
        }
    }

    fn door() -> Transitions<Door, Action> {
        Transitions::new()
            .from(FromState::kind(DoorKind::Open).on_transition_to(ActionKind::Push, Door::Closed))
            .from(
                FromState::kind(DoorKind::Closed)
                    .on_transition_to(ActionKind::Pull, Door::Open)
                    .on_to(ActionKind::Turn, DoorKind::Locked, |_, action| match action {
                        Action::Turn(code) => Door::Locked(*code),
                        _ => Door::Closed,
                    }),
            )
    }

    #[test]
    fn test_concrete_rules() {
        let table = door();
        assert_eq!(table.reduce(&Door::Open, &Action::Push), Door::Closed);
        assert_eq!(table.reduce(&Door::Closed, &Action::Pull), Door::Open);
        assert_eq!(table.reduce(&Door::Closed, &Action::Turn(42)), Door::Locked(42));
    }

    #[test]
    fn test_unmatched_pair_is_identity() {
        let table = door();
        assert_eq!(table.reduce(&Door::Open, &Action::Pull), Door::Open);
        assert_eq!(table.reduce(&Door::Locked(7), &Action::Push), Door::Locked(7));
        assert_eq!(Transitions::new().reduce(&Door::Open, &Action::Push), Door::Open);
    }

    #[test]
    fn test_reducer_receives_exact_values() {
        let code = fastrand::u32(..);
        let table = Transitions::new().from(FromState::kind(DoorKind::Locked).on(
            ActionKind::Turn,
            |state, action| match (state, action) {
                (Door::Locked(current), Action::Turn(given)) if current == given => Door::Closed,
                _ => state.clone(),
            },
        ));

        assert_eq!(table.reduce(&Door::Locked(code), &Action::Turn(code)), Door::Closed);
        assert_eq!(
            table.reduce(&Door::Locked(code), &Action::Turn(code.wrapping_add(1))),
            Door::Locked(code)
        );
    }

    #[test]
    fn test_priority_tiers() {
        let table = Transitions::new()
            .from(FromState::any().on_any_transition_to(Door::Locked(4)))
            .from(FromState::any().on_transition_to(ActionKind::Pull, Door::Locked(3)))
            .from(FromState::kind(DoorKind::Open).on_any_transition_to(Door::Locked(2)))
            .from(FromState::kind(DoorKind::Open).on_transition_to(ActionKind::Push, Door::Locked(1)));

        // exact state, exact event
        assert_eq!(table.reduce(&Door::Open, &Action::Push), Door::Locked(1));
        // exact state, any event
        assert_eq!(table.reduce(&Door::Open, &Action::Pull), Door::Locked(2));
        // any state, exact event
        assert_eq!(table.reduce(&Door::Closed, &Action::Pull), Door::Locked(3));
        // any state, any event
        assert_eq!(table.reduce(&Door::Closed, &Action::Push), Door::Locked(4));
    }

    #[test]
    fn test_groups_merge_and_later_rule_wins() {
        let table = Transitions::new()
            .from(FromState::kind(DoorKind::Open).on_transition_to(ActionKind::Push, Door::Closed))
            .from(FromState::kind(DoorKind::Open).on_transition_to(ActionKind::Pull, Door::Locked(0)))
            .from(FromState::kind(DoorKind::Open).on_transition_to(ActionKind::Push, Door::Locked(9)));

        assert_eq!(table.len(), 2);
        assert_eq!(table.reduce(&Door::Open, &Action::Push), Door::Locked(9));
        assert_eq!(table.reduce(&Door::Open, &Action::Pull), Door::Locked(0));
    }

    #[test]
    fn test_disable_predicates() {
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));
        let table = {
            let (first, second) = (first.clone(), second.clone());
            door()
                .disable(move || first.load(Ordering::SeqCst))
                .disable(move || second.load(Ordering::SeqCst))
        };

        assert_eq!(table.reduce(&Door::Open, &Action::Push), Door::Closed);

        second.store(true, Ordering::SeqCst);
        assert_eq!(table.reduce(&Door::Open, &Action::Push), Door::Open);

        second.store(false, Ordering::SeqCst);
        first.store(true, Ordering::SeqCst);
        assert_eq!(table.reduce(&Door::Open, &Action::Push), Door::Open);

        first.store(false, Ordering::SeqCst);
        assert_eq!(table.reduce(&Door::Open, &Action::Push), Door::Closed);
    }

    #[test]
    fn test_description_lists_concrete_declared_transitions() {
        let table = door()
            .from(FromState::any().on_transition_to(ActionKind::Push, Door::Open))
            .from(FromState::kind(DoorKind::Locked).on(ActionKind::Turn, |_, _| Door::Closed));

        assert_eq!(
            table.description(),
            vec![
                TransitionDescription {
                    from: "Open".into(),
                    to: "Closed".into(),
                    event: "Push".into(),
                },
                TransitionDescription {
                    from: "Closed".into(),
                    to: "Open".into(),
                    event: "Pull".into(),
                },
                TransitionDescription {
                    from: "Closed".into(),
                    to: "Locked".into(),
                    event: "Turn".into(),
                },
            ]
        );
    }

    #[test]
    fn test_description_serializes() {
        let json = serde_json::to_value(&door().description()[0]).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "from": "Open", "to": "Closed", "event": "Push" })
        );
    }

    #[test]
    fn test_execute_keeps_innermost_scheduler() {
        let table = door()
            .execute(Scheduler::named("inner"))
            .execute(Scheduler::named("outer"));
        assert_eq!(table.scheduler().and_then(Scheduler::label), Some("inner"));
    }

    #[test]
    fn test_reducer_closure_matches_table() {
        let reducer = door().reducer();
        assert_eq!(reducer(&Door::Open, &Action::Push), Door::Closed);
        assert_eq!(reducer(&Door::Open, &Action::Pull), Door::Open);
    }

    #[tokio::test]
    async fn test_scheduled_reducer_folds_events() {
        let events = stream::iter(vec![Action::Push, Action::Turn(5), Action::Pull]).boxed();
        let states: Vec<_> = door()
            .execute(Scheduler::named("reducer"))
            .scheduled_reducer(Door::Open, events)
            .collect()
            .await;

        assert_eq!(states, vec![Door::Closed, Door::Locked(5), Door::Locked(5)]);
    }

    #[tokio::test]
    async fn test_reduction_runs_on_table_scheduler() {
        let table = Arc::new(
            Transitions::new()
                .from(FromState::any().on_any(|_, _| match Scheduler::current_label().as_deref() {
                    Some("reducer") => Door::Open,
                    _ => Door::Closed,
                }))
                .execute(Scheduler::named("reducer")),
        );

        assert_eq!(table.reduce_scheduled(Door::Closed, Action::Push).await, Door::Open);
    }

    #[tokio::test]
    async fn test_panicking_reducer_keeps_state() {
        let table = Arc::new(
            door().from(FromState::kind(DoorKind::Locked).on(ActionKind::Push, |_, _| {
                panic!("jammed");
            })),
        );

        assert_eq!(
            table.reduce_scheduled(Door::Locked(1), Action::Push).await,
            Door::Locked(1)
        );
        // The table keeps working afterwards.
        assert_eq!(table.reduce_scheduled(Door::Open, Action::Push).await, Door::Closed);
    }
}
