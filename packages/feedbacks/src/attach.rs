//! Wiring engines to mediators and to each other.
//!
//! Every method registers one feedback on the engine. Receiving feedbacks
//! ignore states and relay mediator values as events; sending feedbacks
//! forward selected states to a mediator and never emit events.
//!
//! Attach before [`Engine::start`]: a running loop keeps the feedbacks it
//! started with.

use futures::future;
use futures::stream::StreamExt;

use crate::core::{Event, State};
use crate::engine::Engine;
use crate::feedback::Feedback;
use crate::mediator::{Mediator, PassthroughMediator};

impl<S: State, E: Event> Engine<S, E> {
    /// Turn mediator values into events; `None` drops the value.
    pub fn attach_receiving<M, T, F>(mut self, mediator: M, emit: F) -> Self
    where
        M: Mediator<T>,
        T: Clone + Send + Sync + 'static,
        F: Fn(&T) -> Option<E> + Send + Sync + 'static,
    {
        let emit = std::sync::Arc::new(emit);
        self.push_feedback(
            Feedback::from_states(move |_states| {
                let emit = emit.clone();
                mediator
                    .stream()
                    .filter_map(move |value| future::ready(emit(&value)))
            })
            .named("mediator-receiver"),
        );
        self
    }

    /// Turn the mediator values accepted by `filter` into events.
    pub fn attach_receiving_filtered<M, T, P, F>(self, mediator: M, filter: P, emit: F) -> Self
    where
        M: Mediator<T>,
        T: Clone + Send + Sync + 'static,
        P: Fn(&T) -> bool + Send + Sync + 'static,
        F: Fn(&T) -> E + Send + Sync + 'static,
    {
        self.attach_receiving(mediator, move |value| filter(value).then(|| emit(value)))
    }

    /// Turn mediator values equal to `expected` into events.
    pub fn attach_receiving_value<M, T, F>(self, mediator: M, expected: T, emit: F) -> Self
    where
        M: Mediator<T>,
        T: PartialEq + Clone + Send + Sync + 'static,
        F: Fn(&T) -> E + Send + Sync + 'static,
    {
        self.attach_receiving_filtered(mediator, move |value| *value == expected, emit)
    }

    /// Emit `event` whenever the mediator carries `expected`.
    pub fn attach_receiving_value_as<M, T>(self, mediator: M, expected: T, event: E) -> Self
    where
        M: Mediator<T>,
        T: PartialEq + Clone + Send + Sync + 'static,
    {
        self.attach_receiving_value(mediator, expected, move |_| event.clone())
    }

    /// Send a value for each state `emit` maps to `Some`.
    pub fn attach_sending<M, T, F>(mut self, mediator: M, emit: F) -> Self
    where
        M: Mediator<T>,
        T: Clone + Send + Sync + 'static,
        F: Fn(&S) -> Option<T> + Send + Sync + 'static,
    {
        let emit = std::sync::Arc::new(emit);
        self.push_feedback(
            Feedback::from_states(move |states| {
                let (mediator, emit) = (mediator.clone(), emit.clone());
                states.filter_map(move |state| {
                    if let Some(value) = emit(&state) {
                        mediator.send(value);
                    }
                    future::ready(None::<E>)
                })
            })
            .named("mediator-sender"),
        );
        self
    }

    /// Send `emit(state)` for every state accepted by `filter`.
    pub fn attach_sending_filtered<M, T, P, F>(self, mediator: M, filter: P, emit: F) -> Self
    where
        M: Mediator<T>,
        T: Clone + Send + Sync + 'static,
        P: Fn(&S) -> bool + Send + Sync + 'static,
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        self.attach_sending(mediator, move |state| filter(state).then(|| emit(state)))
    }

    /// Send `emit(state)` for every state of kind `kind`.
    pub fn attach_sending_on_kind<M, T, F>(self, mediator: M, kind: S::Kind, emit: F) -> Self
    where
        M: Mediator<T>,
        T: Clone + Send + Sync + 'static,
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        self.attach_sending_filtered(mediator, move |state| state.kind() == kind, emit)
    }

    /// Send `value` for every state of kind `kind`.
    pub fn attach_sending_on_kind_value<M, T>(self, mediator: M, kind: S::Kind, value: T) -> Self
    where
        M: Mediator<T>,
        T: Clone + Send + Sync + 'static,
    {
        self.attach_sending_on_kind(mediator, kind, move |_| value.clone())
    }

    /// Send `emit(state)` for every state equal to `expected`.
    pub fn attach_sending_on_state<M, T, F>(self, mediator: M, expected: S, emit: F) -> Self
    where
        M: Mediator<T>,
        T: Clone + Send + Sync + 'static,
        S: PartialEq,
        F: Fn(&S) -> T + Send + Sync + 'static,
    {
        self.attach_sending_filtered(mediator, move |state| *state == expected, emit)
    }

    /// Send `value` for every state equal to `expected`.
    pub fn attach_sending_on_state_value<M, T>(self, mediator: M, expected: S, value: T) -> Self
    where
        M: Mediator<T>,
        T: Clone + Send + Sync + 'static,
        S: PartialEq,
    {
        self.attach_sending_on_state(mediator, expected, move |_| value.clone())
    }

    /// Feed this engine's states of kind `kind` into `target` as events.
    ///
    /// The two engines share a fresh [`PassthroughMediator`] and never refer
    /// to each other.
    pub fn attach<S2, E2, F>(self, target: &mut Engine<S2, E2>, kind: S::Kind, emit: F) -> Self
    where
        S2: State,
        E2: Event,
        F: Fn(&S) -> E2 + Send + Sync + 'static,
    {
        let mediator = PassthroughMediator::<S>::new();
        target.push_feedback(
            Feedback::from_states({
                let mediator = mediator.clone();
                let emit = std::sync::Arc::new(emit);
                move |_states| {
                    let emit = emit.clone();
                    mediator.stream().map(move |state| emit(&state))
                }
            })
            .named("engine-receiver"),
        );
        self.attach_sending_on_kind(mediator, kind, |state| state.clone())
    }
}
