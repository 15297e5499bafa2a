//! Core traits for the feedbacks value model.
//!
//! # Overview
//!
//! A system moves between **states** in response to **events**:
//! - [`State`] = a snapshot of the system (what it is)
//! - [`Event`] = a stimulus (what happened)
//!
//! Each domain declares a closed enum for its states and another for its
//! events. Routing never looks at payloads, only at the *kind* of a value:
//! a `Copy` tag with one variant per concrete state or event.
//!
//! # Example
//!
//! ```ignore
//! #[derive(Debug, Clone, PartialEq)]
//! enum Screen {
//!     Loading,
//!     Loaded { page: u32 },
//! }
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum ScreenKind {
//!     Loading,
//!     Loaded,
//! }
//!
//! impl State for Screen {
//!     type Kind = ScreenKind;
//!
//!     fn kind(&self) -> ScreenKind {
//!         match self {
//!             Screen::Loading => ScreenKind::Loading,
//!             Screen::Loaded { .. } => ScreenKind::Loaded,
//!         }
//!     }
//! }
//! ```

use std::fmt;
use std::hash::Hash;

/// Stable type identity of a state or an event.
///
/// **Note**: This trait is automatically implemented for any type that is
/// `Copy + Eq + Hash + Debug + Send + Sync + 'static`. A fieldless enum with
/// the usual derives is all a domain needs.
pub trait Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

// Blanket implementation for any type that meets the requirements
impl<T: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static> Kind for T {}

/// One immutable snapshot of the system.
///
/// States are produced by the initial-state source or by a reducer and are
/// superseded by the next state the loop emits. They carry no behaviour.
pub trait State: Clone + fmt::Debug + Send + Sync + 'static {
    /// The tag identifying each concrete state.
    type Kind: Kind;

    /// The concrete kind of this state, used for transition matching and
    /// feedback filtering.
    fn kind(&self) -> Self::Kind;
}

/// One immutable stimulus.
///
/// Events are produced by feedback effects (or relayed from a mediator) and
/// consumed exactly once by the reduction that produces the next state.
pub trait Event: Clone + fmt::Debug + Send + Sync + 'static {
    /// The tag identifying each concrete event.
    type Kind: Kind;

    /// The concrete kind of this event, used for transition matching.
    fn kind(&self) -> Self::Kind;
}

/// Matches either one concrete kind or every kind.
///
/// `Matcher::Any` is the "any state" / "any event" wildcard. In transition
/// tables the wildcard is always consulted after the concrete kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Matcher<K> {
    /// Exactly this kind.
    Kind(K),
    /// Any kind.
    Any,
}

impl<K: Kind> Matcher<K> {
    /// Returns true if `kind` is accepted by this matcher.
    pub fn matches(&self, kind: K) -> bool {
        match self {
            Matcher::Kind(expected) => *expected == kind,
            Matcher::Any => true,
        }
    }

    /// Returns true if this is the wildcard.
    pub fn is_any(&self) -> bool {
        matches!(self, Matcher::Any)
    }

    /// The concrete kind, if any.
    pub fn kind(&self) -> Option<K> {
        match self {
            Matcher::Kind(kind) => Some(*kind),
            Matcher::Any => None,
        }
    }
}

impl<K: Kind> From<K> for Matcher<K> {
    fn from(kind: K) -> Self {
        Matcher::Kind(kind)
    }
}

impl<K: Kind> fmt::Display for Matcher<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Kind(kind) => write!(f, "{}", kind_name(kind)),
            Matcher::Any => write!(f, "Any"),
        }
    }
}

/// Human-readable name of a kind (its `Debug` rendering).
pub fn kind_name<K: Kind>(kind: &K) -> String {
    format!("{:?}", kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Light {
        Red,
        Green,
    }

    #[test]
    fn test_exact_matcher_only_accepts_its_kind() {
        let matcher = Matcher::Kind(Light::Red);
        assert!(matcher.matches(Light::Red));
        assert!(!matcher.matches(Light::Green));
        assert!(!matcher.is_any());
        assert_eq!(matcher.kind(), Some(Light::Red));
    }

    #[test]
    fn test_any_matcher_accepts_everything() {
        let matcher: Matcher<Light> = Matcher::Any;
        assert!(matcher.matches(Light::Red));
        assert!(matcher.matches(Light::Green));
        assert!(matcher.is_any());
        assert_eq!(matcher.kind(), None);
    }

    #[test]
    fn test_matcher_from_kind() {
        let matcher: Matcher<Light> = Light::Green.into();
        assert_eq!(matcher, Matcher::Kind(Light::Green));
    }

    #[test]
    fn test_display_uses_kind_name() {
        assert_eq!(Matcher::Kind(Light::Green).to_string(), "Green");
        assert_eq!(Matcher::<Light>::Any.to_string(), "Any");
        assert_eq!(kind_name(&Light::Red), "Red");
    }
}
