//! Explicit execution contexts.
//!
//! Every unit of work in a system (a feedback effect, a reduction, the loop
//! itself) runs on a [`Scheduler`]. A scheduler is a plain value threaded
//! through the builder chain; nothing in this crate reads a global "current
//! scheduler".
//!
//! # Composition
//!
//! The innermost scheduler wins. A feedback that carries its own scheduler
//! keeps it when the feedback set or the engine is given one; a transition
//! table that already has a scheduler keeps it when the engine is given one;
//! calling `execute(on:)` twice on the same component keeps the first.
//!
//! # Labels
//!
//! Work running on a labelled scheduler can ask [`Scheduler::current_label`]
//! where it is running. This is what diagnostics and tests use to verify
//! scheduler precedence.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{FeedbacksError, Result};

tokio::task_local! {
    static CURRENT_LABEL: Arc<str>;
}

#[derive(Clone)]
enum Target {
    /// Inline, in whatever task drives the work.
    Immediate,
    /// The tokio runtime the caller is running on.
    Ambient,
    /// A specific tokio runtime.
    Runtime(Handle),
}

/// Where a piece of work executes.
///
/// # Example
///
/// ```ignore
/// let io = Scheduler::on_runtime("io", io_runtime.handle().clone());
///
/// let feedback = Feedback::new(Strategy::CancelOnNewState, fetch_page)
///     .execute(Scheduler::named("fetcher"));
///
/// let engine = Engine::new(|| Screen::Loading, feedbacks, transitions)
///     .execute(io);
/// ```
#[derive(Clone)]
pub struct Scheduler {
    label: Option<Arc<str>>,
    target: Target,
}

impl Scheduler {
    /// Runs work inline, on the task that drives it.
    ///
    /// An immediate feedback is polled by the state loop itself; an immediate
    /// reduction runs synchronously inside the loop.
    pub fn immediate() -> Self {
        Self {
            label: None,
            target: Target::Immediate,
        }
    }

    /// A labelled execution context on the tokio runtime driving the system.
    pub fn named(label: impl Into<String>) -> Self {
        Self {
            label: Some(Arc::from(label.into())),
            target: Target::Ambient,
        }
    }

    /// A labelled execution context on a specific tokio runtime.
    ///
    /// Use a dedicated single-worker runtime for a serial worker, or a shared
    /// multi-thread runtime for a pool. Reductions hop onto this runtime and
    /// the loop waits for them.
    pub fn on_runtime(label: impl Into<String>, handle: Handle) -> Self {
        Self {
            label: Some(Arc::from(label.into())),
            target: Target::Runtime(handle),
        }
    }

    /// The default scheduler of an engine: a uniquely labelled context on
    /// the ambient runtime.
    pub fn background() -> Self {
        Self::named(format!("engine-{}", Uuid::new_v4()))
    }

    /// The label of this scheduler (`None` for [`Scheduler::immediate`]).
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Returns true if work runs inline on the driving task.
    pub fn is_immediate(&self) -> bool {
        matches!(self.target, Target::Immediate)
    }

    /// Label of the scheduler executing the caller, if it is labelled.
    ///
    /// Returns `None` outside of any labelled scheduler.
    pub fn current_label() -> Option<String> {
        CURRENT_LABEL.try_with(|label| label.to_string()).ok()
    }

    /// Tag a future with this scheduler's label.
    pub(crate) fn scoped<F>(&self, fut: F) -> BoxFuture<'static, F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match &self.label {
            Some(label) => CURRENT_LABEL.scope(label.clone(), fut).boxed(),
            None => fut.boxed(),
        }
    }

    /// Spawn a future on this scheduler.
    ///
    /// Immediate and named schedulers spawn on the ambient runtime, which
    /// must exist.
    pub(crate) fn spawn<F>(&self, what: &'static str, fut: F) -> Result<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let fut = self.scoped(fut);
        match &self.target {
            Target::Runtime(handle) => Ok(handle.spawn(fut)),
            Target::Immediate | Target::Ambient => {
                let handle = Handle::try_current().map_err(|_| FeedbacksError::NoRuntime { what })?;
                Ok(handle.spawn(fut))
            }
        }
    }

    /// Run synchronous work on this scheduler and wait for its result.
    ///
    /// Only work sent to another runtime can fail, when that runtime drops it.
    /// Panics are not contained here; callers that need it wrap `f`.
    pub(crate) async fn run<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        match &self.target {
            Target::Immediate => Ok(f()),
            Target::Ambient => Ok(match &self.label {
                Some(label) => CURRENT_LABEL.sync_scope(label.clone(), f),
                None => f(),
            }),
            Target::Runtime(handle) => {
                let task = handle.spawn(self.scoped(async move { f() }));
                task.await.map_err(|_| FeedbacksError::TaskCancelled {
                    label: self.label().unwrap_or("runtime").to_string(),
                })
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match self.target {
            Target::Immediate => "immediate",
            Target::Ambient => "ambient",
            Target::Runtime(_) => "runtime",
        };
        f.debug_struct("Scheduler")
            .field("label", &self.label)
            .field("target", &target)
            .finish()
    }
}
