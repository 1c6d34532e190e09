//! The interface for deferring one-shot background work.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// A deferred unit of work, run exactly once by a [Scheduler].
pub type DeferredTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Runs deferred tasks after a delay.
///
/// The scheduler makes no ordering guarantee between tasks beyond each one
/// firing after its own delay has elapsed, and provides no cancellation:
/// callers that stop caring about a task must make the task itself a no-op.
pub trait Scheduler: Send + Sync {
    /// Runs `task` once, after at least `delay` has elapsed, on an
    /// unspecified background execution context.
    fn schedule(&self, delay: Duration, task: DeferredTask);
}

/// Helper type for anything that implements the Scheduler interface.
pub type SharedScheduler = Arc<dyn Scheduler>;
