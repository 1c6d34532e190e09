//! Implementation of [Scheduler] backed by the tokio timer.

use crate::scheduler::{DeferredTask, Scheduler};

use std::time::Duration;

/// Defers tasks by spawning them onto the current tokio runtime.
///
/// Must be used from within a runtime context; the proxy constructors are
/// async, so this holds wherever a proxy is being built.
pub struct TokioScheduler {}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: DeferredTask) {
        tokio::task::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
    }
}
