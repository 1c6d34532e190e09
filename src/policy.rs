//! Configuration options which can alter the behavior of the proxy.

use crate::connection::Op;

use std::collections::BTreeSet;
use std::time::Duration;

/// The set of operations which verify liveness before delegating.
///
/// The reference workload only ever re-entered a proxied connection through
/// statement creation after the connection had gone idle, so that is the
/// default. Integrators observing other re-entry points should add those
/// operations here rather than patching the proxy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SensitiveOps(BTreeSet<Op>);

impl SensitiveOps {
    /// No operation checks liveness; the proxy is a plain pass-through.
    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    pub fn only(ops: impl IntoIterator<Item = Op>) -> Self {
        Self(ops.into_iter().collect())
    }

    pub fn with(mut self, op: Op) -> Self {
        self.0.insert(op);
        self
    }

    pub fn contains(&self, op: Op) -> bool {
        self.0.contains(&op)
    }
}

impl Default for SensitiveOps {
    fn default() -> Self {
        Self::only([Op::CreateStatement])
    }
}

/// Policy which is applicable to a connection proxy.
#[derive(Clone, Debug)]
pub struct Policy {
    /// How long an acquired connection may be held before its auto-close
    /// task fires.
    ///
    /// The window is fixed per generation: it is not renewed by activity,
    /// only by the reopen path arming a task for the replacement
    /// connection. [Duration::ZERO] disables auto-close entirely; no task
    /// is ever armed.
    pub idle_timeout: Duration,

    /// Operations which verify liveness (and reopen if needed) before
    /// delegating.
    pub sensitive_ops: SensitiveOps,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            sensitive_ops: SensitiveOps::default(),
        }
    }
}
