//! lapse is a self-closing connection proxy crate.
//!
//! lapse wraps a database-style connection and manages its lifetime: the
//! wrapped connection is closed automatically once a fixed idle timeout
//! elapses, and a fresh one is acquired transparently the next time a
//! lifecycle-sensitive operation is invoked. Every other operation is
//! forwarded to the wrapped connection untouched.
//!
//! It uses the following terminology:
//! * Sources produce fresh live connections on demand. A source is
//!   typically a thin shim over a connection pool.
//! * A handle generation is one acquired connection together with the
//!   single auto-close task armed for it. When a generation is replaced,
//!   its task keeps targeting the connection it was armed for, never the
//!   replacement.
//! * Lifecycle-sensitive operations verify liveness (and reopen if needed)
//!   before delegating. Which operations are sensitive is configuration,
//!   not a constant; see [policy::SensitiveOps].
//!
//! # Usage
//!
//! * The main interface for this crate is [proxy::Proxy].
//! * To construct a proxy, you must supply a [source::ConnectionSource],
//!   which specifies "how to acquire a connection", and a [policy::Policy],
//!   which specifies the idle timeout and the sensitive-operation set.
//! * The proxy itself implements [connection::Connection], so it can be
//!   handed to any consumer of the wrapped connection type.
//!
//! # DTrace probes
//!
//! lapse contains a number of DTrace USDT probes, which fire as the proxy
//! manages its connection. The full list of probes is:
//!
//! - `acquire-start`: Fires before requesting a connection from the source.
//! - `acquire-done`: Fires after the source produces a connection.
//! - `acquire-failed`: Fires after the source fails to produce a connection.
//! - `reopen-skipped`: Fires when a sensitive operation finds the held
//!   connection still open.
//! - `reopen-done`: Fires after a closed connection has been replaced by a
//!   freshly acquired one.
//! - `autoclose-armed`: Fires when an auto-close task is scheduled for a
//!   handle generation.
//! - `autoclose-fired`: Fires when an auto-close task closes its generation.
//! - `autoclose-stale`: Fires when an auto-close task finds its generation
//!   already closed and does nothing.
//! - `autoclose-failed`: Fires when an auto-close task fails to close its
//!   generation.
//!
//! The existence of the probes is behind the `"probes"` feature, which is
//! enabled by default. Probes are zero-cost unless they are explicitly
//! enabled, by tracing the program with the `dtrace(1)` command-line tool.
//!
//! Probe registration is technically fallible, although extremely unlikely
//! to fail in practice. Since proxy construction reserves its error for
//! connection acquisition, a registration failure is reported as a
//! warning-level event and the proxy simply runs uninstrumented.

// Public API
pub mod connection;
pub mod policy;
pub mod proxy;
pub mod scheduler;
pub mod source;

// Default implementations of generic interfaces
pub mod schedulers;
pub mod sources;

#[cfg(test)]
mod test_utils;

use std::sync::atomic::{AtomicU64, Ordering};

/// Uniquely identifies a handle generation
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct GenerationId(pub u64);

impl GenerationId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn as_u64(&self) -> u64 {
        self.0
    }
}

/// USDT probes for tracing how lapse opens and closes its connection.
#[cfg(feature = "probes")]
#[usdt::provider(provider = "lapse")]
mod probes {
    /// Fires right before requesting a connection from the source.
    fn acquire__start(proxy: &str, generation: u64) {}

    /// Fires after the source produces a connection.
    fn acquire__done(proxy: &str, generation: u64) {}

    /// Fires after the source fails to produce a connection, with a string
    /// identifying the reason.
    fn acquire__failed(proxy: &str, reason: &str) {}

    /// Fires when a sensitive operation finds the held connection open and
    /// proceeds without reopening.
    fn reopen__skipped(proxy: &str, generation: u64) {}

    /// Fires after a closed connection has been replaced by a freshly
    /// acquired one.
    ///
    /// Identifies both the superseded generation and its replacement.
    fn reopen__done(proxy: &str, old_generation: u64, new_generation: u64) {}

    /// Fires when an auto-close task is scheduled for a handle generation,
    /// with the delay in milliseconds.
    fn autoclose__armed(proxy: &str, generation: u64, delay_ms: u64) {}

    /// Fires when an auto-close task closes the generation it was armed for.
    fn autoclose__fired(proxy: &str, generation: u64) {}

    /// Fires when an auto-close task finds its generation already closed.
    fn autoclose__stale(proxy: &str, generation: u64) {}

    /// Fires when an auto-close task fails to close its generation, with a
    /// string identifying the reason.
    fn autoclose__failed(proxy: &str, generation: u64, reason: &str) {}
}
