//! A proxy which closes its wrapped connection after an idle timeout and
//! reopens it transparently on the next sensitive use.

use crate::connection::{Connection, IsolationLevel, Op, Savepoint};
use crate::policy::Policy;
#[cfg(feature = "probes")]
use crate::probes;
use crate::scheduler::SharedScheduler;
use crate::schedulers::tokio::TokioScheduler;
use crate::source::{self, SharedSource};
use crate::GenerationId;

use async_trait::async_trait;
use debug_ignore::DebugIgnore;
use derive_where::derive_where;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{event, instrument, Level};

#[derive(Error, Debug)]
pub enum Error<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The source could not produce a connection.
    ///
    /// At construction time this is fatal. On the reopen path it surfaces
    /// to the caller of the operation that triggered the reopen; the proxy
    /// keeps the closed generation and retries on the next sensitive call.
    #[error("Failed to acquire a connection from the source")]
    Acquisition(#[source] source::Error),

    /// The wrapped connection's own operation failed; passed through
    /// untouched.
    #[error(transparent)]
    Connection(E),
}

/// The name of the proxy, used to identify it in events and probes.
#[derive(Clone, Debug)]
pub(crate) struct Name(Arc<str>);

impl Name {
    pub(crate) fn new<S: Into<Arc<str>>>(name: S) -> Self {
        Self(name.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// Monotonic lifecycle counters, shared with the auto-close tasks.
#[derive(Debug, Default)]
struct Counters {
    acquisitions: AtomicU64,
    reopens: AtomicU64,
    auto_closes: AtomicU64,
    close_failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> Stats {
        Stats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            reopens: self.reopens.load(Ordering::Relaxed),
            auto_closes: self.auto_closes.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time sample of the proxy's lifecycle counters.
///
/// Calling [Proxy::stats] is racy with respect to in-flight operations, so
/// its usage is recommended only for test environments and approximate
/// heuristics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Stats {
    /// Connections acquired from the source, including the one acquired
    /// at construction.
    pub acquisitions: u64,

    /// Replacements performed after a sensitive operation found the held
    /// connection closed.
    pub reopens: u64,

    /// Connections closed by their auto-close task.
    pub auto_closes: u64,

    /// Auto-close attempts that failed. Reasons are reported as
    /// error-level events.
    pub close_failures: u64,
}

// One acquired connection, under the identity its auto-close task was
// armed with.
#[derive_where(Debug)]
struct Generation<Conn: Connection> {
    id: GenerationId,
    conn: DebugIgnore<Arc<Conn>>,
}

/// A connection wrapper which closes the wrapped connection once a fixed
/// idle timeout elapses and acquires a replacement on the next
/// lifecycle-sensitive use.
///
/// The proxy implements [Connection] itself, so it substitutes for the
/// wrapped connection type anywhere one is expected. Operations named in
/// [Policy::sensitive_ops] verify liveness first; every other operation
/// delegates to the currently held connection unconditionally, and fails
/// however the wrapped connection fails if that connection has already
/// been auto-closed.
pub struct Proxy<Conn: Connection> {
    name: Name,
    source: SharedSource<Conn>,
    scheduler: SharedScheduler,
    policy: Policy,

    // The current handle generation. Replaced wholesale on reopen; the
    // lock makes each replacement visible to every subsequent reader.
    slot: Mutex<Generation<Conn>>,

    counters: Arc<Counters>,
}

// Requests a connection from the source. Shared by construction and the
// reopen path, which differ only in what they do with the result.
async fn acquire<Conn: Connection>(
    name: &Name,
    source: &SharedSource<Conn>,
    counters: &Counters,
    id: GenerationId,
) -> Result<Conn, Error<Conn::Error>> {
    event!(
        Level::TRACE,
        proxy = name.as_str(),
        generation = id.as_u64(),
        "Acquiring connection"
    );
    #[cfg(feature = "probes")]
    probes::acquire__start!(|| (name.as_str(), id.as_u64()));

    match source.acquire().await {
        Ok(conn) => {
            counters.acquisitions.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "probes")]
            probes::acquire__done!(|| (name.as_str(), id.as_u64()));
            Ok(conn)
        }
        Err(err) => {
            event!(
                Level::WARN,
                proxy = name.as_str(),
                err = %err,
                "Failed to acquire connection"
            );
            #[cfg(feature = "probes")]
            probes::acquire__failed!(|| (name.as_str(), err.to_string()));
            Err(Error::Acquisition(err))
        }
    }
}

impl<Conn: Connection> Proxy<Conn> {
    /// Creates a proxy, eagerly acquiring its first connection from
    /// `source`.
    ///
    /// Fails with [Error::Acquisition] if the source cannot produce one;
    /// in that case no auto-close task has been scheduled. Auto-close work
    /// is deferred through the tokio timer; see [Proxy::with_scheduler] to
    /// supply a different deferral mechanism.
    pub async fn new<S: Into<Arc<str>>>(
        name: S,
        source: SharedSource<Conn>,
        policy: Policy,
    ) -> Result<Self, Error<Conn::Error>> {
        Self::with_scheduler(name, source, Arc::new(TokioScheduler {}), policy).await
    }

    /// Creates a proxy which defers its auto-close tasks to `scheduler`.
    pub async fn with_scheduler<S: Into<Arc<str>>>(
        name: S,
        source: SharedSource<Conn>,
        scheduler: SharedScheduler,
        policy: Policy,
    ) -> Result<Self, Error<Conn::Error>> {
        let name = Name::new(name);

        #[cfg(feature = "probes")]
        if let Err(err) = usdt::register_probes() {
            event!(
                Level::WARN,
                proxy = name.as_str(),
                err = %err,
                "Failed to register USDT probes; proxy will run uninstrumented"
            );
        }

        let counters = Arc::new(Counters::default());
        let id = GenerationId::next();
        let conn = Arc::new(acquire(&name, &source, &counters, id).await?);
        event!(
            Level::DEBUG,
            proxy = name.as_str(),
            generation = id.as_u64(),
            "Created connection proxy"
        );

        let proxy = Self {
            name,
            source,
            scheduler,
            policy,
            slot: Mutex::new(Generation {
                id,
                conn: DebugIgnore(conn.clone()),
            }),
            counters,
        };
        proxy.arm_auto_close(id, conn);
        Ok(proxy)
    }

    /// Samples the proxy's lifecycle counters at a single point in time.
    pub fn stats(&self) -> Stats {
        self.counters.snapshot()
    }

    /// The policy this proxy was created with.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    fn current(&self) -> Arc<Conn> {
        self.slot.lock().unwrap().conn.0.clone()
    }

    // The connection to delegate `op` to: the current generation,
    // reopened first if `op` is lifecycle-sensitive.
    async fn delegate(&self, op: Op) -> Result<Arc<Conn>, Error<Conn::Error>> {
        if self.policy.sensitive_ops.contains(op) {
            self.ensure_live().await
        } else {
            Ok(self.current())
        }
    }

    /// If the wrapped connection was (automatically) closed, obtain a new
    /// one and arm its auto-close task.
    #[instrument(level = "debug", skip(self), fields(proxy = %self.name))]
    async fn ensure_live(&self) -> Result<Arc<Conn>, Error<Conn::Error>> {
        // Snapshot within an isolated scope: the slot lock must not be
        // held across the acquisition await point.
        let (stale_id, conn) = {
            let slot = self.slot.lock().unwrap();
            (slot.id, slot.conn.0.clone())
        };

        if !conn.is_closed() {
            event!(
                Level::DEBUG,
                generation = stale_id.as_u64(),
                "Reopen not needed (still open)"
            );
            #[cfg(feature = "probes")]
            probes::reopen__skipped!(|| (self.name.as_str(), stale_id.as_u64()));
            return Ok(conn);
        }

        // On failure the slot is untouched: it keeps the closed generation
        // and the next sensitive call retries the reopen.
        let id = GenerationId::next();
        let fresh = Arc::new(acquire(&self.name, &self.source, &self.counters, id).await?);
        self.counters.reopens.fetch_add(1, Ordering::Relaxed);

        {
            let mut slot = self.slot.lock().unwrap();
            *slot = Generation {
                id,
                conn: DebugIgnore(fresh.clone()),
            };
        }
        self.arm_auto_close(id, fresh.clone());

        event!(
            Level::DEBUG,
            old_generation = stale_id.as_u64(),
            generation = id.as_u64(),
            "Reopened wrapped connection"
        );
        #[cfg(feature = "probes")]
        probes::reopen__done!(|| (self.name.as_str(), stale_id.as_u64(), id.as_u64()));
        Ok(fresh)
    }

    // Schedules the auto-close task for one handle generation.
    //
    // The task closes over the Arc captured here and never re-reads the
    // slot, so a task outliving its generation can only ever close the
    // connection it was armed for, not a replacement.
    fn arm_auto_close(&self, id: GenerationId, conn: Arc<Conn>) {
        let delay = self.policy.idle_timeout;
        if delay.is_zero() {
            event!(
                Level::DEBUG,
                proxy = self.name.as_str(),
                "Auto-close disabled (zero idle timeout)"
            );
            return;
        }

        event!(
            Level::DEBUG,
            proxy = self.name.as_str(),
            generation = id.as_u64(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling auto-close"
        );
        #[cfg(feature = "probes")]
        probes::autoclose__armed!(|| (self.name.as_str(), id.as_u64(), delay.as_millis() as u64));

        let name = self.name.clone();
        let counters = self.counters.clone();
        self.scheduler.schedule(
            delay,
            Box::pin(async move {
                if conn.is_closed() {
                    event!(
                        Level::DEBUG,
                        proxy = name.as_str(),
                        generation = id.as_u64(),
                        "Auto-close found connection already closed"
                    );
                    #[cfg(feature = "probes")]
                    probes::autoclose__stale!(|| (name.as_str(), id.as_u64()));
                    return;
                }

                match conn.close().await {
                    Ok(()) => {
                        counters.auto_closes.fetch_add(1, Ordering::Relaxed);
                        event!(
                            Level::DEBUG,
                            proxy = name.as_str(),
                            generation = id.as_u64(),
                            "Closed wrapped connection"
                        );
                        #[cfg(feature = "probes")]
                        probes::autoclose__fired!(|| (name.as_str(), id.as_u64()));
                    }
                    // No caller to propagate to; report and swallow.
                    Err(err) => {
                        counters.close_failures.fetch_add(1, Ordering::Relaxed);
                        event!(
                            Level::ERROR,
                            proxy = name.as_str(),
                            generation = id.as_u64(),
                            err = %err,
                            "Error trying to close connection"
                        );
                        #[cfg(feature = "probes")]
                        probes::autoclose__failed!(|| (
                            name.as_str(),
                            id.as_u64(),
                            err.to_string()
                        ));
                    }
                }
            }),
        );
    }
}

#[async_trait]
impl<Conn: Connection> Connection for Proxy<Conn> {
    type Statement = Conn::Statement;
    type PreparedStatement = Conn::PreparedStatement;
    type Metadata = Conn::Metadata;
    type Error = Error<Conn::Error>;

    fn is_closed(&self) -> bool {
        self.current().is_closed()
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.delegate(Op::Close)
            .await?
            .close()
            .await
            .map_err(Error::Connection)
    }

    async fn create_statement(&self) -> Result<Self::Statement, Self::Error> {
        self.delegate(Op::CreateStatement)
            .await?
            .create_statement()
            .await
            .map_err(Error::Connection)
    }

    async fn prepare_statement(&self, sql: &str) -> Result<Self::PreparedStatement, Self::Error> {
        self.delegate(Op::PrepareStatement)
            .await?
            .prepare_statement(sql)
            .await
            .map_err(Error::Connection)
    }

    async fn commit(&self) -> Result<(), Self::Error> {
        self.delegate(Op::Commit)
            .await?
            .commit()
            .await
            .map_err(Error::Connection)
    }

    async fn rollback(&self) -> Result<(), Self::Error> {
        self.delegate(Op::Rollback)
            .await?
            .rollback()
            .await
            .map_err(Error::Connection)
    }

    async fn set_auto_commit(&self, auto_commit: bool) -> Result<(), Self::Error> {
        self.delegate(Op::SetAutoCommit)
            .await?
            .set_auto_commit(auto_commit)
            .await
            .map_err(Error::Connection)
    }

    async fn auto_commit(&self) -> Result<bool, Self::Error> {
        self.delegate(Op::AutoCommit)
            .await?
            .auto_commit()
            .await
            .map_err(Error::Connection)
    }

    async fn set_read_only(&self, read_only: bool) -> Result<(), Self::Error> {
        self.delegate(Op::SetReadOnly)
            .await?
            .set_read_only(read_only)
            .await
            .map_err(Error::Connection)
    }

    async fn is_read_only(&self) -> Result<bool, Self::Error> {
        self.delegate(Op::IsReadOnly)
            .await?
            .is_read_only()
            .await
            .map_err(Error::Connection)
    }

    async fn metadata(&self) -> Result<Self::Metadata, Self::Error> {
        self.delegate(Op::Metadata)
            .await?
            .metadata()
            .await
            .map_err(Error::Connection)
    }

    async fn set_catalog(&self, catalog: &str) -> Result<(), Self::Error> {
        self.delegate(Op::SetCatalog)
            .await?
            .set_catalog(catalog)
            .await
            .map_err(Error::Connection)
    }

    async fn catalog(&self) -> Result<Option<String>, Self::Error> {
        self.delegate(Op::Catalog)
            .await?
            .catalog()
            .await
            .map_err(Error::Connection)
    }

    async fn set_schema(&self, schema: &str) -> Result<(), Self::Error> {
        self.delegate(Op::SetSchema)
            .await?
            .set_schema(schema)
            .await
            .map_err(Error::Connection)
    }

    async fn schema(&self) -> Result<Option<String>, Self::Error> {
        self.delegate(Op::Schema)
            .await?
            .schema()
            .await
            .map_err(Error::Connection)
    }

    async fn set_isolation(&self, level: IsolationLevel) -> Result<(), Self::Error> {
        self.delegate(Op::SetIsolation)
            .await?
            .set_isolation(level)
            .await
            .map_err(Error::Connection)
    }

    async fn isolation(&self) -> Result<IsolationLevel, Self::Error> {
        self.delegate(Op::Isolation)
            .await?
            .isolation()
            .await
            .map_err(Error::Connection)
    }

    async fn set_savepoint(&self, name: Option<&str>) -> Result<Savepoint, Self::Error> {
        self.delegate(Op::SetSavepoint)
            .await?
            .set_savepoint(name)
            .await
            .map_err(Error::Connection)
    }

    async fn rollback_to(&self, savepoint: &Savepoint) -> Result<(), Self::Error> {
        self.delegate(Op::RollbackTo)
            .await?
            .rollback_to(savepoint)
            .await
            .map_err(Error::Connection)
    }

    async fn release_savepoint(&self, savepoint: Savepoint) -> Result<(), Self::Error> {
        self.delegate(Op::ReleaseSavepoint)
            .await?
            .release_savepoint(savepoint)
            .await
            .map_err(Error::Connection)
    }

    async fn set_client_info(&self, name: &str, value: &str) -> Result<(), Self::Error> {
        self.delegate(Op::SetClientInfo)
            .await?
            .set_client_info(name, value)
            .await
            .map_err(Error::Connection)
    }

    async fn client_info(&self, name: &str) -> Result<Option<String>, Self::Error> {
        self.delegate(Op::ClientInfo)
            .await?
            .client_info(name)
            .await
            .map_err(Error::Connection)
    }

    async fn set_type_map(&self, map: HashMap<String, String>) -> Result<(), Self::Error> {
        self.delegate(Op::SetTypeMap)
            .await?
            .set_type_map(map)
            .await
            .map_err(Error::Connection)
    }

    async fn type_map(&self) -> Result<HashMap<String, String>, Self::Error> {
        self.delegate(Op::TypeMap)
            .await?
            .type_map()
            .await
            .map_err(Error::Connection)
    }

    async fn warnings(&self) -> Result<Vec<String>, Self::Error> {
        self.delegate(Op::Warnings)
            .await?
            .warnings()
            .await
            .map_err(Error::Connection)
    }

    async fn clear_warnings(&self) -> Result<(), Self::Error> {
        self.delegate(Op::ClearWarnings)
            .await?
            .clear_warnings()
            .await
            .map_err(Error::Connection)
    }

    async fn set_network_timeout(&self, timeout: Duration) -> Result<(), Self::Error> {
        self.delegate(Op::SetNetworkTimeout)
            .await?
            .set_network_timeout(timeout)
            .await
            .map_err(Error::Connection)
    }

    async fn network_timeout(&self) -> Result<Duration, Self::Error> {
        self.delegate(Op::NetworkTimeout)
            .await?
            .network_timeout()
            .await
            .map_err(Error::Connection)
    }

    async fn is_valid(&self, timeout: Duration) -> Result<bool, Self::Error> {
        self.delegate(Op::IsValid)
            .await?
            .is_valid(timeout)
            .await
            .map_err(Error::Connection)
    }
}
