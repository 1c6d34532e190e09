//! The operation surface of a wrapped connection.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Transaction isolation levels understood by the wrapped connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// A point within a transaction that can be rolled back to without
/// abandoning the whole transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Savepoint {
    id: u64,
    name: Option<String>,
}

impl Savepoint {
    pub fn new(id: u64, name: Option<String>) -> Self {
        Self { id, name }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Names every delegated operation on a [Connection].
///
/// Used by [crate::policy::SensitiveOps] to select which operations verify
/// liveness before delegating.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Op {
    CreateStatement,
    PrepareStatement,
    Commit,
    Rollback,
    SetAutoCommit,
    AutoCommit,
    SetReadOnly,
    IsReadOnly,
    Metadata,
    SetCatalog,
    Catalog,
    SetSchema,
    Schema,
    SetIsolation,
    Isolation,
    SetSavepoint,
    RollbackTo,
    ReleaseSavepoint,
    SetClientInfo,
    ClientInfo,
    SetTypeMap,
    TypeMap,
    Warnings,
    ClearWarnings,
    SetNetworkTimeout,
    NetworkTimeout,
    IsValid,
    Close,
}

/// A connection to a backend, as seen by the proxy.
///
/// Implementations are expected to be handle-like: operations take `&self`
/// and the connection manages its own interior state, so that a single
/// connection can be shared between a client and the background task that
/// eventually closes it.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    type Statement: Send + 'static;
    type PreparedStatement: Send + 'static;
    type Metadata: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reports whether this connection has been closed.
    ///
    /// This is the sole authority consulted when deciding whether a reopen
    /// is required; it must be cheap and must not block.
    fn is_closed(&self) -> bool;

    /// Closes the connection, releasing it back to wherever it came from.
    ///
    /// Closing an already-closed connection must be a safe no-op: the
    /// background auto-close task may race an explicit close, and neither
    /// party can know it lost the race beforehand.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Creates a statement for ad-hoc execution.
    async fn create_statement(&self) -> Result<Self::Statement, Self::Error>;

    /// Prepares `sql` for repeated parameterized execution.
    async fn prepare_statement(&self, sql: &str) -> Result<Self::PreparedStatement, Self::Error>;

    async fn commit(&self) -> Result<(), Self::Error>;

    async fn rollback(&self) -> Result<(), Self::Error>;

    async fn set_auto_commit(&self, auto_commit: bool) -> Result<(), Self::Error>;

    async fn auto_commit(&self) -> Result<bool, Self::Error>;

    async fn set_read_only(&self, read_only: bool) -> Result<(), Self::Error>;

    async fn is_read_only(&self) -> Result<bool, Self::Error>;

    /// Describes the backend this connection is attached to.
    async fn metadata(&self) -> Result<Self::Metadata, Self::Error>;

    async fn set_catalog(&self, catalog: &str) -> Result<(), Self::Error>;

    async fn catalog(&self) -> Result<Option<String>, Self::Error>;

    async fn set_schema(&self, schema: &str) -> Result<(), Self::Error>;

    async fn schema(&self) -> Result<Option<String>, Self::Error>;

    async fn set_isolation(&self, level: IsolationLevel) -> Result<(), Self::Error>;

    async fn isolation(&self) -> Result<IsolationLevel, Self::Error>;

    /// Establishes a savepoint, optionally named, in the current transaction.
    async fn set_savepoint(&self, name: Option<&str>) -> Result<Savepoint, Self::Error>;

    /// Undoes all changes made after `savepoint` was established.
    async fn rollback_to(&self, savepoint: &Savepoint) -> Result<(), Self::Error>;

    async fn release_savepoint(&self, savepoint: Savepoint) -> Result<(), Self::Error>;

    async fn set_client_info(&self, name: &str, value: &str) -> Result<(), Self::Error>;

    async fn client_info(&self, name: &str) -> Result<Option<String>, Self::Error>;

    /// Replaces the custom type mapping used when materializing values.
    async fn set_type_map(&self, map: HashMap<String, String>) -> Result<(), Self::Error>;

    async fn type_map(&self) -> Result<HashMap<String, String>, Self::Error>;

    /// Returns the warnings reported by the backend since the last clear.
    async fn warnings(&self) -> Result<Vec<String>, Self::Error>;

    async fn clear_warnings(&self) -> Result<(), Self::Error>;

    async fn set_network_timeout(&self, timeout: Duration) -> Result<(), Self::Error>;

    async fn network_timeout(&self) -> Result<Duration, Self::Error>;

    /// Actively checks that the connection is still usable, waiting at most
    /// `timeout` for the backend to respond.
    async fn is_valid(&self, timeout: Duration) -> Result<bool, Self::Error>;
}
