//! A loopback connection and source, held entirely in memory.
//!
//! Useful for demos, benchmarks, and wiring tests: the connection carries
//! the full operation surface but talks to no backend. Operations on a
//! closed connection fail with [MemoryError::Closed], matching the
//! "operation on closed resource" contract of real drivers.

use crate::connection::{Connection, IsolationLevel, Savepoint};
use crate::source::{self, ConnectionSource};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MemoryError {
    #[error("connection is closed")]
    Closed,
}

#[derive(Debug, PartialEq, Eq)]
pub struct MemoryStatement {
    pub conn: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub struct MemoryPrepared {
    pub conn: u64,
    pub sql: String,
}

/// Describes the (imaginary) backend a [MemoryConnection] is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMetadata {
    pub product: &'static str,
    pub version: &'static str,
}

/// A connection whose entire state lives in process memory.
pub struct MemoryConnection {
    id: u64,
    closed: AtomicBool,
    auto_commit: AtomicBool,
    read_only: AtomicBool,
    catalog: Mutex<Option<String>>,
    schema: Mutex<Option<String>>,
    isolation: Mutex<IsolationLevel>,
    client_info: Mutex<HashMap<String, String>>,
    type_map: Mutex<HashMap<String, String>>,
    warnings: Mutex<Vec<String>>,
    network_timeout: Mutex<Duration>,
    next_savepoint: AtomicU64,
}

impl MemoryConnection {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            auto_commit: AtomicBool::new(true),
            read_only: AtomicBool::new(false),
            catalog: Mutex::new(None),
            schema: Mutex::new(None),
            isolation: Mutex::new(IsolationLevel::ReadCommitted),
            client_info: Mutex::new(HashMap::new()),
            type_map: Mutex::new(HashMap::new()),
            warnings: Mutex::new(Vec::new()),
            network_timeout: Mutex::new(Duration::ZERO),
            next_savepoint: AtomicU64::new(0),
        }
    }

    fn guard(&self) -> Result<(), MemoryError> {
        if self.is_closed() {
            return Err(MemoryError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    type Statement = MemoryStatement;
    type PreparedStatement = MemoryPrepared;
    type Metadata = MemoryMetadata;
    type Error = MemoryError;

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_statement(&self) -> Result<Self::Statement, Self::Error> {
        self.guard()?;
        Ok(MemoryStatement { conn: self.id })
    }

    async fn prepare_statement(&self, sql: &str) -> Result<Self::PreparedStatement, Self::Error> {
        self.guard()?;
        Ok(MemoryPrepared {
            conn: self.id,
            sql: sql.to_string(),
        })
    }

    async fn commit(&self) -> Result<(), Self::Error> {
        self.guard()
    }

    async fn rollback(&self) -> Result<(), Self::Error> {
        self.guard()
    }

    async fn set_auto_commit(&self, auto_commit: bool) -> Result<(), Self::Error> {
        self.guard()?;
        self.auto_commit.store(auto_commit, Ordering::SeqCst);
        Ok(())
    }

    async fn auto_commit(&self) -> Result<bool, Self::Error> {
        self.guard()?;
        Ok(self.auto_commit.load(Ordering::SeqCst))
    }

    async fn set_read_only(&self, read_only: bool) -> Result<(), Self::Error> {
        self.guard()?;
        self.read_only.store(read_only, Ordering::SeqCst);
        Ok(())
    }

    async fn is_read_only(&self) -> Result<bool, Self::Error> {
        self.guard()?;
        Ok(self.read_only.load(Ordering::SeqCst))
    }

    async fn metadata(&self) -> Result<Self::Metadata, Self::Error> {
        self.guard()?;
        Ok(MemoryMetadata {
            product: "lapse-memory",
            version: env!("CARGO_PKG_VERSION"),
        })
    }

    async fn set_catalog(&self, catalog: &str) -> Result<(), Self::Error> {
        self.guard()?;
        *self.catalog.lock().unwrap() = Some(catalog.to_string());
        Ok(())
    }

    async fn catalog(&self) -> Result<Option<String>, Self::Error> {
        self.guard()?;
        Ok(self.catalog.lock().unwrap().clone())
    }

    async fn set_schema(&self, schema: &str) -> Result<(), Self::Error> {
        self.guard()?;
        *self.schema.lock().unwrap() = Some(schema.to_string());
        Ok(())
    }

    async fn schema(&self) -> Result<Option<String>, Self::Error> {
        self.guard()?;
        Ok(self.schema.lock().unwrap().clone())
    }

    async fn set_isolation(&self, level: IsolationLevel) -> Result<(), Self::Error> {
        self.guard()?;
        *self.isolation.lock().unwrap() = level;
        Ok(())
    }

    async fn isolation(&self) -> Result<IsolationLevel, Self::Error> {
        self.guard()?;
        Ok(*self.isolation.lock().unwrap())
    }

    async fn set_savepoint(&self, name: Option<&str>) -> Result<Savepoint, Self::Error> {
        self.guard()?;
        let id = self.next_savepoint.fetch_add(1, Ordering::SeqCst);
        Ok(Savepoint::new(id, name.map(str::to_string)))
    }

    async fn rollback_to(&self, _savepoint: &Savepoint) -> Result<(), Self::Error> {
        self.guard()
    }

    async fn release_savepoint(&self, _savepoint: Savepoint) -> Result<(), Self::Error> {
        self.guard()
    }

    async fn set_client_info(&self, name: &str, value: &str) -> Result<(), Self::Error> {
        self.guard()?;
        self.client_info
            .lock()
            .unwrap()
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn client_info(&self, name: &str) -> Result<Option<String>, Self::Error> {
        self.guard()?;
        Ok(self.client_info.lock().unwrap().get(name).cloned())
    }

    async fn set_type_map(&self, map: HashMap<String, String>) -> Result<(), Self::Error> {
        self.guard()?;
        *self.type_map.lock().unwrap() = map;
        Ok(())
    }

    async fn type_map(&self) -> Result<HashMap<String, String>, Self::Error> {
        self.guard()?;
        Ok(self.type_map.lock().unwrap().clone())
    }

    async fn warnings(&self) -> Result<Vec<String>, Self::Error> {
        self.guard()?;
        Ok(self.warnings.lock().unwrap().clone())
    }

    async fn clear_warnings(&self) -> Result<(), Self::Error> {
        self.guard()?;
        self.warnings.lock().unwrap().clear();
        Ok(())
    }

    async fn set_network_timeout(&self, timeout: Duration) -> Result<(), Self::Error> {
        self.guard()?;
        *self.network_timeout.lock().unwrap() = timeout;
        Ok(())
    }

    async fn network_timeout(&self) -> Result<Duration, Self::Error> {
        self.guard()?;
        Ok(*self.network_timeout.lock().unwrap())
    }

    async fn is_valid(&self, _timeout: Duration) -> Result<bool, Self::Error> {
        Ok(!self.is_closed())
    }
}

/// Hands out [MemoryConnection]s with increasing ids. Never fails.
pub struct MemorySource {
    next_id: AtomicU64,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
        }
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionSource for MemorySource {
    type Connection = MemoryConnection;

    async fn acquire(&self) -> Result<Self::Connection, source::Error> {
        Ok(MemoryConnection::new(
            self.next_id.fetch_add(1, Ordering::SeqCst),
        ))
    }
}
