//! Utilities to help with testing lapse

use crate::connection::{Connection, IsolationLevel, Savepoint};
use crate::scheduler::{DeferredTask, Scheduler};
use crate::source::{self, ConnectionSource};

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub(crate) enum TestError {
    #[error("connection is closed")]
    Closed,

    #[error("injected failure")]
    Injected,
}

/// Observable state for one connection handed out by a [TestSource].
///
/// The source keeps a reference to every probe, so tests can inspect and
/// manipulate connections the proxy has since abandoned.
#[derive(Debug)]
pub(crate) struct ConnProbe {
    id: u64,
    closed: AtomicBool,
    commits: AtomicUsize,
    fail_ops: AtomicBool,
    fail_close: AtomicBool,
}

impl ConnProbe {
    fn new(id: u64) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
            fail_ops: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the connection closed out from under the proxy, as the idle
    /// timer would.
    pub(crate) fn force_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Makes every subsequent operation (other than close) fail.
    pub(crate) fn fail_ops(&self) {
        self.fail_ops.store(true, Ordering::SeqCst);
    }

    /// Makes every subsequent close attempt fail.
    pub(crate) fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub(crate) fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct TestStatement {
    pub(crate) conn: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct TestPrepared {
    pub(crate) conn: u64,
    pub(crate) sql: String,
}

#[derive(Debug)]
pub(crate) struct TestMetadata {
    pub(crate) conn: u64,
}

/// A connection whose behavior is steered through its [ConnProbe].
pub(crate) struct TestConnection {
    probe: Arc<ConnProbe>,
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

impl TestConnection {
    fn new(probe: Arc<ConnProbe>) -> Self {
        Self {
            probe,
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

    fn guard(&self) -> Result<(), TestError> {
        if self.probe.is_closed() {
            return Err(TestError::Closed);
        }
        if self.probe.fail_ops.load(Ordering::SeqCst) {
            return Err(TestError::Injected);
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for TestConnection {
    type Statement = TestStatement;
    type PreparedStatement = TestPrepared;
    type Metadata = TestMetadata;
    type Error = TestError;

    fn is_closed(&self) -> bool {
        self.probe.is_closed()
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if self.probe.fail_close.load(Ordering::SeqCst) {
            return Err(TestError::Injected);
        }
        self.probe.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create_statement(&self) -> Result<Self::Statement, Self::Error> {
        self.guard()?;
        Ok(TestStatement {
            conn: self.probe.id,
        })
    }

    async fn prepare_statement(&self, sql: &str) -> Result<Self::PreparedStatement, Self::Error> {
        self.guard()?;
        Ok(TestPrepared {
            conn: self.probe.id,
            sql: sql.to_string(),
        })
    }

    async fn commit(&self) -> Result<(), Self::Error> {
        self.guard()?;
        self.probe.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
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
        Ok(TestMetadata {
            conn: self.probe.id,
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
        Ok(!self.probe.is_closed())
    }
}

/// A test-only source which can be switched off and which records every
/// connection it hands out.
pub(crate) struct TestSource {
    can_acquire: AtomicBool,
    next_id: AtomicU64,
    handed_out: Mutex<Vec<Arc<ConnProbe>>>,
}

impl TestSource {
    pub(crate) fn new() -> Self {
        Self {
            can_acquire: AtomicBool::new(true),
            next_id: AtomicU64::new(0),
            handed_out: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_acquirable(&self, can_acquire: bool) {
        self.can_acquire.store(can_acquire, Ordering::SeqCst);
    }

    /// The number of connections acquired through this source so far.
    pub(crate) fn acquired(&self) -> usize {
        self.handed_out.lock().unwrap().len()
    }

    /// The probe for the `index`th connection handed out.
    pub(crate) fn probe(&self, index: usize) -> Arc<ConnProbe> {
        self.handed_out.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl ConnectionSource for TestSource {
    type Connection = TestConnection;

    async fn acquire(&self) -> Result<Self::Connection, source::Error> {
        if !self.can_acquire.load(Ordering::SeqCst) {
            return Err(source::Error::Exhausted);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let probe = Arc::new(ConnProbe::new(id));
        self.handed_out.lock().unwrap().push(probe.clone());
        Ok(TestConnection::new(probe))
    }
}

/// A scheduler which parks every task until the test fires it explicitly.
pub(crate) struct ManualScheduler {
    total: AtomicUsize,
    tasks: Mutex<VecDeque<DeferredTask>>,
}

impl ManualScheduler {
    pub(crate) fn new() -> Self {
        Self {
            total: AtomicUsize::new(0),
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    /// The number of tasks ever scheduled, fired or not.
    pub(crate) fn scheduled(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Runs the oldest parked task to completion.
    pub(crate) async fn fire_oldest(&self) {
        let task = self.tasks.lock().unwrap().pop_front();
        task.expect("No scheduled task to fire").await;
    }

    /// Runs every parked task to completion, in scheduling order.
    pub(crate) async fn fire_all(&self) {
        loop {
            let task = self.tasks.lock().unwrap().pop_front();
            match task {
                Some(task) => task.await,
                None => return,
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, _delay: Duration, task: DeferredTask) {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().unwrap().push_back(task);
    }
}
