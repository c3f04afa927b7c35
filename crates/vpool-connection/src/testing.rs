//! Mock driver used by the unit tests of this crate

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use vpool_core::{
    Connection, ConnectionFactory, QueryCancelHandle, QueryResult, Result, StatementResult,
    ThreadSafety, Value, VpoolError,
};

/// Initialize logging for tests if not already initialized
pub(crate) fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("vpool_connection=debug".parse().unwrap()),
            )
            .with_test_writer()
            .finish();

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

#[derive(Default)]
pub(crate) struct MockCancel {
    calls: AtomicUsize,
}

impl QueryCancelHandle for MockCancel {
    fn cancel(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock connection with failure and latency injection
pub(crate) struct MockConnection {
    #[allow(dead_code)]
    id: usize,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    /// Every statement fails with a connection error
    broken: AtomicBool,
    /// Queries fail with a query error, statements still succeed
    reject_queries: AtomicBool,
    query_delay: Mutex<Option<Duration>>,
    cancel: Arc<MockCancel>,
    statements: Mutex<Vec<String>>,
}

impl MockConnection {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            broken: AtomicBool::new(false),
            reject_queries: AtomicBool::new(false),
            query_delay: Mutex::new(None),
            cancel: Arc::new(MockCancel::default()),
            statements: Mutex::new(Vec::new()),
        }
    }

    pub fn set_broken(&self, broken: bool) {
        self.broken.store(broken, Ordering::SeqCst);
    }

    pub fn set_reject_queries(&self, reject: bool) {
        self.reject_queries.store(reject, Ordering::SeqCst);
    }

    pub fn set_query_delay(&self, delay: Duration) {
        *self.query_delay.lock() = Some(delay);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel.calls.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    fn check(&self, sql: &str) -> Result<()> {
        self.statements.lock().push(sql.to_string());
        if self.is_closed() {
            return Err(VpoolError::Connection("connection already closed".into()));
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(VpoolError::Connection("server closed the connection".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        self.check(sql)?;
        Ok(StatementResult { affected_rows: 1 })
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.check(sql)?;
        let delay = *self.query_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_queries.load(Ordering::SeqCst) {
            return Err(VpoolError::Query(format!("relation does not exist: {sql}")));
        }
        Ok(QueryResult::single_column(vec![Value::Int64(1)]))
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        Some(self.cancel.clone())
    }
}

/// Mock factory that keeps every connection it created
pub(crate) struct MockFactory {
    created: Mutex<Vec<Arc<MockConnection>>>,
    fail_create: AtomicBool,
    /// New connections come out broken
    break_new: AtomicBool,
    create_delay: Mutex<Option<Duration>>,
    threadsafety: ThreadSafety,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Self::with_threadsafety(ThreadSafety::Connections)
    }

    pub fn with_threadsafety(threadsafety: ThreadSafety) -> Arc<Self> {
        Arc::new(Self {
            created: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            break_new: AtomicBool::new(false),
            create_delay: Mutex::new(None),
            threadsafety,
        })
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_break_new(&self, broken: bool) {
        self.break_new.store(broken, Ordering::SeqCst);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock() = Some(delay);
    }

    /// Number of connections created so far
    pub fn count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn connection(&self, index: usize) -> Arc<MockConnection> {
        self.created.lock()[index].clone()
    }

    /// Connections not closed yet
    pub fn open_count(&self) -> usize {
        self.created.lock().iter().filter(|c| !c.is_closed()).count()
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(VpoolError::Connection("connection refused".into()));
        }
        let mut created = self.created.lock();
        let conn = Arc::new(MockConnection::new(created.len()));
        conn.set_broken(self.break_new.load(Ordering::SeqCst));
        created.push(conn.clone());
        Ok(conn)
    }

    fn threadsafety(&self) -> ThreadSafety {
        self.threadsafety
    }
}
