//! Connection pool creation and configuration.
//!
//! [`Pool`] is a bounded pool guarded by one mutex and one condition
//! variable. Connections are produced by any `r2d2::ManageConnection`; the
//! application uses [`create_pool`], which wires in the SQLite manager with
//! WAL mode, foreign keys, and a busy timeout.
//!
//! Borrowed connections are returned by dropping the [`PooledConnection`]
//! guard, so a connection goes back on every exit path, unwinding included.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use r2d2::ManageConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, ErrorCode, InterruptHandle, OpenFlags};

use crate::error::DbError;

/// Number of SQLite VM instructions between deadline checks.
const PROGRESS_OPS: i32 = 1_000;

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Number of connections opened eagerly when the pool is created.
    pub pool_min_size: u32,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,

    /// How long `get` waits for a free connection, in milliseconds.
    pub acquire_timeout_ms: u64,

    /// Deadline applied to each record statement, in milliseconds.
    pub statement_timeout_ms: Option<u64>,

    /// Run a liveness check on every connection handed back to the pool.
    pub test_on_release: bool,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_min_size: 1,
            pool_max_size: 8,
            acquire_timeout_ms: 5_000,
            statement_timeout_ms: None,
            test_on_release: true,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Sizing and timeout configuration for a [`Pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections opened up front.
    pub min_size: u32,
    /// Upper bound on live connections, borrowed and idle together.
    pub max_size: u32,
    /// Default wait used by [`Pool::get`].
    pub acquire_timeout: Duration,
    /// Per-statement deadline pushed down to the driver by record operations.
    pub statement_timeout: Option<Duration>,
    /// Validate connections when they are released.
    pub test_on_release: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        DbRuntimeSettings::default().into()
    }
}

impl From<DbRuntimeSettings> for PoolConfig {
    fn from(settings: DbRuntimeSettings) -> Self {
        Self {
            min_size: settings.pool_min_size,
            max_size: settings.pool_max_size,
            acquire_timeout: Duration::from_millis(settings.acquire_timeout_ms),
            statement_timeout: settings.statement_timeout_ms.map(Duration::from_millis),
            test_on_release: settings.test_on_release,
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> Result<(), DbError> {
        if self.max_size == 0 {
            return Err(DbError::Config("max_size must be at least 1".to_string()));
        }
        if self.min_size > self.max_size {
            return Err(DbError::Config(format!(
                "min_size ({}) exceeds max_size ({})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }
}

/// Point-in-time view of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Open connections, including ones being opened right now.
    pub live: u32,
    /// Connections sitting in the free list.
    pub idle: u32,
    /// Connections currently lent out.
    pub borrowed: u32,
    /// Configured maximum.
    pub max_size: u32,
    /// Whether [`Pool::shutdown`] has been called.
    pub closed: bool,
}

struct State<C> {
    idle: VecDeque<C>,
    live: u32,
    closed: bool,
}

struct Shared<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    state: Mutex<State<M::Connection>>,
    available: Condvar,
}

impl<M: ManageConnection> Shared<M> {
    fn lock(&self) -> MutexGuard<'_, State<M::Connection>> {
        // Every critical section leaves the state consistent, so a poisoned
        // lock still guards valid data.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, mut conn: M::Connection, broken: bool) {
        let discard = broken || self.manager.has_broken(&mut conn) || {
            self.config.test_on_release
                && match self.manager.is_valid(&mut conn) {
                    Ok(()) => false,
                    Err(err) => {
                        tracing::warn!(error = %err, "connection failed validation on release");
                        true
                    }
                }
        };

        let mut state = self.lock();
        if discard || state.closed {
            state.live -= 1;
            drop(state);
            drop(conn);
            if discard {
                tracing::warn!("discarded broken database connection");
            }
        } else {
            state.idle.push_back(conn);
            drop(state);
        }
        self.available.notify_one();
    }
}

/// A bounded, thread-safe connection pool.
///
/// Cloning is cheap and yields a handle to the same pool.
pub struct Pool<M: ManageConnection> {
    shared: Arc<Shared<M>>,
}

impl<M: ManageConnection> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ManageConnection> fmt::Debug for Pool<M>
where
    M::Error: Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.shared.config)
            .field("status", &self.status())
            .finish()
    }
}

impl<M: ManageConnection> Pool<M>
where
    M::Error: Send + Sync,
{
    /// Creates a pool and eagerly opens `config.min_size` connections.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Config` for an unusable configuration and
    /// `DbError::Connection` if one of the initial connections cannot be opened.
    pub fn new(manager: M, config: PoolConfig) -> Result<Self, DbError> {
        config.validate()?;

        let mut idle = VecDeque::with_capacity(config.max_size as usize);
        for _ in 0..config.min_size {
            let conn = manager
                .connect()
                .map_err(|e| DbError::Connection(Box::new(e)))?;
            idle.push_back(conn);
        }

        tracing::debug!(
            min_size = config.min_size,
            max_size = config.max_size,
            "database pool initialized"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                manager,
                config,
                state: Mutex::new(State {
                    idle,
                    live: config.min_size,
                    closed: false,
                }),
                available: Condvar::new(),
            }),
        })
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Borrows a connection, waiting at most the configured acquire timeout.
    ///
    /// # Errors
    ///
    /// See [`Pool::acquire_until`].
    pub fn get(&self) -> Result<PooledConnection<M>, DbError> {
        self.acquire(self.shared.config.acquire_timeout)
    }

    /// Borrows a connection, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// See [`Pool::acquire_until`].
    pub fn acquire(&self, timeout: Duration) -> Result<PooledConnection<M>, DbError> {
        let deadline = Instant::now()
            .checked_add(timeout)
            .ok_or_else(|| DbError::Config(format!("acquire timeout {timeout:?} is too large")))?;
        self.acquire_until(deadline)
    }

    /// Borrows a connection, giving up at `deadline`.
    ///
    /// A free connection is preferred; a new one is opened only when the
    /// free list is empty and fewer than `max_size` connections are live.
    /// Otherwise the calling thread sleeps until a connection is released,
    /// the pool shuts down, or the deadline passes.
    ///
    /// # Errors
    ///
    /// - `DbError::PoolClosed` if the pool is (or becomes) shut down.
    /// - `DbError::PoolExhausted` if the deadline passes first.
    /// - `DbError::Connection` if opening a new connection fails.
    pub fn acquire_until(&self, deadline: Instant) -> Result<PooledConnection<M>, DbError> {
        let started = Instant::now();
        let mut state = self.shared.lock();

        loop {
            if state.closed {
                return Err(DbError::PoolClosed);
            }

            if let Some(conn) = state.idle.pop_front() {
                return Ok(PooledConnection::new(Arc::clone(&self.shared), conn));
            }

            if state.live < self.shared.config.max_size {
                // Reserve the slot, then connect without holding the lock.
                state.live += 1;
                drop(state);
                return self.open_reserved();
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(waited = ?started.elapsed(), "database pool exhausted");
                return Err(DbError::PoolExhausted(started.elapsed()));
            }

            state = self
                .shared
                .available
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn open_reserved(&self) -> Result<PooledConnection<M>, DbError> {
        match self.shared.manager.connect() {
            Ok(conn) => {
                let mut state = self.shared.lock();
                if state.closed {
                    state.live -= 1;
                    drop(state);
                    drop(conn);
                    self.shared.available.notify_one();
                    return Err(DbError::PoolClosed);
                }
                drop(state);
                tracing::debug!("opened database connection");
                Ok(PooledConnection::new(Arc::clone(&self.shared), conn))
            }
            Err(err) => {
                self.shared.lock().live -= 1;
                self.shared.available.notify_one();
                tracing::error!(error = %err, "failed to open database connection");
                Err(DbError::Connection(Box::new(err)))
            }
        }
    }

    /// Returns a connection to the pool. Equivalent to dropping the guard.
    pub fn release(&self, conn: PooledConnection<M>) {
        drop(conn);
    }

    /// Closes every idle connection and refuses further borrows.
    ///
    /// Connections currently lent out are closed as they are released.
    /// Threads blocked in `acquire` wake up with `DbError::PoolClosed`.
    pub fn shutdown(&self) {
        let drained: Vec<M::Connection> = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.live -= drained.len() as u32;
            drained
        };
        self.shared.available.notify_all();

        let closed = drained.len();
        drop(drained);
        tracing::info!(closed, "database pool shut down");
    }

    /// Whether [`Pool::shutdown`] has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Returns current occupancy.
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock();
        let idle = state.idle.len() as u32;
        PoolStatus {
            live: state.live,
            idle,
            borrowed: state.live - idle,
            max_size: self.shared.config.max_size,
            closed: state.closed,
        }
    }
}

/// A connection lent out by a [`Pool`].
///
/// Dereferences to the underlying connection and returns it to the pool on drop.
pub struct PooledConnection<M: ManageConnection> {
    shared: Arc<Shared<M>>,
    conn: Option<M::Connection>,
    broken: bool,
}

impl<M: ManageConnection> PooledConnection<M> {
    fn new(shared: Arc<Shared<M>>, conn: M::Connection) -> Self {
        Self {
            shared,
            conn: Some(conn),
            broken: false,
        }
    }

    /// Marks the connection as unusable so it is discarded instead of reused.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &M::Connection {
        self.conn.as_ref().expect("connection is present until drop")
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut M::Connection {
        self.conn.as_mut().expect("connection is present until drop")
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn, self.broken);
        }
    }
}

impl<M: ManageConnection> fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl PooledConnection<SqliteConnectionManager> {
    /// Returns a handle that interrupts whatever statement this connection
    /// is running, callable from any thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.get_interrupt_handle()
    }

    /// Runs `f` with the driver aborting any statement still executing at
    /// `deadline`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Interrupted` if the deadline (or an interrupt
    /// handle) stopped a statement, otherwise whatever `f` returns.
    pub fn with_deadline<T, F>(&self, deadline: Option<Instant>, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Connection) -> Result<T, DbError>,
    {
        let conn: &Connection = self;
        let _guard = match deadline {
            Some(deadline) => {
                if Instant::now() >= deadline {
                    return Err(DbError::Interrupted);
                }
                conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));
                Some(ProgressGuard(conn))
            }
            None => None,
        };

        match f(conn) {
            Err(DbError::Query(err))
                if err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) =>
            {
                Err(DbError::Interrupted)
            }
            other => other,
        }
    }
}

/// Removes the progress handler so a deadline never outlives its statement.
struct ProgressGuard<'a>(&'a Connection);

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.progress_handler(PROGRESS_OPS, None::<fn() -> bool>);
    }
}

/// Creates a new SQLite connection pool with WAL mode and foreign keys enabled.
///
/// # Arguments
///
/// * `db_path` - Path to the SQLite database file. `:memory:` works but
///   gives every pooled connection its own private database.
///
/// # Errors
///
/// Returns `DbError::Config` or `DbError::Connection` if the pool cannot be created.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, DbError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| {
            // In-memory databases report "memory", which is acceptable.
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if journal_mode != "wal" && journal_mode != "memory" {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!(
                        "failed to set WAL journal mode, got: {}",
                        journal_mode
                    )),
                ));
            }
            conn.execute_batch(&format!(
                "PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = {};",
                settings.busy_timeout_ms
            ))
        });

    Pool::new(manager, settings.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use std::thread;

    #[derive(Debug, thiserror::Error)]
    #[error("fake connection failure")]
    struct FakeError;

    #[derive(Debug)]
    struct FakeConn {
        id: u32,
    }

    #[derive(Debug, Default)]
    struct FakeManager {
        opened: AtomicU32,
        reject_on_release: AtomicBool,
        refuse_connect: AtomicBool,
    }

    impl ManageConnection for FakeManager {
        type Connection = FakeConn;
        type Error = FakeError;

        fn connect(&self) -> Result<FakeConn, FakeError> {
            if self.refuse_connect.load(Ordering::SeqCst) {
                return Err(FakeError);
            }
            Ok(FakeConn {
                id: self.opened.fetch_add(1, Ordering::SeqCst),
            })
        }

        fn is_valid(&self, _conn: &mut FakeConn) -> Result<(), FakeError> {
            if self.reject_on_release.load(Ordering::SeqCst) {
                Err(FakeError)
            } else {
                Ok(())
            }
        }

        fn has_broken(&self, _conn: &mut FakeConn) -> bool {
            false
        }
    }

    fn fake_pool(min_size: u32, max_size: u32) -> Pool<FakeManager> {
        Pool::new(
            FakeManager::default(),
            PoolConfig {
                min_size,
                max_size,
                acquire_timeout: Duration::from_millis(50),
                statement_timeout: None,
                test_on_release: true,
            },
        )
        .expect("pool creation should succeed")
    }

    #[test]
    fn min_connections_are_opened_up_front() {
        let pool = fake_pool(2, 4);
        let status = pool.status();
        assert_eq!(status.live, 2);
        assert_eq!(status.idle, 2);
        assert_eq!(status.borrowed, 0);
        assert_eq!(pool.shared.manager.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rejects_unusable_config() {
        let err = Pool::new(
            FakeManager::default(),
            PoolConfig {
                max_size: 0,
                ..PoolConfig::default()
            },
        )
        .expect_err("zero max_size should fail");
        assert!(matches!(err, DbError::Config(_)));

        let err = Pool::new(
            FakeManager::default(),
            PoolConfig {
                min_size: 5,
                max_size: 2,
                ..PoolConfig::default()
            },
        )
        .expect_err("min above max should fail");
        assert!(matches!(err, DbError::Config(_)));
    }

    #[test]
    fn fourth_borrower_waits_for_release() {
        let pool = fake_pool(1, 3);
        let a = pool.get().expect("first acquire");
        let _b = pool.get().expect("second acquire");
        let _c = pool.get().expect("third acquire");

        let err = pool
            .acquire(Duration::from_millis(20))
            .expect_err("fourth acquire should time out");
        assert!(matches!(err, DbError::PoolExhausted(_)));

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || {
                pool.acquire(Duration::from_secs(5))
                    .map(|conn| conn.id)
                    .expect("waiting acquire should succeed after release")
            })
        };

        thread::sleep(Duration::from_millis(20));
        let released_id = a.id;
        pool.release(a);

        let got = waiter.join().expect("waiter should not panic");
        assert_eq!(got, released_id, "waiter should receive the released connection");
        assert_eq!(pool.shared.manager.opened.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn borrowed_never_exceeds_max_under_contention() {
        let pool = fake_pool(0, 3);
        let in_use = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let pool = pool.clone();
                let in_use = Arc::clone(&in_use);
                let peak = Arc::clone(&peak);
                thread::spawn(move || {
                    for _ in 0..5 {
                        let conn = pool
                            .acquire(Duration::from_secs(10))
                            .expect("acquire should eventually succeed");
                        let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        assert!(pool.status().borrowed <= 3);
                        thread::sleep(Duration::from_millis(2));
                        in_use.fetch_sub(1, Ordering::SeqCst);
                        drop(conn);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker should not panic");
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(pool.shared.manager.opened.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.status().borrowed, 0);
    }

    #[test]
    fn acquire_after_shutdown_fails() {
        let pool = fake_pool(2, 2);
        pool.shutdown();

        for _ in 0..3 {
            let err = pool.get().expect_err("acquire after shutdown should fail");
            assert!(matches!(err, DbError::PoolClosed));
        }
        assert!(pool.is_closed());
        assert_eq!(pool.status().live, 0);
    }

    #[test]
    fn borrowed_connection_is_closed_when_released_after_shutdown() {
        let pool = fake_pool(1, 2);
        let conn = pool.get().expect("acquire before shutdown");
        pool.shutdown();
        assert_eq!(pool.status().live, 1);

        drop(conn);
        let status = pool.status();
        assert_eq!(status.live, 0);
        assert_eq!(status.idle, 0);
    }

    #[test]
    fn shutdown_wakes_blocked_waiters() {
        let pool = fake_pool(1, 1);
        let held = pool.get().expect("acquire the only connection");

        let waiter = {
            let pool = pool.clone();
            thread::spawn(move || pool.acquire(Duration::from_secs(10)).map(|_| ()))
        };

        thread::sleep(Duration::from_millis(20));
        pool.shutdown();

        let result = waiter.join().expect("waiter should not panic");
        assert!(matches!(result, Err(DbError::PoolClosed)));
        drop(held);
    }

    #[test]
    fn broken_connection_is_replaced() {
        let pool = fake_pool(1, 1);
        let mut conn = pool.get().expect("acquire");
        let first_id = conn.id;
        conn.mark_broken();
        drop(conn);

        assert_eq!(pool.status().live, 0);

        let replacement = pool.get().expect("acquire replacement");
        assert_ne!(replacement.id, first_id);
        assert_eq!(pool.shared.manager.opened.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn connection_failing_validation_is_discarded() {
        let pool = fake_pool(1, 2);
        let conn = pool.get().expect("acquire");
        pool.shared
            .manager
            .reject_on_release
            .store(true, Ordering::SeqCst);
        drop(conn);

        let status = pool.status();
        assert_eq!(status.live, 0);
        assert_eq!(status.idle, 0);
    }

    #[test]
    fn release_from_panicking_borrower() {
        let pool = fake_pool(1, 1);
        let result = {
            let pool = pool.clone();
            thread::spawn(move || {
                let _conn = pool.get().expect("acquire");
                panic!("borrower failed mid-operation");
            })
            .join()
        };
        assert!(result.is_err());

        let status = pool.status();
        assert_eq!(status.borrowed, 0);
        assert_eq!(status.idle, 1);
    }

    #[test]
    fn acquire_until_gives_up_at_the_deadline() {
        let pool = fake_pool(1, 1);

        // A free connection is handed out even when the deadline has passed.
        let held = pool
            .acquire_until(Instant::now())
            .expect("idle connection should be returned");

        let err = pool
            .acquire_until(Instant::now())
            .expect_err("past deadline with no free connection");
        assert!(matches!(err, DbError::PoolExhausted(_)));

        let started = Instant::now();
        let err = pool
            .acquire_until(started + Duration::from_millis(30))
            .expect_err("near deadline with no free connection");
        assert!(matches!(err, DbError::PoolExhausted(_)));
        assert!(started.elapsed() >= Duration::from_millis(30));

        drop(held);
        assert_eq!(pool.status().borrowed, 0);
    }

    #[test]
    fn connect_failure_keeps_the_driver_error() {
        let pool = fake_pool(0, 1);
        pool.shared.manager.refuse_connect.store(true, Ordering::SeqCst);

        let err = pool.get().expect_err("connect should fail");
        assert!(matches!(err, DbError::Connection(_)));
        let source = std::error::Error::source(&err).expect("driver error should be kept");
        assert!(source.downcast_ref::<FakeError>().is_some());
        assert_eq!(pool.status().live, 0);

        pool.shared.manager.refuse_connect.store(false, Ordering::SeqCst);
        pool.get().expect("slot should be free again");
    }

    #[test]
    fn create_sqlite_pool() {
        let settings = DbRuntimeSettings {
            busy_timeout_ms: 2_500,
            pool_min_size: 1,
            pool_max_size: 3,
            ..DbRuntimeSettings::default()
        };

        let pool = create_pool(":memory:", settings).expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert!(
            mode == "wal" || mode == "memory",
            "unexpected journal_mode: {mode}"
        );

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("should query foreign_keys");
        assert_eq!(fk, 1, "foreign keys should be enabled");

        let busy_timeout: i32 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .expect("should query busy_timeout");
        assert_eq!(busy_timeout, 2_500, "busy timeout should match settings");

        assert_eq!(pool.config().max_size, 3, "pool max size should match settings");
    }

    #[test]
    fn deadline_interrupts_runaway_statement() {
        let pool = create_pool(":memory:", DbRuntimeSettings::default())
            .expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");

        let deadline = Instant::now() + Duration::from_millis(50);
        let err = conn
            .with_deadline(Some(deadline), |c| {
                Ok(c.query_row(
                    "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n)
                     SELECT COUNT(*) FROM n",
                    [],
                    |row| row.get::<_, i64>(0),
                )?)
            })
            .expect_err("unbounded query should be interrupted");
        assert!(matches!(err, DbError::Interrupted), "got {err:?}");

        // The handler is removed once the closure returns.
        let one: i64 = conn
            .with_deadline(None, |c| Ok(c.query_row("SELECT 1", [], |row| row.get(0))?))
            .expect("connection should be usable after interruption");
        assert_eq!(one, 1);
    }

    #[test]
    fn interrupt_handle_stops_a_statement_from_another_thread() {
        let pool = create_pool(":memory:", DbRuntimeSettings::default())
            .expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");

        let handle = conn.interrupt_handle();
        let interrupter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            handle.interrupt();
        });

        let err = conn
            .with_deadline(None, |c| {
                Ok(c.query_row(
                    "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n)
                     SELECT COUNT(*) FROM n",
                    [],
                    |row| row.get::<_, i64>(0),
                )?)
            })
            .expect_err("interrupted query should fail");
        interrupter.join().expect("interrupter should not panic");
        assert!(matches!(err, DbError::Interrupted), "got {err:?}");

        drop(conn);
        assert_eq!(pool.status().borrowed, 0);
    }
}
