mod accounting;
mod idle;
mod reaper;
mod waiters;

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::PoolError;
use crate::models::pool_config::PoolOptions;
use crate::udbc::connector::Connector;

use accounting::{Accounting, ReserveTier};
use idle::{IdleConn, IdleSet};
use waiters::WaitQueue;

/// Snapshot of the pool counters.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    pub total: u32,
    pub idle: usize,
    pub in_use: u32,
    pub waiters: usize,
}

/// An async connection pool. The pool keeps the number of live connections
/// as small as bursty demand allows: acquire reuses an idle connection,
/// opens a new one below `maxsize`, waits `maxwait` for a freed slot, and
/// in the overflow variant opens past the soft cap rather than failing.
/// A background reaper closes connections that aged out or idled too long.
pub struct Pool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool").field("status", &self.status()).finish()
    }
}

pub(crate) struct PoolInner<C: Connector> {
    connector: C,
    options: PoolOptions,
    state: Mutex<PoolState<C>>,
    reaper_stop: Arc<Notify>,
}

struct PoolState<C: Connector> {
    idle: IdleSet<C::Conn>,
    accounting: Accounting,
    waiters: WaitQueue<Resolution<C>>,
    closed: bool,
}

/// What a suspended waiter receives.
enum Resolution<C: Connector> {
    /// A released connection, handed over directly so the idle set is
    /// bypassed and a later arrival cannot steal it.
    Handoff(PooledConnection<C>),
    /// A slot was freed by a close; the waiter re-runs admission.
    Retry,
}

/// Outcome of one admission pass under the lock.
enum Plan<C: Connector> {
    Probe(IdleConn<C::Conn>),
    Open,
    Wait {
        id: u64,
        rx: oneshot::Receiver<Resolution<C>>,
        deadline: Instant,
    },
    Exhausted { total: u32 },
    TooMany { total: u32 },
}

impl<C: Connector> Pool<C> {
    pub fn new(connector: C, options: PoolOptions) -> Result<Self, PoolError> {
        options.validate()?;
        let inner = Arc::new(PoolInner {
            connector,
            state: Mutex::new(PoolState {
                idle: IdleSet::new(),
                accounting: Accounting::new(options.maxsize, options.maxoverflow),
                waiters: WaitQueue::new(),
                closed: false,
            }),
            reaper_stop: Arc::new(Notify::new()),
            options,
        });
        if let Some(interval) = inner.options.reap_tick() {
            reaper::spawn(&inner, interval);
        }
        Ok(Self { inner })
    }

    /// Take a connection from the pool, suspending the calling task while
    /// it waits for a freed slot. The returned guard hands the connection
    /// back when dropped.
    pub async fn acquire(&self) -> Result<PooledConnection<C>, PoolError> {
        let deadline = self.inner.options.maxwait.map(|maxwait| Instant::now() + maxwait);
        let mut waited = false;

        loop {
            let plan = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                self.plan_admission(&mut state, deadline, waited)
            };

            match plan {
                Plan::Probe(entry) => {
                    if let Some(guard) = self.probe(entry).await {
                        return Ok(guard);
                    }
                }
                Plan::Open => return self.open_new().await,
                Plan::Wait { id, mut rx, deadline } => {
                    match tokio::time::timeout_at(deadline, &mut rx).await {
                        Ok(Ok(Resolution::Handoff(guard))) => return Ok(guard),
                        Ok(Ok(Resolution::Retry)) => waited = true,
                        Ok(Err(_)) => return Err(PoolError::Closed),
                        Err(_) => {
                            // The next pass settles it: overflow or failure.
                            if let Some(guard) = self.cancel_waiter(id, rx) {
                                return Ok(guard);
                            }
                            waited = true;
                        }
                    }
                }
                Plan::Exhausted { total } => {
                    return Err(PoolError::Exhausted {
                        total,
                        maxsize: self.inner.options.maxsize,
                    });
                }
                Plan::TooMany { total } => {
                    return Err(PoolError::Connection(format!(
                        "too many connections created: {} (maxoverflow is {})",
                        total, self.inner.options.maxoverflow
                    )));
                }
            }
        }
    }

    /// One pass of the admission state machine, entirely under the lock:
    /// TryIdle, then TryReserveNew, then Wait or fail.
    fn plan_admission(
        &self,
        state: &mut PoolState<C>,
        deadline: Option<Instant>,
        waited: bool,
    ) -> Plan<C> {
        let now = Instant::now();

        while let Some(entry) = state.idle.take_oldest() {
            if entry.is_past_expiry(now, self.inner.options.expires) {
                state.accounting.release();
                debug!("acquire: discarding idle connection past its expiry");
                PoolInner::spawn_close(&self.inner, entry.conn);
                continue;
            }
            return Plan::Probe(entry);
        }

        if state.accounting.try_reserve(ReserveTier::Base) {
            return Plan::Open;
        }

        match deadline {
            None => Plan::Exhausted {
                total: state.accounting.total(),
            },
            Some(deadline) if now < deadline => {
                let (id, rx) = if waited {
                    state.waiters.enqueue_front()
                } else {
                    state.waiters.enqueue()
                };
                Plan::Wait { id, rx, deadline }
            }
            Some(_) => {
                // waited out: the soft-cap variant opens an overflow
                // connection, the hard-cap variant gives up
                if self.inner.options.maxoverflow > 0 {
                    if state.accounting.try_reserve(ReserveTier::Overflow) {
                        Plan::Open
                    } else {
                        Plan::TooMany {
                            total: state.accounting.total(),
                        }
                    }
                } else {
                    Plan::Exhausted {
                        total: state.accounting.total(),
                    }
                }
            }
        }
    }

    /// Usability-check an idle candidate outside the lock. A connection
    /// failing the probe is closed and its slot released.
    async fn probe(&self, mut entry: IdleConn<C::Conn>) -> Option<PooledConnection<C>> {
        if self.inner.connector.is_usable(&mut entry.conn).await {
            return Some(PooledConnection::new(
                entry.conn,
                entry.created_at,
                Arc::downgrade(&self.inner),
            ));
        }
        debug!("acquire: discarding idle connection that failed the usability probe");
        self.inner.connector.close(entry.conn).await;
        self.inner.state.lock().accounting.release();
        None
    }

    /// Open a connection for a reservation already made. An open failure
    /// must give the slot back before the error propagates, and wake a
    /// waiter so the freed slot does not strand the queue.
    async fn open_new(&self) -> Result<PooledConnection<C>, PoolError> {
        match self.inner.connector.open().await {
            Ok(conn) => {
                debug!("acquire: opened new connection");
                Ok(PooledConnection::new(
                    conn,
                    Instant::now(),
                    Arc::downgrade(&self.inner),
                ))
            }
            Err(e) => {
                let mut state = self.inner.state.lock();
                state.accounting.release();
                let _ = state.waiters.resolve_one(Resolution::Retry);
                drop(state);
                warn!("acquire: failed to open connection: {}", e);
                Err(e)
            }
        }
    }

    /// Withdraw a timed-out waiter. When the entry is already gone a
    /// resolution raced in; recover it so nothing leaks.
    fn cancel_waiter(
        &self,
        id: u64,
        mut rx: oneshot::Receiver<Resolution<C>>,
    ) -> Option<PooledConnection<C>> {
        {
            let mut state = self.inner.state.lock();
            if state.waiters.remove(id) {
                return None;
            }
        }
        match rx.try_recv() {
            Ok(Resolution::Handoff(guard)) => Some(guard),
            _ => None,
        }
    }

    /// Close every idle connection and fail every pending waiter. In-use
    /// connections are closed as their guards drop.
    pub async fn shutdown(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.waiters.clear();
            let drained = state.idle.drain_all();
            for _ in &drained {
                state.accounting.release();
            }
            drained
        };
        self.inner.reaper_stop.notify_waiters();
        let closed = drained.len();
        for entry in drained {
            self.inner.connector.close(entry.conn).await;
        }
        debug!("shutdown: closed {} idle connection(s)", closed);
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        let total = state.accounting.total();
        let idle = state.idle.len();
        PoolStatus {
            total,
            idle,
            in_use: total.saturating_sub(idle as u32),
            waiters: state.waiters.len(),
        }
    }
}

impl<C: Connector> PoolInner<C> {
    /// Hand a connection back. A queued waiter gets it directly; without
    /// one it goes to the idle set, unless it aged out or the idle set is
    /// already full, in which case it is closed.
    fn release(inner: &Arc<Self>, conn: C::Conn, created_at: Instant) {
        let now = Instant::now();
        let past_expiry = inner
            .options
            .expires
            .is_some_and(|max_age| now.duration_since(created_at) >= max_age);

        let mut state = inner.state.lock();
        if state.closed {
            state.accounting.release();
            drop(state);
            Self::spawn_close(inner, conn);
            return;
        }
        if past_expiry {
            state.accounting.release();
            let _ = state.waiters.resolve_one(Resolution::Retry);
            drop(state);
            debug!("release: closing connection past its expiry");
            Self::spawn_close(inner, conn);
            return;
        }

        let guard = PooledConnection::new(conn, created_at, Arc::downgrade(inner));
        match state.waiters.resolve_one(Resolution::Handoff(guard)) {
            None => {
                drop(state);
                debug!("release: handed connection to the oldest waiter");
            }
            Some(Resolution::Handoff(guard)) => {
                let Some((conn, created_at)) = guard.into_raw() else {
                    return;
                };
                if state.idle.len() >= inner.options.maxsize as usize {
                    // the idle set is already satisfied: shed the surplus
                    state.accounting.release();
                    drop(state);
                    debug!("release: idle set full, closing connection");
                    Self::spawn_close(inner, conn);
                } else {
                    state.idle.put(conn, created_at, now);
                }
            }
            Some(Resolution::Retry) => {}
        }
    }

    /// Evict expired and long-idle connections, then nudge one waiter per
    /// freed slot. Returns true once the pool is closed.
    async fn reap_once(&self) -> bool {
        let now = Instant::now();
        let evicted = {
            let mut state = self.state.lock();
            if state.closed {
                return true;
            }
            let evicted =
                state
                    .idle
                    .remove_expired(now, self.options.expires, self.options.cleanup);
            for _ in &evicted {
                state.accounting.release();
                let _ = state.waiters.resolve_one(Resolution::Retry);
            }
            evicted
        };
        if !evicted.is_empty() {
            debug!("reaper: evicted {} connection(s)", evicted.len());
            for entry in evicted {
                self.connector.close(entry.conn).await;
            }
        }
        false
    }

    /// Close a connection on a background task; outside a runtime (process
    /// teardown) it is simply dropped.
    fn spawn_close(inner: &Arc<Self>, conn: C::Conn) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = Arc::clone(inner);
            handle.spawn(async move { inner.connector.close(conn).await });
        }
    }
}

/// RAII guard around one raw connection. Owned by exactly one caller;
/// dropping it releases the connection back to its pool.
#[must_use]
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Conn>,
    created_at: Instant,
    pool: Weak<PoolInner<C>>,
}

impl<C: Connector> PooledConnection<C> {
    fn new(conn: C::Conn, created_at: Instant, pool: Weak<PoolInner<C>>) -> Self {
        Self {
            conn: Some(conn),
            created_at,
            pool,
        }
    }

    /// When the connection was opened.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    fn into_raw(mut self) -> Option<(C::Conn, Instant)> {
        let created_at = self.created_at;
        self.conn.take().map(|conn| (conn, created_at))
    }
}

impl<C: Connector> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Conn;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().unwrap()
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap()
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Some(inner) = self.pool.upgrade() {
                PoolInner::release(&inner, conn, self.created_at);
            }
            // with the pool gone the raw connection just drops
        }
    }
}
