use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// One idle connection with the timestamps that decide its fate.
pub(crate) struct IdleConn<T> {
    pub conn: T,
    pub created_at: Instant,
    pub last_released_at: Instant,
}

impl<T> IdleConn<T> {
    pub fn is_past_expiry(&self, now: Instant, expires: Option<Duration>) -> bool {
        expires.is_some_and(|max_age| now.duration_since(self.created_at) >= max_age)
    }

    fn is_idle_too_long(&self, now: Instant, cleanup: Option<Duration>) -> bool {
        cleanup.is_some_and(|max_idle| now.duration_since(self.last_released_at) >= max_idle)
    }
}

/// The reusable connections currently sitting in the pool, oldest release
/// first, so the least recently used connection is handed out next and the
/// newest ones are the first to idle out.
pub(crate) struct IdleSet<T> {
    conns: VecDeque<IdleConn<T>>,
}

impl<T> IdleSet<T> {
    pub fn new() -> Self {
        Self {
            conns: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn take_oldest(&mut self) -> Option<IdleConn<T>> {
        self.conns.pop_front()
    }

    pub fn put(&mut self, conn: T, created_at: Instant, now: Instant) {
        self.conns.push_back(IdleConn {
            conn,
            created_at,
            last_released_at: now,
        });
    }

    /// Drain every connection that aged out (`expires`) or sat idle for too
    /// long (`cleanup`). The caller closes them.
    pub fn remove_expired(
        &mut self,
        now: Instant,
        expires: Option<Duration>,
        cleanup: Option<Duration>,
    ) -> Vec<IdleConn<T>> {
        let mut evicted = Vec::new();
        let mut kept = VecDeque::with_capacity(self.conns.len());
        while let Some(entry) = self.conns.pop_front() {
            if entry.is_past_expiry(now, expires) || entry.is_idle_too_long(now, cleanup) {
                evicted.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        self.conns = kept;
        evicted
    }

    pub fn drain_all(&mut self) -> Vec<IdleConn<T>> {
        self.conns.drain(..).collect()
    }
}
