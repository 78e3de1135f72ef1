//! Origin connection pool keyed by `(scheme, host, port)`. Single-threaded:
//! no locks, per §5's concurrency model — every task runs on the same
//! event loop so `Rc<RefCell<..>>` is sufficient.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::dialer::OriginStream;

const MAX_TOTAL: usize = 64;
const MAX_PER_KEY: usize = 8;
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub scheme: &'static str,
    pub host: String,
    pub port: u16,
}

impl PoolKey {
    pub fn new(scheme: &'static str, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }
}

struct Entry {
    stream: OriginStream,
    idle_since: Instant,
}

/// A connection checked out of the pool. Dropping it without calling
/// [`ConnPool::put`] discards the connection rather than returning it.
pub struct PooledConn {
    pub stream: OriginStream,
}

#[derive(Clone)]
pub struct ConnPool {
    inner: Rc<RefCell<Inner>>,
}

#[derive(Default)]
struct Inner {
    by_key: HashMap<PoolKey, Vec<Entry>>,
    total: usize,
}

impl Default for ConnPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnPool {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner::default())),
        }
    }

    /// Returns a connection known-good *at insertion time*; the peer may
    /// have closed it silently since, and the caller must treat an
    /// immediate EOF as a normal pool-staleness case, not a hard error.
    pub fn get(&self, key: &PoolKey) -> Option<PooledConn> {
        let mut inner = self.inner.borrow_mut();
        self.evict_idle_locked(&mut inner);
        let entries = inner.by_key.get_mut(key)?;
        let entry = entries.pop()?;
        inner.total -= 1;
        if entries.is_empty() {
            inner.by_key.remove(key);
        }
        Some(PooledConn { stream: entry.stream })
    }

    /// Returns a connection to the pool for reuse. `keep_alive` reflects
    /// the caller's three-way keep-alive decision (request, response, and
    /// origin connection all agreeing) — `false` drops the connection.
    pub fn put(&self, key: PoolKey, conn: PooledConn, keep_alive: bool) {
        if !keep_alive {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        self.evict_idle_locked(&mut inner);
        if inner.total >= MAX_TOTAL {
            Self::evict_oldest_global(&mut inner);
        }
        let entries = inner.by_key.entry(key).or_default();
        if entries.len() >= MAX_PER_KEY {
            entries.remove(0);
            inner.total -= 1;
        }
        entries.push(Entry {
            stream: conn.stream,
            idle_since: Instant::now(),
        });
        inner.total += 1;
    }

    /// Entries within a key are always pushed to the back, so the front is
    /// always that key's least-recently-used connection. Evicting globally
    /// means finding whichever key's front entry is oldest overall.
    fn evict_oldest_global(inner: &mut Inner) {
        let oldest_key = inner
            .by_key
            .iter()
            .filter_map(|(k, entries)| entries.first().map(|e| (k.clone(), e.idle_since)))
            .min_by_key(|(_, idle_since)| *idle_since)
            .map(|(k, _)| k);
        let Some(key) = oldest_key else { return };
        if let Some(entries) = inner.by_key.get_mut(&key) {
            entries.remove(0);
            if entries.is_empty() {
                inner.by_key.remove(&key);
            }
            inner.total -= 1;
        }
    }

    pub fn size(&self) -> usize {
        self.inner.borrow().total
    }

    fn evict_idle_locked(&self, inner: &mut Inner) {
        let now = Instant::now();
        let mut removed = 0usize;
        inner.by_key.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| now.duration_since(e.idle_since) < IDLE_TIMEOUT);
            removed += before - entries.len();
            !entries.is_empty()
        });
        inner.total -= removed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_is_empty() {
        let pool = ConnPool::new();
        assert_eq!(pool.size(), 0);
        assert!(pool.get(&PoolKey::new("http", "example.com", 80)).is_none());
    }

    #[test]
    fn keys_with_same_fields_are_equal() {
        let a = PoolKey::new("https", "example.com", 443);
        let b = PoolKey::new("https", "example.com", 443);
        assert_eq!(a, b);
    }

    #[test]
    fn keys_differing_by_port_are_distinct() {
        let a = PoolKey::new("http", "example.com", 80);
        let b = PoolKey::new("http", "example.com", 8080);
        assert_ne!(a, b);
    }

    #[test]
    fn bounds_match_spec_defaults() {
        assert_eq!(MAX_TOTAL, 64);
        assert_eq!(MAX_PER_KEY, 8);
    }
}
