//! Provides connection pooling with per-route and total limits.
//!
//! A connection is either idle (parked in the pool, keyed by route) or leased
//! (wrapped in a [`Pooled`] guard). Every lease carries a [`Permit`] drawn from
//! a per-route and a pool wide semaphore, so at most `max_per_route` leases of
//! a route and `max_total` leases overall exist at a time. Dropping the guard
//! parks the connection again (if it is still open) and then gives the permit
//! back.
mod connector;
use std::{
    cell::UnsafeCell,
    collections::{HashMap, VecDeque},
    fmt::{self, Debug},
    hash::Hash,
    ops::{Deref, DerefMut},
    rc::{Rc, Weak},
    sync::Arc,
    time::{Duration, Instant},
};

pub use connector::PooledConnector;
use thiserror::Error as ThisError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub(crate) const DEFAULT_POOL_SIZE: usize = 32;
// https://datatracker.ietf.org/doc/html/rfc6335
pub(crate) const MAX_KEEPALIVE_CONNS: usize = 16384;

pub trait Poolable {
    fn is_open(&self) -> bool;
}

type SharedPool<K, IO> = Rc<UnsafeCell<PoolInner<K, IO>>>;
type WeakPool<K, IO> = Weak<UnsafeCell<PoolInner<K, IO>>>;

pub trait Key: Eq + Hash + Clone + Debug + 'static {}
impl<T: Eq + Hash + Clone + Debug + 'static> Key for T {}

#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("no connection available within {0:?}")]
    Exhausted(Duration),
    #[error("connection pool is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    pub max_total: usize,
    pub max_per_route: usize,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            max_total: crate::config::DEFAULT_MAX_TOTAL,
            max_per_route: crate::config::DEFAULT_MAX_PER_ROUTE,
        }
    }
}

/// Snapshot of the pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub leased: usize,
    pub idle: usize,
    pub available: usize,
    pub limits: PoolLimits,
}

/// Right to hold one leased connection of a route.
#[derive(Debug)]
pub struct Permit {
    _route: OwnedSemaphorePermit,
    _total: OwnedSemaphorePermit,
}

// Partly borrow from hyper-util. All rights reserved.
pub struct Pooled<K: Key, T: Poolable> {
    value: Option<T>,
    is_reused: bool,
    key: Option<K>,
    pool: Option<WeakPool<K, T>>,
    // dropped after the connection is parked, see the Drop impl
    _permit: Option<Permit>,
}

impl<T: Poolable, K: Key> Pooled<K, T> {
    #[inline]
    pub(crate) const fn new(
        key: K,
        value: T,
        is_reused: bool,
        pool: WeakPool<K, T>,
        permit: Permit,
    ) -> Self {
        Self {
            value: Some(value),
            is_reused,
            key: Some(key),
            pool: Some(pool),
            _permit: Some(permit),
        }
    }

    #[inline]
    pub fn is_reused(&self) -> bool {
        self.is_reused
    }

    #[inline]
    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    /// Close the connection instead of returning it to the pool. The permit is
    /// released all the same.
    pub fn discard(mut self) {
        if let Some(_value) = self.value.take() {
            #[cfg(feature = "logging")]
            tracing::debug!("discarding pooled connection for {:?}", self.key);
        }
    }

    #[inline]
    fn as_ref(&self) -> &T {
        self.value.as_ref().expect("not dropped")
    }

    #[inline]
    fn as_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("not dropped")
    }
}

impl<T: Poolable, K: Key> fmt::Debug for Pooled<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("key", &self.key)
            .field("is_reused", &self.is_reused)
            .field("is_open", &self.value.as_ref().map(T::is_open))
            .finish()
    }
}

impl<T: Poolable, K: Key> Deref for Pooled<K, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.as_ref()
    }
}

impl<T: Poolable, K: Key> DerefMut for Pooled<K, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        self.as_mut()
    }
}

impl<T: Poolable, K: Key> Drop for Pooled<K, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            if !value.is_open() {
                // If we *already* know the connection is done here,
                // it shouldn't be re-inserted back into the pool.
                #[cfg(feature = "logging")]
                tracing::debug!("connection for {:?} is not reusable, closed", self.key);
                return;
            }

            if let Some(weak) = &self.pool {
                if let Some(pool) = weak.upgrade() {
                    let pool = unsafe { &mut *pool.get() };
                    if pool.closed {
                        return;
                    }
                    let key = self.key.take().expect("key is not empty");
                    let max_idle = pool.max_idle;
                    let queue = pool.idle_conns.entry(key).or_default();
                    while queue.len() >= max_idle {
                        let _ = queue.pop_front();
                    }

                    queue.push_back(Idle::new(value));
                    #[cfg(feature = "logging")]
                    tracing::debug!("connection recycled, idle size {}", queue.len());
                }
            }
        }
    }
}

pub(crate) struct Idle<IO> {
    pub(crate) conn: IO,
    idle_at: Instant,
}

impl<IO> Idle<IO> {
    #[inline]
    pub(crate) fn new(io: IO) -> Self {
        Self {
            conn: io,
            idle_at: Instant::now(),
        }
    }

    #[allow(unused)]
    #[inline]
    pub(crate) fn expired(&self, max_elapsed: Duration) -> bool {
        self.idle_at.elapsed() > max_elapsed
    }

    #[allow(unused)]
    #[inline]
    pub(crate) fn expired_opt(&self, max_elapsed: Option<Duration>) -> bool {
        match max_elapsed {
            Some(e) => self.idle_at.elapsed() > e,
            None => false,
        }
    }
}

pub(crate) struct PoolInner<K, IO> {
    idle_conns: HashMap<K, VecDeque<Idle<IO>>>,
    routes: HashMap<K, Arc<Semaphore>>,
    total: Arc<Semaphore>,
    limits: PoolLimits,
    max_idle: usize,
    closed: bool,
    #[cfg(feature = "time")]
    idle_dur: Option<Duration>,
    #[cfg(feature = "time")]
    _drop: Option<local_sync::oneshot::Receiver<()>>,
}

impl<K, IO> PoolInner<K, IO> {
    fn new(limits: PoolLimits, max_idle: Option<usize>) -> Self {
        let max_total = limits.max_total.min(Semaphore::MAX_PERMITS);
        let max_idle = max_idle
            .unwrap_or(limits.max_per_route)
            .clamp(1, MAX_KEEPALIVE_CONNS);
        Self {
            idle_conns: HashMap::with_capacity(DEFAULT_POOL_SIZE),
            routes: HashMap::with_capacity(DEFAULT_POOL_SIZE),
            total: Arc::new(Semaphore::new(max_total)),
            limits: PoolLimits {
                max_total,
                max_per_route: limits.max_per_route.min(Semaphore::MAX_PERMITS),
            },
            max_idle,
            closed: false,
            #[cfg(feature = "time")]
            idle_dur: None,
            #[cfg(feature = "time")]
            _drop: None,
        }
    }

    #[inline]
    fn idle_count(&self) -> usize {
        self.idle_conns.values().map(VecDeque::len).sum()
    }

    #[inline]
    fn leased_count(&self) -> usize {
        self.limits
            .max_total
            .saturating_sub(self.total.available_permits())
    }

    #[allow(unused)]
    fn clear_expired(&mut self, dur: Duration) {
        self.idle_conns.retain(|_, values| {
            values.retain(|entry| !entry.expired(dur));
            !values.is_empty()
        });
    }
}

#[derive(Debug)]
pub struct ConnectionPool<K, T> {
    shared: SharedPool<K, T>,
}

impl<K, T> Clone for ConnectionPool<K, T> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<K: 'static, T: 'static> ConnectionPool<K, T> {
    #[cfg(feature = "time")]
    pub fn new_with_idle_interval(
        limits: PoolLimits,
        // `idle_interval` controls how often the pool will check for idle connections.
        // It is also used to determine if a connection is expired.
        idle_interval: Option<Duration>,
        // `max_idle` is max idle connection count per route
        max_idle: Option<usize>,
    ) -> Self {
        const MIN_INTERVAL: Duration = Duration::from_secs(1);

        let mut inner = PoolInner::new(limits, max_idle);
        if let Some(idle_dur) = idle_interval {
            let interval = idle_dur.max(MIN_INTERVAL);
            let (tx, drop) = local_sync::oneshot::channel();
            inner.idle_dur = Some(idle_dur);
            inner._drop = Some(drop);

            let shared = Rc::new(UnsafeCell::new(inner));
            monoio::spawn(IdleTask {
                tx,
                conns: Rc::downgrade(&shared),
                interval: monoio::time::interval(interval),
                idle_dur,
            });
            Self { shared }
        } else {
            Self {
                shared: Rc::new(UnsafeCell::new(inner)),
            }
        }
    }

    #[inline]
    pub fn new(limits: PoolLimits, max_idle: Option<usize>) -> Self {
        Self {
            shared: Rc::new(UnsafeCell::new(PoolInner::new(limits, max_idle))),
        }
    }
}

impl<K: 'static, T: 'static> Default for ConnectionPool<K, T> {
    fn default() -> Self {
        Self::new(PoolLimits::default(), None)
    }
}

impl<K: Key, T: Poolable> ConnectionPool<K, T> {
    /// Wait for a free lease slot of `key`, at most `wait` when given.
    pub async fn acquire(&self, key: &K, wait: Option<Duration>) -> Result<Permit, PoolError> {
        let (route, total) = {
            let inner = unsafe { &mut *self.shared.get() };
            if inner.closed {
                return Err(PoolError::Closed);
            }
            // a semaphore nobody holds or waits on is back to full permits
            inner
                .routes
                .retain(|k, sem| k == key || Arc::strong_count(sem) > 1);
            let max_per_route = inner.limits.max_per_route;
            let route = inner
                .routes
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(max_per_route)))
                .clone();
            (route, inner.total.clone())
        };

        // route first, so that a waiter never sits on a total slot other
        // routes could use
        let permit = async move {
            let route = route.acquire_owned().await.map_err(|_| PoolError::Closed)?;
            let total = total.acquire_owned().await.map_err(|_| PoolError::Closed)?;
            Ok::<_, PoolError>(Permit {
                _route: route,
                _total: total,
            })
        };
        match wait {
            Some(dur) => match monoio::time::timeout(dur, permit).await {
                Ok(r) => r,
                Err(_) => {
                    #[cfg(feature = "logging")]
                    tracing::debug!("no connection for {:?} within {:?}", key, dur);
                    Err(PoolError::Exhausted(dur))
                }
            },
            None => permit.await,
        }
    }

    /// Take the most recently parked idle connection of `key` that is still
    /// usable.
    pub fn pop_idle(&self, key: &K) -> Option<T> {
        let inner = unsafe { &mut *self.shared.get() };
        #[cfg(feature = "time")]
        let idle_dur = inner.idle_dur;
        let queue = inner.idle_conns.get_mut(key)?;
        let conn = loop {
            let Some(idle) = queue.pop_back() else {
                break None;
            };
            #[cfg(feature = "time")]
            if idle.expired_opt(idle_dur) {
                continue;
            }
            if idle.conn.is_open() {
                #[cfg(feature = "logging")]
                tracing::debug!("connection got from pool for {:?}", key);
                break Some(idle.conn);
            }
        };
        if queue.is_empty() {
            inner.idle_conns.remove(key);
        }
        conn
    }

    /// Wrap a reused connection into a lease.
    #[inline]
    pub fn reuse(&self, key: K, conn: T, permit: Permit) -> Pooled<K, T> {
        Pooled::new(key, conn, true, Rc::downgrade(&self.shared), permit)
    }

    /// Wrap a freshly opened connection into a lease, evicting idle
    /// connections of any route while the pool holds more than `max_total`.
    pub fn link(&self, key: K, conn: T, permit: Permit) -> Pooled<K, T> {
        self.make_room();
        #[cfg(feature = "logging")]
        tracing::debug!("linked new connection to the pool for {:?}", key);

        Pooled::new(key, conn, false, Rc::downgrade(&self.shared), permit)
    }

    fn make_room(&self) {
        let inner = unsafe { &mut *self.shared.get() };
        let leased = inner.leased_count();
        let mut idle = inner.idle_count();
        while idle > 0 && idle + leased > inner.limits.max_total {
            let victim = inner
                .idle_conns
                .iter()
                .filter_map(|(k, q)| q.front().map(|i| (k, i.idle_at)))
                .min_by_key(|(_, at)| *at)
                .map(|(k, _)| k.clone());
            let Some(victim) = victim else {
                break;
            };
            if let Some(queue) = inner.idle_conns.get_mut(&victim) {
                let _ = queue.pop_front();
                if queue.is_empty() {
                    inner.idle_conns.remove(&victim);
                }
            }
            #[cfg(feature = "logging")]
            tracing::debug!("evicted idle connection of {:?}", victim);
            idle -= 1;
        }
    }

    #[inline]
    pub fn get_idle_connection_count(&self) -> usize {
        let inner: &PoolInner<K, T> = unsafe { &*self.shared.get() };
        inner.idle_count()
    }

    pub fn stats(&self) -> PoolStats {
        let inner: &PoolInner<K, T> = unsafe { &*self.shared.get() };
        PoolStats {
            leased: inner.leased_count(),
            idle: inner.idle_count(),
            available: inner.total.available_permits(),
            limits: inner.limits,
        }
    }

    #[inline]
    pub fn limits(&self) -> PoolLimits {
        let inner: &PoolInner<K, T> = unsafe { &*self.shared.get() };
        inner.limits
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        let inner: &PoolInner<K, T> = unsafe { &*self.shared.get() };
        inner.closed
    }

    /// Drop every idle connection and refuse further leases. Leases still out
    /// are closed when they are dropped.
    pub fn close(&self) {
        let inner = unsafe { &mut *self.shared.get() };
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.total.close();
        inner.routes.values().for_each(|s| s.close());
        let idle_conns = std::mem::take(&mut inner.idle_conns);
        #[cfg(feature = "logging")]
        tracing::debug!(
            "connection pool closed, dropping {} idle connections",
            idle_conns.values().map(VecDeque::len).sum::<usize>()
        );
        drop(idle_conns);
    }
}

#[cfg(feature = "time")]
struct IdleTask<K, T> {
    tx: local_sync::oneshot::Sender<()>,
    conns: WeakPool<K, T>,
    interval: monoio::time::Interval,
    idle_dur: Duration,
}

#[cfg(feature = "time")]
impl<K, T> std::future::Future for IdleTask<K, T> {
    type Output = ();

    fn poll(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match this.tx.poll_closed(cx) {
                std::task::Poll::Ready(_) => {
                    #[cfg(feature = "logging")]
                    tracing::debug!("pool rx dropped, idle task exit");
                    return std::task::Poll::Ready(());
                }
                std::task::Poll::Pending => (),
            }

            std::task::ready!(this.interval.poll_tick(cx));
            if let Some(inner) = this.conns.upgrade() {
                let inner_mut = unsafe { &mut *inner.get() };
                inner_mut.clear_expired(this.idle_dur);
                #[cfg(feature = "logging")]
                tracing::debug!("pool clear expired");
                continue;
            }
            #[cfg(feature = "logging")]
            tracing::debug!("pool upgrade failed, idle task exit");
            return std::task::Poll::Ready(());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc, time::Duration};

    use super::*;

    #[derive(Debug)]
    struct Conn {
        id: usize,
        open: Rc<Cell<bool>>,
    }

    impl Conn {
        fn new(id: usize) -> Self {
            Self {
                id,
                open: Rc::new(Cell::new(true)),
            }
        }
    }

    impl Poolable for Conn {
        fn is_open(&self) -> bool {
            self.open.get()
        }
    }

    fn pool(max_total: usize, max_per_route: usize) -> ConnectionPool<&'static str, Conn> {
        ConnectionPool::new(
            PoolLimits {
                max_total,
                max_per_route,
            },
            None,
        )
    }

    const WAIT: Option<Duration> = Some(Duration::from_millis(20));

    #[monoio::test(enable_timer = true)]
    async fn lease_is_returned_on_drop() {
        let pool = pool(2, 2);
        let permit = pool.acquire(&"a", WAIT).await.unwrap();
        let lease = pool.link("a", Conn::new(1), permit);
        assert!(!lease.is_reused());
        assert_eq!(pool.stats().leased, 1);
        drop(lease);

        let stats = pool.stats();
        assert_eq!((stats.leased, stats.idle, stats.available), (0, 1, 2));

        let permit = pool.acquire(&"a", WAIT).await.unwrap();
        let conn = pool.pop_idle(&"a").unwrap();
        assert_eq!(conn.id, 1);
        let lease = pool.reuse("a", conn, permit);
        assert!(lease.is_reused());
        assert_eq!(pool.get_idle_connection_count(), 0);
    }

    #[monoio::test(enable_timer = true)]
    async fn closed_connection_is_not_parked() {
        let pool = pool(2, 2);
        let permit = pool.acquire(&"a", WAIT).await.unwrap();
        let conn = Conn::new(1);
        let open = conn.open.clone();
        let lease = pool.link("a", conn, permit);
        open.set(false);
        drop(lease);
        let stats = pool.stats();
        assert_eq!((stats.leased, stats.idle), (0, 0));
    }

    #[monoio::test(enable_timer = true)]
    async fn discard_releases_permit_only() {
        let pool = pool(1, 1);
        let permit = pool.acquire(&"a", WAIT).await.unwrap();
        pool.link("a", Conn::new(1), permit).discard();
        let stats = pool.stats();
        assert_eq!((stats.leased, stats.idle, stats.available), (0, 0, 1));
    }

    #[monoio::test(enable_timer = true)]
    async fn total_limit_blocks_other_routes() {
        let pool = pool(1, 1);
        let permit = pool.acquire(&"a", WAIT).await.unwrap();
        let lease = pool.link("a", Conn::new(1), permit);

        let err = pool.acquire(&"b", WAIT).await.unwrap_err();
        assert_eq!(err, PoolError::Exhausted(Duration::from_millis(20)));

        drop(lease);
        assert!(pool.acquire(&"b", WAIT).await.is_ok());
    }

    #[monoio::test(enable_timer = true)]
    async fn per_route_limit_is_independent() {
        let pool = pool(4, 1);
        let a = pool.acquire(&"a", WAIT).await.unwrap();
        assert!(matches!(
            pool.acquire(&"a", WAIT).await,
            Err(PoolError::Exhausted(_))
        ));
        let b = pool.acquire(&"b", WAIT).await.unwrap();
        assert_eq!(pool.stats().leased, 2);
        drop((a, b));
        assert_eq!(pool.stats().leased, 0);
    }

    #[monoio::test(enable_timer = true)]
    async fn waiter_wakes_when_lease_is_dropped() {
        let pool = pool(1, 1);
        let permit = pool.acquire(&"a", WAIT).await.unwrap();
        let lease = pool.link("a", Conn::new(1), permit);

        let waiter = {
            let pool = pool.clone();
            monoio::spawn(async move { pool.acquire(&"b", Some(Duration::from_secs(5))).await })
        };
        monoio::time::sleep(Duration::from_millis(5)).await;
        drop(lease);
        assert!(waiter.await.is_ok());
    }

    #[monoio::test(enable_timer = true)]
    async fn new_connection_evicts_idle_of_other_route() {
        let pool = pool(1, 1);
        let permit = pool.acquire(&"a", WAIT).await.unwrap();
        drop(pool.link("a", Conn::new(1), permit));
        assert_eq!(pool.get_idle_connection_count(), 1);

        let permit = pool.acquire(&"b", WAIT).await.unwrap();
        assert!(pool.pop_idle(&"b").is_none());
        let lease = pool.link("b", Conn::new(2), permit);
        assert_eq!(pool.get_idle_connection_count(), 0);
        drop(lease);
        assert!(pool.pop_idle(&"b").is_some());
    }

    #[monoio::test(enable_timer = true)]
    async fn close_rejects_leases() {
        let pool = pool(2, 2);
        let permit = pool.acquire(&"a", WAIT).await.unwrap();
        let lease = pool.link("a", Conn::new(1), permit);
        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.acquire(&"a", WAIT).await.unwrap_err(), PoolError::Closed);
        drop(lease);
        assert_eq!(pool.get_idle_connection_count(), 0);
    }

    fn tracked_routes(pool: &ConnectionPool<&'static str, Conn>) -> usize {
        let inner = unsafe { &*pool.shared.get() };
        inner.routes.len()
    }

    #[monoio::test(enable_timer = true)]
    async fn unused_routes_are_forgotten() {
        let pool = pool(4, 1);
        let held = pool.acquire(&"held", WAIT).await.unwrap();
        for route in ["a", "b", "c", "d", "e"] {
            let permit = pool.acquire(&route, WAIT).await.unwrap();
            drop(pool.link(route, Conn::new(1), permit));
            assert!(pool.pop_idle(&route).is_some());
        }
        // "held" has a live permit, "e" was the last one asked for
        assert_eq!(tracked_routes(&pool), 2);
        assert!(unsafe { &*pool.shared.get() }.idle_conns.is_empty());

        drop(held);
        let _permit = pool.acquire(&"a", WAIT).await.unwrap();
        assert_eq!(tracked_routes(&pool), 1);
    }

    #[monoio::test(enable_timer = true)]
    async fn lease_formats_for_debugging() {
        let pool = pool(1, 1);
        let permit = pool.acquire(&"a", WAIT).await.unwrap();
        let lease = pool.link("a", Conn::new(1), permit);
        let rendered = format!("{lease:?}");
        assert!(rendered.contains("\"a\""));
        assert!(rendered.contains("is_open: Some(true)"));
    }

    #[test]
    fn clear_expired_drops_old_entries() {
        let mut inner: PoolInner<&'static str, Conn> = PoolInner::new(PoolLimits::default(), None);
        inner
            .idle_conns
            .entry("a")
            .or_default()
            .push_back(Idle::new(Conn::new(1)));
        inner.clear_expired(Duration::from_secs(60));
        assert_eq!(inner.idle_count(), 1);
        inner.clear_expired(Duration::ZERO);
        assert_eq!(inner.idle_count(), 0);
    }
}
