use std::time::Duration;

use super::{ConnectionPool, Key, PoolError, Poolable, Pooled};
use crate::connectors::Connector;

/// PooledConnector is a connector with a connection pool.
///
/// Every connect first waits for a lease slot of the key, then reuses an idle
/// connection or opens a new one with the inner connector.
#[derive(Debug)]
pub struct PooledConnector<C, K, T> {
    transport_connector: C,
    pool: ConnectionPool<K, T>,
    acquire_timeout: Option<Duration>,
}

impl<C, K, T> PooledConnector<C, K, T> {
    #[inline]
    pub const fn new(
        transport_connector: C,
        pool: ConnectionPool<K, T>,
        acquire_timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport_connector,
            pool,
            acquire_timeout,
        }
    }

    #[inline]
    pub fn transport_connector(&self) -> &C {
        &self.transport_connector
    }

    #[inline]
    pub fn pool(&self) -> &ConnectionPool<K, T> {
        &self.pool
    }

    #[inline]
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout
    }
}

impl<C: Clone, K, T> Clone for PooledConnector<C, K, T> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            transport_connector: self.transport_connector.clone(),
            pool: self.pool.clone(),
            acquire_timeout: self.acquire_timeout,
        }
    }
}

impl<C, K: Key, T: Poolable> Connector<K> for PooledConnector<C, K, T>
where
    C: Connector<K, Connection = T>,
    C::Error: From<PoolError>,
{
    type Connection = Pooled<K, T>;
    type Error = C::Error;

    async fn connect(&self, key: K) -> Result<Self::Connection, Self::Error> {
        let permit = self.pool.acquire(&key, self.acquire_timeout).await?;
        if let Some(conn) = self.pool.pop_idle(&key) {
            return Ok(self.pool.reuse(key, conn, permit));
        }
        // the permit is held while connecting, a failed connect gives it back
        let io = self.transport_connector.connect(key.clone()).await?;
        Ok(self.pool.link(key, io, permit))
    }
}
