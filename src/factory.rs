//! Builds pooled clients out of [`ClientConfig`].
use std::{sync::Arc, time::Duration};

use http::Version;

use crate::{
    config::{ClientConfig, PoolConfig, TransportConfig},
    connectors::{Connector, RouteStream, TcpConnector},
    error::TransportFailure,
    http::{HttpConnection, HttpConnector},
    key::Route,
    pool::{ConnectionPool, PoolLimits, PoolStats, Pooled, PooledConnector},
};

pub type HttpPool = ConnectionPool<Route, HttpConnection<RouteStream>>;
pub type HttpLease = Pooled<Route, HttpConnection<RouteStream>>;

/// Adjustments applied to the pool before it is built. Unset fields keep the
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct PoolOverrides {
    /// TLS client configuration, e.g. with custom roots or client auth.
    /// ALPN protocols are always set by the connector.
    pub tls: Option<Arc<rustls::ClientConfig>>,
    pub no_delay: Option<bool>,
    /// Idle connections older than this are evicted periodically.
    pub idle_timeout: Option<Duration>,
    pub max_idle_per_route: Option<usize>,
}

impl PoolOverrides {
    pub fn with_tls(mut self, tls: Arc<rustls::ClientConfig>) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = Some(no_delay);
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    pub fn with_max_idle_per_route(mut self, max_idle: usize) -> Self {
        self.max_idle_per_route = Some(max_idle);
        self
    }

    /// Fields set in `other` win.
    fn merge(self, other: PoolOverrides) -> Self {
        Self {
            tls: other.tls.or(self.tls),
            no_delay: other.no_delay.or(self.no_delay),
            idle_timeout: other.idle_timeout.or(self.idle_timeout),
            max_idle_per_route: other.max_idle_per_route.or(self.max_idle_per_route),
        }
    }
}

/// Adjustments applied to the client settings after the configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientOverrides {
    /// How long to wait for a lease; `Duration::ZERO` waits forever.
    pub request_timeout: Option<Duration>,
    pub protocol_upgrade_enabled: Option<bool>,
    pub protocol_version: Option<Version>,
}

/// Settings every exchange of a client runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    pub request_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub socket_timeout: Option<Duration>,
    pub protocol_upgrade_enabled: bool,
    pub version: Version,
}

impl ClientSettings {
    fn resolve(pool: &PoolConfig, transport: Option<&TransportConfig>, overrides: ClientOverrides) -> Self {
        let defaults = TransportConfig::default();
        let transport = transport.unwrap_or(&defaults);
        let request_timeout = match overrides.request_timeout {
            Some(Duration::ZERO) => None,
            Some(timeout) => Some(timeout),
            None => pool.connection_request_timeout(),
        };
        Self {
            request_timeout,
            connect_timeout: pool.connect_timeout(),
            socket_timeout: pool.socket_timeout(),
            protocol_upgrade_enabled: overrides
                .protocol_upgrade_enabled
                .unwrap_or(transport.protocol_upgrade_enabled),
            version: overrides
                .protocol_version
                .unwrap_or_else(|| transport.http_version()),
        }
    }
}

pub struct ConnectionPoolFactory;

impl ConnectionPoolFactory {
    #[inline]
    pub fn builder(config: &PoolConfig) -> PoolBuilder {
        PoolBuilder {
            config: config.clone(),
            overrides: PoolOverrides::default(),
        }
    }

    /// Pool plus client with default transport settings.
    pub fn build(config: &PoolConfig, overrides: PoolOverrides) -> PooledClient {
        let settings = ClientSettings::resolve(config, None, ClientOverrides::default());
        Self::builder(config).customize(overrides).build().into_client(settings)
    }
}

/// In-progress pool, open to [`PoolOverrides`] until built.
#[derive(Debug, Clone)]
pub struct PoolBuilder {
    config: PoolConfig,
    overrides: PoolOverrides,
}

impl PoolBuilder {
    pub fn customize(mut self, overrides: PoolOverrides) -> Self {
        self.overrides = self.overrides.merge(overrides);
        self
    }

    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn build(self) -> ConnectionManager {
        let limits = PoolLimits {
            max_total: self.config.max_connections_total,
            max_per_route: self.config.max_connections_per_route,
        };
        let max_idle = self.overrides.max_idle_per_route;
        #[cfg(feature = "time")]
        let pool = ConnectionPool::new_with_idle_interval(limits, self.overrides.idle_timeout, max_idle);
        #[cfg(not(feature = "time"))]
        let pool = ConnectionPool::new(limits, max_idle);
        #[cfg(feature = "logging")]
        tracing::debug!("connection pool built with {}", self.config);

        ConnectionManager {
            pool,
            tcp: TcpConnector {
                no_delay: self.overrides.no_delay.unwrap_or(true),
            },
            tls: self.overrides.tls,
        }
    }
}

/// The live pool and what is needed to open connections into it.
pub struct ConnectionManager {
    pool: HttpPool,
    tcp: TcpConnector,
    tls: Option<Arc<rustls::ClientConfig>>,
}

impl ConnectionManager {
    #[inline]
    pub fn pool(&self) -> &HttpPool {
        &self.pool
    }

    pub fn into_client(self, settings: ClientSettings) -> PooledClient {
        let connector = HttpConnector::new(
            self.tcp,
            self.tls,
            settings.version,
            settings.protocol_upgrade_enabled,
            settings.connect_timeout,
        );
        PooledClient {
            connector: PooledConnector::new(connector, self.pool, settings.request_timeout),
            settings,
        }
    }
}

pub struct ExchangeClientFactory;

impl ExchangeClientFactory {
    pub fn build(config: &ClientConfig, pool: PoolOverrides, client: ClientOverrides) -> PooledClient {
        let manager = ConnectionPoolFactory::builder(&config.pool).customize(pool).build();
        let settings = ClientSettings::resolve(&config.pool, config.transport.as_ref(), client);
        #[cfg(feature = "logging")]
        tracing::debug!("exchange client settings {:?}", settings);
        manager.into_client(settings)
    }
}

/// Pooled HTTP client. Clones share the pool.
#[derive(Clone)]
pub struct PooledClient {
    connector: PooledConnector<HttpConnector, Route, HttpConnection<RouteStream>>,
    settings: ClientSettings,
}

impl PooledClient {
    #[inline]
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    #[inline]
    pub fn pool(&self) -> &HttpPool {
        self.connector.pool()
    }

    #[inline]
    pub fn stats(&self) -> PoolStats {
        self.pool().stats()
    }

    /// Lease a connection to `route`, waiting at most the request timeout for
    /// a free slot.
    #[inline]
    pub async fn lease(&self, route: Route) -> Result<HttpLease, TransportFailure> {
        self.connector.connect(route).await
    }

    pub fn close(&self) {
        self.pool().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::Alpn;

    #[test]
    fn settings_follow_config_then_overrides() {
        let pool = PoolConfig {
            connection_request_timeout_ms: 1500,
            ..Default::default()
        };
        let transport = TransportConfig {
            protocol_version: "HTTP/2".into(),
            protocol_upgrade_enabled: false,
        };

        let settings = ClientSettings::resolve(&pool, Some(&transport), ClientOverrides::default());
        assert_eq!(settings.request_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(settings.version, Version::HTTP_2);
        assert!(!settings.protocol_upgrade_enabled);

        let settings = ClientSettings::resolve(
            &pool,
            Some(&transport),
            ClientOverrides {
                request_timeout: Some(Duration::ZERO),
                protocol_upgrade_enabled: Some(true),
                protocol_version: Some(Version::HTTP_10),
            },
        );
        assert_eq!(settings.request_timeout, None);
        assert_eq!(settings.version, Version::HTTP_10);
        assert!(settings.protocol_upgrade_enabled);
    }

    #[test]
    fn missing_transport_uses_defaults() {
        let settings = ClientSettings::resolve(&PoolConfig::default(), None, ClientOverrides::default());
        assert_eq!(settings.version, Version::HTTP_11);
        assert!(settings.protocol_upgrade_enabled);
        assert_eq!(settings.connect_timeout, Some(Duration::from_millis(5000)));
        assert_eq!(settings.socket_timeout, Some(Duration::from_millis(30000)));
    }

    #[test]
    fn later_pool_overrides_win() {
        let builder = ConnectionPoolFactory::builder(&PoolConfig::default())
            .customize(PoolOverrides::default().with_no_delay(false).with_max_idle_per_route(2))
            .customize(PoolOverrides::default().with_no_delay(true));
        assert_eq!(builder.overrides.no_delay, Some(true));
        assert_eq!(builder.overrides.max_idle_per_route, Some(2));
    }

    #[monoio::test(enable_timer = true)]
    async fn built_client_carries_limits() {
        let config = ClientConfig {
            pool: PoolConfig {
                max_connections_total: 3,
                max_connections_per_route: 1,
                ..Default::default()
            },
            transport: Some(TransportConfig {
                protocol_version: "HTTP/1.1".into(),
                protocol_upgrade_enabled: false,
            }),
        };
        let client = ExchangeClientFactory::build(
            &config,
            PoolOverrides::default(),
            ClientOverrides::default(),
        );
        let stats = client.stats();
        assert_eq!(stats.limits, PoolLimits { max_total: 3, max_per_route: 1 });
        assert_eq!((stats.leased, stats.idle, stats.available), (0, 0, 3));
        assert_eq!(client.connector.transport_connector().alpn(), [Alpn::HTTP11]);

        client.close();
        assert!(client.pool().is_closed());
    }
}
