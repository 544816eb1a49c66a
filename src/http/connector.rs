use std::{sync::Arc, time::Duration};

use http::Version;
use monoio_http::h1::codec::ClientCodec;

use super::connection::{Http1Connection, Http2Connection, HttpConnection};
use crate::{
    connectors::{
        Alpn, Connector, ConnectorExt, RouteConnectError, RouteConnector, RouteStream,
        TcpConnector, TlsConnector, TransportConnMetadata,
    },
    error::{FailureKind, TransportError, TransportFailure},
    key::Route,
};

/// Opens HTTP connections to a [`Route`].
///
/// TLS routes speak whatever ALPN settled on; plain routes speak HTTP/2 only
/// when the configured version asks for it (prior knowledge).
#[derive(Clone, Debug)]
pub struct HttpConnector {
    inner_connector: RouteConnector,
    version: Version,
    connect_timeout: Option<Duration>,
}

impl HttpConnector {
    pub fn new(
        tcp: TcpConnector,
        tls_config: Option<Arc<rustls::ClientConfig>>,
        version: Version,
        protocol_upgrade_enabled: bool,
        connect_timeout: Option<Duration>,
    ) -> Self {
        let tls = TlsConnector::new(tls_config, alpn_offer(version, protocol_upgrade_enabled));
        Self {
            inner_connector: RouteConnector::new(tcp, tls),
            version,
            connect_timeout,
        }
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    #[inline]
    pub fn alpn(&self) -> &[Alpn] {
        self.inner_connector.tls_connector().alpn()
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new(TcpConnector::default(), None, Version::HTTP_11, true, None)
    }
}

/// Protocols offered in the TLS handshake.
pub(crate) fn alpn_offer(version: Version, protocol_upgrade_enabled: bool) -> Vec<Alpn> {
    if protocol_upgrade_enabled || version == Version::HTTP_2 {
        vec![Alpn::HTTP2, Alpn::HTTP11]
    } else {
        vec![Alpn::HTTP11]
    }
}

impl From<RouteConnectError> for TransportFailure {
    fn from(e: RouteConnectError) -> Self {
        match e {
            RouteConnectError::L4(e) => TransportFailure::new(FailureKind::Connect, e),
            RouteConnectError::Tls(e) => TransportFailure::new(FailureKind::Connect, e),
            RouteConnectError::ServerName(e) => TransportFailure::new(FailureKind::InvalidRoute, e),
        }
    }
}

impl Connector<Route> for HttpConnector {
    type Connection = HttpConnection<RouteStream>;
    type Error = TransportFailure;

    async fn connect(&self, route: Route) -> Result<Self::Connection, Self::Error> {
        let io = match self.connect_timeout {
            Some(timeout) => self
                .inner_connector
                .connect_with_timeout(&route, timeout)
                .await
                .map_err(|_| {
                    TransportFailure::new(
                        FailureKind::ConnectTimeout,
                        TransportError::Timeout(timeout),
                    )
                })?,
            None => self.inner_connector.connect(&route).await,
        }?;

        let h2 = match &io {
            RouteStream::Tls(_) => io.get_conn_metadata().is_alpn_h2(),
            RouteStream::Plain(_) => self.version == Version::HTTP_2,
        };
        #[cfg(feature = "logging")]
        tracing::debug!("connected to {}, h2: {}", route, h2);

        if !h2 {
            return Ok(Http1Connection::new(ClientCodec::new(io)).into());
        }
        let (tx, conn) = monoio_http::h2::client::handshake(io)
            .await
            .map_err(|e| TransportFailure::new(FailureKind::Protocol, e))?;
        monoio::spawn(async move {
            if let Err(_e) = conn.await {
                #[cfg(feature = "logging")]
                tracing::debug!("h2 connection closed with error {:?}", _e);
            }
        });
        Ok(Http2Connection::new(tx).into())
    }
}
