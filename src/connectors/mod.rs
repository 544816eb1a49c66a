mod l4_connector;
mod route_connector;
mod tls_connector;

use std::{future::Future, time::Duration};

pub use l4_connector::*;
pub use route_connector::*;
pub use tls_connector::*;

pub trait Connector<K> {
    type Connection;
    type Error;

    fn connect(&self, key: K) -> impl Future<Output = Result<Self::Connection, Self::Error>>;
}

pub trait ConnectorExt<K>: Connector<K> {
    fn connect_with_timeout(
        &self,
        key: K,
        timeout: Duration,
    ) -> impl Future<Output = Result<Result<Self::Connection, Self::Error>, monoio::time::error::Elapsed>>;
}

impl<K, T: Connector<K>> ConnectorExt<K> for T {
    #[inline]
    fn connect_with_timeout(
        &self,
        key: K,
        timeout: Duration,
    ) -> impl Future<Output = Result<Result<Self::Connection, Self::Error>, monoio::time::error::Elapsed>>
    {
        monoio::time::timeout(timeout, self.connect(key))
    }
}

/// `TransportConnMetadata` is a trait that provides additional information about the connection.
///
/// The HTTP connector reads it to find out which protocol TLS negotiated.
pub trait TransportConnMetadata {
    type Metadata;

    fn get_conn_metadata(&self) -> Self::Metadata;
}

#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Alpn {
    HTTP2,
    HTTP11,
    #[default]
    None,
}

impl Alpn {
    #[inline]
    pub const fn protocol_id(&self) -> Option<&'static str> {
        match self {
            Alpn::HTTP2 => Some("h2"),
            Alpn::HTTP11 => Some("http/1.1"),
            Alpn::None => None,
        }
    }
}

/// `TransportConnMeta` holds metadata for a transport connection.
/// It currently only holds the `Alpn` protocol.
#[derive(Default, Copy, Clone, Debug)]
pub struct TransportConnMeta {
    alpn: Alpn,
}

impl TransportConnMeta {
    pub fn set_alpn(&mut self, alpn: Option<&[u8]>) {
        self.alpn = match alpn {
            Some(b"h2") => Alpn::HTTP2,
            Some(b"http/1.1") => Alpn::HTTP11,
            _ => Alpn::None,
        }
    }

    #[inline]
    pub fn alpn(&self) -> Alpn {
        self.alpn
    }

    #[inline]
    pub fn is_alpn_h2(&self) -> bool {
        matches!(self.alpn, Alpn::HTTP2)
    }
}
