use std::io;

use monoio::{
    buf::{IoBuf, IoBufMut, IoVecBuf, IoVecBufMut},
    io::{AsyncReadRent, AsyncWriteRent, Split},
    net::TcpStream,
    BufResult,
};
use thiserror::Error as ThisError;

use super::{
    Connector, TcpConnector, TlsConnector, TlsError, TlsStream, TransportConnMeta,
    TransportConnMetadata,
};
use crate::{key::Route, FromUriError};

/// Connects a [`Route`]: plain TCP for `http`, TCP plus TLS for `https`.
#[derive(Default, Clone, Debug)]
pub struct RouteConnector {
    tcp: TcpConnector,
    tls: TlsConnector,
}

impl RouteConnector {
    #[inline]
    pub const fn new(tcp: TcpConnector, tls: TlsConnector) -> Self {
        Self { tcp, tls }
    }

    #[inline]
    pub fn tls_connector(&self) -> &TlsConnector {
        &self.tls
    }
}

pub enum RouteStream {
    Plain(TcpStream),
    Tls(TlsStream<TcpStream>),
}

impl std::fmt::Debug for RouteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => write!(f, "Plain"),
            Self::Tls(_) => write!(f, "Tls"),
        }
    }
}

#[derive(ThisError, Debug)]
pub enum RouteConnectError {
    #[error("L4 connect error {0}")]
    L4(#[from] io::Error),
    #[error("TLS connect error {0}")]
    Tls(#[from] TlsError),
    #[error("server name error {0}")]
    ServerName(#[from] FromUriError),
}

impl<'a> Connector<&'a Route> for RouteConnector {
    type Connection = RouteStream;
    type Error = RouteConnectError;

    async fn connect(&self, route: &'a Route) -> Result<Self::Connection, Self::Error> {
        let stream = self.tcp.connect(route).await?;
        if !route.tls {
            return Ok(RouteStream::Plain(stream));
        }
        let sn = route.server_name()?;
        let tls_stream = self.tls.handshake(sn, stream).await?;
        Ok(RouteStream::Tls(tls_stream))
    }
}

impl TransportConnMetadata for RouteStream {
    type Metadata = TransportConnMeta;

    fn get_conn_metadata(&self) -> Self::Metadata {
        match self {
            RouteStream::Plain(s) => s.get_conn_metadata(),
            RouteStream::Tls(s) => s.get_conn_metadata(),
        }
    }
}

impl AsyncReadRent for RouteStream {
    #[inline]
    async fn read<T: IoBufMut>(&mut self, buf: T) -> BufResult<usize, T> {
        match self {
            RouteStream::Plain(s) => s.read(buf).await,
            RouteStream::Tls(s) => s.read(buf).await,
        }
    }

    #[inline]
    async fn readv<T: IoVecBufMut>(&mut self, buf: T) -> BufResult<usize, T> {
        match self {
            RouteStream::Plain(s) => s.readv(buf).await,
            RouteStream::Tls(s) => s.readv(buf).await,
        }
    }
}

impl AsyncWriteRent for RouteStream {
    #[inline]
    async fn write<T: IoBuf>(&mut self, buf: T) -> BufResult<usize, T> {
        match self {
            RouteStream::Plain(s) => s.write(buf).await,
            RouteStream::Tls(s) => s.write(buf).await,
        }
    }

    #[inline]
    async fn writev<T: IoVecBuf>(&mut self, buf_vec: T) -> BufResult<usize, T> {
        match self {
            RouteStream::Plain(s) => s.writev(buf_vec).await,
            RouteStream::Tls(s) => s.writev(buf_vec).await,
        }
    }

    #[inline]
    async fn flush(&mut self) -> io::Result<()> {
        match self {
            RouteStream::Plain(s) => s.flush().await,
            RouteStream::Tls(s) => s.flush().await,
        }
    }

    #[inline]
    async fn shutdown(&mut self) -> io::Result<()> {
        match self {
            RouteStream::Plain(s) => s.shutdown().await,
            RouteStream::Tls(s) => s.shutdown().await,
        }
    }
}

unsafe impl Split for RouteStream {}
