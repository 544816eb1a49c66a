use std::fmt;

use thiserror::Error as ThisError;

/// Underlying cause of a failed exchange, as reported by the transport stack.
#[derive(ThisError, Debug)]
pub enum TransportError {
    #[error("convert from uri error {0}")]
    FromUri(#[from] FromUriError),
    #[error("io error {0}")]
    Io(#[from] std::io::Error),
    #[error("rustls error {0}")]
    Tls(#[from] monoio_rustls::TlsError),
    #[error("H2 error {0}")]
    H2(#[from] monoio_http::h2::Error),
    #[error("Http crate error {0}")]
    Http(#[from] monoio_http::common::error::HttpError),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("pool error {0}")]
    Pool(#[from] crate::pool::PoolError),
}

#[derive(ThisError, Debug)]
pub enum FromUriError {
    #[error("Invalid dns name {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),
    #[error("Scheme not supported")]
    UnsupportScheme,
    #[error("Missing authority in uri")]
    NoAuthority,
}

/// Coarse classification of a [`TransportFailure`], the one thing callers
/// usually branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    InvalidRoute,
    Connect,
    ConnectTimeout,
    PoolExhausted,
    PoolClosed,
    SocketTimeout,
    Protocol,
    Io,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::InvalidRoute => "invalid route",
            FailureKind::Connect => "connect",
            FailureKind::ConnectTimeout => "connect timeout",
            FailureKind::PoolExhausted => "pool exhausted",
            FailureKind::PoolClosed => "pool closed",
            FailureKind::SocketTimeout => "socket timeout",
            FailureKind::Protocol => "protocol",
            FailureKind::Io => "io",
        };
        f.write_str(name)
    }
}

/// Single failure shape for everything that goes wrong below the request
/// builder: connecting, waiting for a pooled connection, writing or reading.
#[derive(ThisError, Debug)]
#[error("transport failure ({kind}): {source}")]
pub struct TransportFailure {
    kind: FailureKind,
    #[source]
    source: TransportError,
}

impl TransportFailure {
    #[inline]
    pub fn new(kind: FailureKind, source: impl Into<TransportError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    #[inline]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    #[inline]
    pub fn cause(&self) -> &TransportError {
        &self.source
    }

    #[inline]
    pub fn into_cause(self) -> TransportError {
        self.source
    }
}

impl From<FromUriError> for TransportFailure {
    fn from(e: FromUriError) -> Self {
        Self::new(FailureKind::InvalidRoute, e)
    }
}

impl From<crate::pool::PoolError> for TransportFailure {
    fn from(e: crate::pool::PoolError) -> Self {
        let kind = match e {
            crate::pool::PoolError::Exhausted(_) => FailureKind::PoolExhausted,
            crate::pool::PoolError::Closed => FailureKind::PoolClosed,
        };
        Self::new(kind, e)
    }
}

impl From<monoio_http::common::error::HttpError> for TransportFailure {
    fn from(e: monoio_http::common::error::HttpError) -> Self {
        Self::new(FailureKind::Protocol, e)
    }
}

#[derive(ThisError, Debug)]
pub enum EncodingFailure {
    #[error("invalid content type {0:?}")]
    ContentType(String),
    #[error("charset {0} cannot be used to encode a body")]
    Charset(&'static str),
    #[error("serialize body error {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("read file body {path:?} error {source}")]
    File {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(ThisError, Debug)]
pub enum ConversionFailure {
    #[error("json body error {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(ThisError, Debug)]
pub enum ExchangeError {
    #[error("HTTP method {0} is not supported")]
    UnsupportedMethod(String),
    #[error("invalid request {0}")]
    InvalidRequest(String),
    #[error("encoding error {0}")]
    Encoding(#[from] EncodingFailure),
    #[error(transparent)]
    Transport(#[from] TransportFailure),
    #[error("body conversion error {0}")]
    Conversion(#[from] ConversionFailure),
    #[error("response body stream is closed")]
    StreamClosed,
}

impl ExchangeError {
    /// Kind of the transport failure, if this is one.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ExchangeError::Transport(t) => Some(t.kind()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExchangeError>;
