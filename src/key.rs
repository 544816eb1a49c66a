use std::{fmt, io, net::ToSocketAddrs};

use http::{uri::Scheme, Uri};
use smol_str::SmolStr;

use crate::{connectors::ServerName, FromUriError};

/// Pool key: connections are only shared between requests with the same
/// route.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Route {
    pub host: SmolStr,
    pub port: u16,
    pub tls: bool,
}

impl Route {
    #[inline]
    pub fn new(host: impl Into<SmolStr>, port: u16, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            tls,
        }
    }

    #[inline]
    pub fn scheme(&self) -> Scheme {
        if self.tls {
            Scheme::HTTPS
        } else {
            Scheme::HTTP
        }
    }

    /// Value for the `Host` header, the port omitted when it is the scheme's
    /// default.
    pub fn authority(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.host.to_string()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn server_name(&self) -> Result<ServerName<'static>, FromUriError> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        Ok(ServerName::try_from(host.to_string())?)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme(), self.host, self.port)
    }
}

impl ToSocketAddrs for Route {
    type Iter = std::vec::IntoIter<std::net::SocketAddr>;

    #[inline]
    fn to_socket_addrs(&self) -> io::Result<Self::Iter> {
        let host = self.host.trim_start_matches('[').trim_end_matches(']');
        (host, self.port).to_socket_addrs()
    }
}

impl TryFrom<&Uri> for Route {
    type Error = FromUriError;

    fn try_from(uri: &Uri) -> Result<Self, Self::Error> {
        let host = match uri.host() {
            Some(a) => a,
            None => return Err(FromUriError::NoAuthority),
        };

        let (tls, default_port) = match uri.scheme() {
            Some(scheme) if scheme == &Scheme::HTTP => (false, 80),
            Some(scheme) if scheme == &Scheme::HTTPS => (true, 443),
            _ => return Err(FromUriError::UnsupportScheme),
        };
        let port = uri.port_u16().unwrap_or(default_port);
        Ok(Route::new(host, port, tls))
    }
}

impl TryFrom<Uri> for Route {
    type Error = FromUriError;

    #[inline]
    fn try_from(value: Uri) -> Result<Self, Self::Error> {
        Self::try_from(&value)
    }
}
