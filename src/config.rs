//! Client configuration as handed over by the outer configuration loader.
//!
//! All structs deserialize with kebab-case keys and fall back to defaults for
//! missing fields, so a partially written configuration is still usable.
use std::{fmt, time::Duration};

use http::Version;
use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_MAX_TOTAL: usize = 25;
pub(crate) const DEFAULT_MAX_PER_ROUTE: usize = 5;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_CONNECTION_REQUEST_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_PROTOCOL_VERSION: &str = "HTTP/1.1";

/// Pool sizing and timeouts. A timeout of `0` disables that timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PoolConfig {
    pub max_connections_total: usize,
    pub max_connections_per_route: usize,
    pub connect_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    pub connection_request_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_total: DEFAULT_MAX_TOTAL,
            max_connections_per_route: DEFAULT_MAX_PER_ROUTE,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            socket_timeout_ms: DEFAULT_SOCKET_TIMEOUT_MS,
            connection_request_timeout_ms: DEFAULT_CONNECTION_REQUEST_TIMEOUT_MS,
        }
    }
}

impl PoolConfig {
    #[inline]
    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }

    #[inline]
    pub fn socket_timeout(&self) -> Option<Duration> {
        millis(self.socket_timeout_ms)
    }

    #[inline]
    pub fn connection_request_timeout(&self) -> Option<Duration> {
        millis(self.connection_request_timeout_ms)
    }
}

/// Transport level request settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TransportConfig {
    pub protocol_version: String,
    pub protocol_upgrade_enabled: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_owned(),
            protocol_upgrade_enabled: true,
        }
    }
}

impl TransportConfig {
    /// The configured protocol version, or HTTP/1.1 when the string cannot be
    /// parsed into a version the transport speaks.
    pub fn http_version(&self) -> Version {
        match parse_version(&self.protocol_version) {
            Some(version) => version,
            None => {
                #[cfg(feature = "logging")]
                tracing::warn!(
                    "unsupported protocol version {:?}, falling back to HTTP/1.1",
                    self.protocol_version
                );
                Version::HTTP_11
            }
        }
    }
}

fn parse_version(s: &str) -> Option<Version> {
    let s = s.trim();
    let (protocol, number) = s.split_once('/')?;
    if !protocol.eq_ignore_ascii_case("HTTP") {
        return None;
    }
    match number {
        "0.9" => Some(Version::HTTP_09),
        "1.0" => Some(Version::HTTP_10),
        "1.1" => Some(Version::HTTP_11),
        "2" | "2.0" => Some(Version::HTTP_2),
        _ => None,
    }
}

/// Everything needed to build a pooled client.
///
/// `transport` is optional: when absent every transport setting keeps its
/// default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClientConfig {
    pub pool: PoolConfig,
    pub transport: Option<TransportConfig>,
}

impl ClientConfig {
    #[inline]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = Some(transport);
        self
    }
}

macro_rules! json_display {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                    f.write_str(&json)
                }
            }
        )*
    };
}

json_display!(PoolConfig, TransportConfig, ClientConfig);

#[inline]
pub(crate) fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
