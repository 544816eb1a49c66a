use std::{fmt::Debug, sync::Arc};

use monoio::io::{AsyncReadRent, AsyncWriteRent};

use super::{Alpn, TransportConnMeta, TransportConnMetadata};

pub type TlsStream<C> = monoio_rustls::ClientTlsStream<C>;

pub use monoio_rustls::TlsConnector as MonoioTlsConnector;
pub use monoio_rustls::TlsError;

pub type ServerName<'a> = rustls::pki_types::ServerName<'a>;

impl<S> TransportConnMetadata for TlsStream<S> {
    type Metadata = TransportConnMeta;

    fn get_conn_metadata(&self) -> Self::Metadata {
        let mut meta = TransportConnMeta::default();
        meta.set_alpn(self.alpn_protocol().as_deref());
        meta
    }
}

/// Runs the client side TLS handshake over an already connected stream.
///
/// The `rustls` configuration either comes from the caller or is built from
/// the webpki root store. ALPN protocols are always set by this connector.
#[derive(Clone)]
pub struct TlsConnector {
    tls_connector: MonoioTlsConnector,
    alpn: Vec<Alpn>,
}

impl Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TlsConnector, alpn: {:?}", self.alpn)
    }
}

impl TlsConnector {
    pub fn new(config: Option<Arc<rustls::ClientConfig>>, alpn: Vec<Alpn>) -> Self {
        let mut cfg = match config {
            Some(cfg) => (*cfg).clone(),
            None => default_client_config(),
        };
        cfg.alpn_protocols = alpn
            .iter()
            .filter_map(Alpn::protocol_id)
            .map(|a| a.as_bytes().to_vec())
            .collect();

        Self {
            tls_connector: cfg.into(),
            alpn,
        }
    }

    #[inline]
    pub fn alpn(&self) -> &[Alpn] {
        &self.alpn
    }

    #[inline]
    pub fn tls_connector(&self) -> &MonoioTlsConnector {
        &self.tls_connector
    }

    #[inline]
    pub async fn handshake<IO>(
        &self,
        server_name: ServerName<'static>,
        stream: IO,
    ) -> Result<TlsStream<IO>, TlsError>
    where
        IO: AsyncReadRent + AsyncWriteRent,
    {
        self.tls_connector.connect(server_name, stream).await
    }
}

impl Default for TlsConnector {
    /// Webpki roots, offering `h2` and `http/1.1`.
    #[inline]
    fn default() -> Self {
        TlsConnector::new(None, vec![Alpn::HTTP2, Alpn::HTTP11])
    }
}

fn default_client_config() -> rustls::ClientConfig {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}
