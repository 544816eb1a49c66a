use http::Response;
use monoio_http::common::body::HttpBody;

use crate::{
    builder::RequestBuilder,
    config::ClientConfig,
    decoder::ResponseDecoder,
    error::{ExchangeError, FailureKind, Result, TransportError, TransportFailure},
    factory::{ClientOverrides, ExchangeClientFactory, HttpLease, HttpPool, PoolOverrides, PooledClient},
    key::Route,
    request::ApiRequest,
    response::{ApiResponse, ClientId, ConvertBody},
    stream::ResponseBodyStream,
};

/// Runs [`ApiRequest`]s over a pooled client.
///
/// Connections live on the runtime thread the engine is used from. Clones
/// share the pool and the id.
#[derive(Clone)]
pub struct ExchangeEngine {
    id: ClientId,
    client: PooledClient,
    builder: RequestBuilder,
    decoder: ResponseDecoder,
}

impl ExchangeEngine {
    #[inline]
    pub fn new(config: ClientConfig) -> Self {
        Self::with_overrides(config, PoolOverrides::default(), ClientOverrides::default())
    }

    pub fn with_overrides(config: ClientConfig, pool: PoolOverrides, client: ClientOverrides) -> Self {
        Self::from_client(ExchangeClientFactory::build(&config, pool, client))
    }

    pub fn from_client(client: PooledClient) -> Self {
        let id = ClientId::next();
        let settings = client.settings();
        Self {
            id,
            builder: RequestBuilder::new(settings.version),
            decoder: ResponseDecoder::new(id, settings.socket_timeout),
            client,
        }
    }

    #[inline]
    pub fn id(&self) -> ClientId {
        self.id
    }

    #[inline]
    pub fn client(&self) -> &PooledClient {
        &self.client
    }

    #[inline]
    pub fn pool(&self) -> &HttpPool {
        self.client.pool()
    }

    /// Close the pool; in-flight exchanges finish, new ones fail.
    pub fn close(&self) {
        self.client.close()
    }

    /// Send `request` and read the whole response body as `U`. The connection
    /// is back in the pool (or closed) when this returns.
    pub async fn exchange<U: ConvertBody>(&self, request: &ApiRequest) -> Result<ApiResponse<U>> {
        let (lease, response) = self.dispatch(request).await?;
        match self.decoder.decode::<U>(request, response).await {
            Ok(decoded) => {
                #[cfg(feature = "logging")]
                tracing::debug!("{} {} -> {}", request.method(), request.uri(), decoded.status());
                drop(lease);
                Ok(decoded)
            }
            Err(e @ ExchangeError::Transport(_)) => {
                lease.discard();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Send `request` and hand the body out unread. The connection stays
    /// leased until the returned stream is closed or dropped.
    pub async fn exchange_stream(&self, request: &ApiRequest) -> Result<ApiResponse<ResponseBodyStream>> {
        let (lease, response) = self.dispatch(request).await?;
        #[cfg(feature = "logging")]
        tracing::debug!(
            "{} {} -> {} (streamed)",
            request.method(),
            request.uri(),
            response.status()
        );
        Ok(self.decoder.decode_stream(response, Box::new(lease)))
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<(HttpLease, Response<HttpBody>)> {
        let wire = self.builder.build(request)?;
        let route = Route::try_from(wire.uri()).map_err(TransportFailure::from)?;
        let mut lease = self.client.lease(route.clone()).await?;
        #[cfg(feature = "logging")]
        tracing::debug!(
            "dispatching {} {} on {} connection to {}",
            wire.method(),
            wire.uri(),
            if lease.is_reused() { "reused" } else { "new" },
            route
        );

        let http_request = wire.into_http(&route, lease.is_h2()).await?;
        let sent = match self.client.settings().socket_timeout {
            Some(timeout) => match monoio::time::timeout(timeout, lease.send_request(http_request)).await {
                Ok(sent) => sent.map_err(TransportFailure::from),
                Err(_) => Err(TransportFailure::new(
                    FailureKind::SocketTimeout,
                    TransportError::Timeout(timeout),
                )),
            },
            None => lease.send_request(http_request).await.map_err(TransportFailure::from),
        };
        match sent {
            Ok(response) => Ok((lease, response)),
            Err(e) => {
                #[cfg(feature = "logging")]
                tracing::error!("exchange with {} failed: {}", route, e);
                lease.discard();
                Err(e.into())
            }
        }
    }
}
