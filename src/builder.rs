use http::{
    header::{CONTENT_LENGTH, CONTENT_TYPE, HOST},
    HeaderMap, HeaderName, HeaderValue, Method, Request, Uri, Version,
};
use crate::{
    entity::{EntityBody, EntityCodec, WireEntity},
    error::ExchangeError,
    key::Route,
    request::ApiRequest,
};

/// Maps an [`ApiRequest`] onto the wire request sent by the pooled client.
#[derive(Debug, Clone, Copy)]
pub struct RequestBuilder {
    version: Version,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new(Version::HTTP_11)
    }
}

impl RequestBuilder {
    #[inline]
    pub const fn new(version: Version) -> Self {
        Self { version }
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn build(&self, request: &ApiRequest) -> Result<WireRequest, ExchangeError> {
        let method = wire_method(request.method())?;

        let mut headers = HeaderMap::with_capacity(request.headers().len());
        for (name, value) in request.headers().iter() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ExchangeError::InvalidRequest(format!("header name {name:?}")))?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                ExchangeError::InvalidRequest(format!("value of header {name}"))
            })?;
            headers.append(name, value);
        }

        let entity = request
            .body()
            .map(|body| EntityCodec::encode(body, request.content_type(), request.charset()))
            .transpose()?;

        Ok(WireRequest {
            method,
            uri: request.uri().clone(),
            version: self.version,
            headers,
            entity,
        })
    }
}

fn wire_method(method: &Method) -> Result<Method, ExchangeError> {
    match *method {
        Method::GET
        | Method::POST
        | Method::PUT
        | Method::DELETE
        | Method::PATCH
        | Method::HEAD
        | Method::OPTIONS
        | Method::TRACE => Ok(method.clone()),
        _ => Err(ExchangeError::UnsupportedMethod(method.as_str().to_owned())),
    }
}

/// A built request, not yet bound to a connection.
#[derive(Debug)]
pub struct WireRequest {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    entity: Option<WireEntity>,
}

impl WireRequest {
    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn entity(&self) -> Option<&WireEntity> {
        self.entity.as_ref()
    }

    /// Produce the request for a connection to `route`. HTTP/1.x gets an
    /// origin-form target and a `Host` header, h2 keeps the absolute URI.
    /// A connection that settled on HTTP/1 is spoken to as HTTP/1.1 whatever
    /// newer version was configured.
    pub async fn into_http(self, route: &Route, h2: bool) -> Result<Request<EntityBody>, ExchangeError> {
        let WireRequest {
            method,
            uri,
            version,
            mut headers,
            entity,
        } = self;

        let (uri, version) = if h2 {
            (uri, Version::HTTP_2)
        } else {
            if !headers.contains_key(HOST) {
                let host = HeaderValue::from_str(&route.authority())
                    .map_err(|_| ExchangeError::InvalidRequest(format!("host {}", route.host)))?;
                headers.insert(HOST, host);
            }
            let target = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
            let origin = target
                .parse::<Uri>()
                .map_err(|_| ExchangeError::InvalidRequest(format!("target {target:?}")))?;
            let version = match version {
                Version::HTTP_2 | Version::HTTP_3 => Version::HTTP_11,
                v => v,
            };
            (origin, version)
        };

        let body = match entity {
            Some(entity) => {
                // a declared type carries the request charset now, so it
                // replaces the header it came from
                if entity.content_type().is_some() || !headers.contains_key(CONTENT_TYPE) {
                    let content_type = entity.effective_content_type();
                    if let Ok(value) = HeaderValue::from_str(content_type.as_ref()) {
                        headers.insert(CONTENT_TYPE, value);
                    }
                }
                let (body, len) = entity.into_body().await?;
                headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
                body
            }
            None => EntityBody::Empty,
        };

        let mut request = Request::new(body);
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.version_mut() = version;
        *request.headers_mut() = headers;
        Ok(request)
    }
}
