use std::{str::FromStr, time::Duration};

use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use http::{header::CONTENT_TYPE, HeaderMap, Response};
use monoio_http::common::body::{Body, HttpBody};

use crate::{
    error::{ExchangeError, FailureKind, TransportError, TransportFailure},
    request::{ApiRequest, Headers},
    response::{ApiResponse, ClientId, ConvertBody},
    stream::{Lease, ResponseBodyStream},
};

/// Turns a wire response into an [`ApiResponse`].
#[derive(Debug, Clone, Copy)]
pub struct ResponseDecoder {
    client: ClientId,
    read_timeout: Option<Duration>,
}

impl ResponseDecoder {
    #[inline]
    pub const fn new(client: ClientId, read_timeout: Option<Duration>) -> Self {
        Self {
            client,
            read_timeout,
        }
    }

    /// Read the whole body, decode it as text and convert it to `U`.
    pub async fn decode<U: ConvertBody>(
        &self,
        request: &ApiRequest,
        response: Response<HttpBody>,
    ) -> Result<ApiResponse<U>, ExchangeError> {
        let (parts, mut body) = response.into_parts();
        let headers = Headers::from(&parts.headers);

        let mut data = BytesMut::new();
        while let Some(chunk) = read_chunk(&mut body, self.read_timeout).await? {
            data.extend_from_slice(&chunk);
        }
        let (text, _) = charset(&parts.headers).decode_with_bom_removal(&data);
        let converted = U::convert(request, &headers, text.into_owned())?;

        Ok(ApiResponse::new(parts.status, headers, converted, self.client))
    }

    /// Keep the body unread; it is consumed through the returned stream,
    /// which owns `lease` until it is closed.
    pub fn decode_stream(
        &self,
        response: Response<HttpBody>,
        lease: Box<dyn Lease>,
    ) -> ApiResponse<ResponseBodyStream> {
        let (parts, body) = response.into_parts();
        let headers = Headers::from(&parts.headers);
        let stream = ResponseBodyStream::new(body, lease, self.read_timeout);
        ApiResponse::new(parts.status, headers, stream, self.client)
    }
}

/// Next non-empty body chunk, `None` at the end of the body.
pub(crate) async fn read_chunk(
    body: &mut HttpBody,
    read_timeout: Option<Duration>,
) -> Result<Option<Bytes>, TransportFailure> {
    loop {
        let next = match read_timeout {
            Some(timeout) => monoio::time::timeout(timeout, body.next_data())
                .await
                .map_err(|_| {
                    TransportFailure::new(
                        FailureKind::SocketTimeout,
                        TransportError::Timeout(timeout),
                    )
                })?,
            None => body.next_data().await,
        };
        match next {
            Some(Ok(chunk)) if chunk.is_empty() => continue,
            Some(Ok(chunk)) => return Ok(Some(chunk)),
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(None),
        }
    }
}

/// Charset declared by the response `Content-Type`, UTF-8 when absent or
/// unknown.
pub fn charset(headers: &HeaderMap) -> &'static Encoding {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| mime::Mime::from_str(v).ok())
        .and_then(|m| {
            m.get_param(mime::CHARSET)
                .and_then(|c| Encoding::for_label(c.as_str().as_bytes()))
        })
        .unwrap_or(UTF_8)
}
