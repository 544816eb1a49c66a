use bytes::Bytes;
use http::{header::CONNECTION, HeaderMap, Response, Version};
use monoio::io::{
    sink::{Sink, SinkExt},
    stream::Stream,
    AsyncReadRent, AsyncWriteRent,
};
use monoio_http::{
    common::{
        body::{Body, HttpBody},
        error::HttpError,
        request::{Request, RequestHead},
        IntoParts,
    },
    h1::{
        codec::{
            decoder::{DecodeError, PayloadDecoder},
            ClientCodec,
        },
        payload::{fixed_payload_pair, stream_payload_pair, Payload},
    },
    h2::client::SendRequest,
};

use crate::pool::Poolable;

/// HTTP/1.x connection. The response payload is drained into memory before
/// `send_request` returns, so the connection is ready for the next exchange
/// as soon as the caller lets go of the lease.
pub struct Http1Connection<IO: AsyncWriteRent> {
    framed: ClientCodec<IO>,
    // set while an exchange is in flight, stays set if it was abandoned
    using: bool,
    open: bool,
}

impl<IO: AsyncWriteRent> Http1Connection<IO> {
    pub fn new(framed: ClientCodec<IO>) -> Self {
        Self {
            framed,
            using: false,
            open: true,
        }
    }
}

impl<IO: AsyncWriteRent> Poolable for Http1Connection<IO> {
    #[inline]
    fn is_open(&self) -> bool {
        self.open && !self.using
    }
}

impl<IO: AsyncReadRent + AsyncWriteRent> Http1Connection<IO> {
    pub async fn send_request<R, E>(&mut self, request: R) -> Result<Response<HttpBody>, HttpError>
    where
        ClientCodec<IO>: Sink<R, Error = E>,
        E: std::fmt::Debug + Into<HttpError>,
    {
        self.using = true;
        let handle = &mut self.framed;

        if let Err(e) = handle.send_and_flush(request).await {
            #[cfg(feature = "logging")]
            tracing::error!("send upstream request error {:?}", e);
            self.open = false;
            return Err(e.into());
        }

        let resp = match handle.next().await {
            Some(Ok(resp)) => resp,
            Some(Err(e)) => {
                #[cfg(feature = "logging")]
                tracing::error!("decode upstream response error {:?}", e);
                self.open = false;
                return Err(e);
            }
            None => {
                #[cfg(feature = "logging")]
                tracing::error!("upstream return eof");
                self.open = false;
                return Err(DecodeError::UnexpectedEof.into());
            }
        };

        let (parts, payload_decoder) = resp.into_parts();
        if !keep_alive(parts.version, &parts.headers) {
            self.open = false;
        }
        let payload = match payload_decoder {
            PayloadDecoder::None => Payload::None,
            PayloadDecoder::Fixed(_) => {
                let mut framed_payload = payload_decoder.with_io(handle);
                let (payload, payload_sender) = fixed_payload_pair();
                if let Some(data) = framed_payload.next_data().await {
                    if data.is_err() {
                        self.open = false;
                    }
                    payload_sender.feed(data)
                }
                Payload::Fixed(payload)
            }
            PayloadDecoder::Streamed(_) => {
                let mut framed_payload = payload_decoder.with_io(handle);
                let (payload, mut payload_sender) = stream_payload_pair();
                loop {
                    match framed_payload.next_data().await {
                        Some(Ok(data)) => payload_sender.feed_data(Some(data)),
                        Some(Err(e)) => {
                            #[cfg(feature = "logging")]
                            tracing::error!("decode upstream response error {:?}", e);
                            self.open = false;
                            return Err(e);
                        }
                        None => {
                            payload_sender.feed_data(None);
                            break;
                        }
                    }
                }
                Payload::Stream(payload)
            }
        };
        self.using = false;
        Ok(Response::from_parts(parts, payload.into()))
    }
}

/// Whether the peer lets the connection live past this response.
fn keep_alive(version: Version, headers: &HeaderMap) -> bool {
    let has_token = |token: &str| {
        headers.get_all(CONNECTION).iter().any(|v| {
            v.to_str()
                .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
                .unwrap_or(false)
        })
    };
    match version {
        Version::HTTP_09 => false,
        Version::HTTP_10 => has_token("keep-alive"),
        _ => !has_token("close"),
    }
}

#[derive(Clone, Debug)]
pub struct Http2Connection {
    tx: SendRequest<Bytes>,
}

impl Poolable for Http2Connection {
    #[inline]
    fn is_open(&self) -> bool {
        !self.tx.has_conn_error()
    }
}

impl Http2Connection {
    pub fn new(tx: SendRequest<Bytes>) -> Self {
        Self { tx }
    }

    pub fn conn_error(&self) -> Option<HttpError> {
        self.tx.conn_error()
    }

    pub async fn send_request<R>(&mut self, request: R) -> Result<Response<HttpBody>, HttpError>
    where
        R: IntoParts<Parts = RequestHead>,
        R::Body: Body<Data = Bytes, Error = HttpError>,
    {
        let mut client = self.tx.clone().ready().await?;

        let (parts, mut body) = request.into_parts();
        let h2_request = Request::from_parts(parts, ());

        let (response, mut send_stream) = client.send_request(h2_request, false)?;

        while let Some(data) = body.next_data().await {
            match data {
                Ok(data) => {
                    if let Err(e) = send_stream.send_data(data, false) {
                        #[cfg(feature = "logging")]
                        tracing::error!("H2 client body send error {:?}", e);
                        return Err(e.into());
                    }
                }
                Err(e) => {
                    #[cfg(feature = "logging")]
                    tracing::error!("H2 request body stream error {:?}", e);
                    return Err(e);
                }
            }
        }
        // Mark end of stream
        let _ = send_stream.send_data(Bytes::new(), true);

        let response = match response.await {
            Ok(response) => response,
            Err(e) => {
                #[cfg(feature = "logging")]
                tracing::error!("H2 client response error {:?}", e);
                return Err(e.into());
            }
        };

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, body.into()))
    }
}

/// A pooled connection speaking either HTTP/1.x or HTTP/2.
pub enum HttpConnection<IO: AsyncWriteRent> {
    Http1(Http1Connection<IO>),
    Http2(Http2Connection),
}

impl<IO: AsyncWriteRent> Poolable for HttpConnection<IO> {
    #[inline]
    fn is_open(&self) -> bool {
        match self {
            Self::Http1(conn) => conn.is_open(),
            Self::Http2(conn) => conn.is_open(),
        }
    }
}

impl<IO: AsyncWriteRent> From<Http1Connection<IO>> for HttpConnection<IO> {
    fn from(conn: Http1Connection<IO>) -> Self {
        Self::Http1(conn)
    }
}

impl<IO: AsyncWriteRent> From<Http2Connection> for HttpConnection<IO> {
    fn from(conn: Http2Connection) -> Self {
        Self::Http2(conn)
    }
}

impl<IO: AsyncWriteRent> HttpConnection<IO> {
    #[inline]
    pub fn is_h2(&self) -> bool {
        matches!(self, Self::Http2(_))
    }
}

impl<IO: AsyncReadRent + AsyncWriteRent> HttpConnection<IO> {
    pub async fn send_request<R, E>(&mut self, request: R) -> Result<Response<HttpBody>, HttpError>
    where
        ClientCodec<IO>: Sink<R, Error = E>,
        E: std::fmt::Debug + Into<HttpError>,
        R: IntoParts<Parts = RequestHead>,
        R::Body: Body<Data = Bytes, Error = HttpError>,
    {
        match self {
            Self::Http1(conn) => conn.send_request(request).await,
            Self::Http2(conn) => conn.send_request(request).await,
        }
    }
}
