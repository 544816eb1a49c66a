//! Loopback HTTP servers for tests, HTTP/1.1 on monoio-http's server codec or
//! HTTP/2 with prior knowledge.
//!
//! Paths:
//! - `/echo`: echoes the body, the `Content-Type` and every `x-` header
//! - `/head`: returns the request head as text
//! - `/close`: answers with `Connection: close` and hangs up (HTTP/1.1)
//! - `/slow`: answers after 300ms
//! - `/status/<code>`: empty response with that status
//! - `/latin1`: ISO-8859-1 encoded text
//! - `/json`: `{"id":7}`
use std::{cell::Cell, fmt::Write, net::SocketAddr, rc::Rc, time::Duration};

use bytes::{Bytes, BytesMut};
use http::{
    header::{CONNECTION, CONTENT_TYPE},
    request::Parts,
    HeaderMap, HeaderValue, Response, StatusCode,
};
use monoio::{
    io::{sink::SinkExt, stream::Stream},
    net::{TcpListener, TcpStream},
};
use monoio_http::{
    common::body::{Body, HttpBody},
    h1::codec::{decoder::FillPayload, ServerCodec},
};

#[derive(Clone, Copy)]
enum Protocol {
    Http1,
    Http2,
}

pub(crate) struct TestServer {
    addr: SocketAddr,
    accepted: Rc<Cell<usize>>,
}

impl TestServer {
    /// Spawn an HTTP/1.1 server on the current runtime.
    pub(crate) fn start() -> Self {
        Self::spawn(Protocol::Http1)
    }

    /// Spawn a server that speaks HTTP/2 from the first byte.
    pub(crate) fn start_h2() -> Self {
        Self::spawn(Protocol::Http2)
    }

    fn spawn(protocol: Protocol) -> Self {
        #[cfg(feature = "logging")]
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Rc::new(Cell::new(0));
        let counter = accepted.clone();
        monoio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.set(counter.get() + 1);
                match protocol {
                    Protocol::Http1 => monoio::spawn(serve_h1(stream)),
                    Protocol::Http2 => monoio::spawn(serve_h2(stream)),
                };
            }
        });
        Self { addr, accepted }
    }

    pub(crate) fn url(&self, path: &str) -> http::Uri {
        format!("http://{}{}", self.addr, path).parse().unwrap()
    }

    pub(crate) fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of connections accepted so far.
    pub(crate) fn accepted(&self) -> usize {
        self.accepted.get()
    }
}

/// A loopback port nothing listens on. A std listener releases its port as
/// soon as it is dropped.
pub(crate) fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    close: bool,
}

impl Reply {
    fn new(status: u16, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        Self {
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body: body.into(),
            close: false,
        }
    }

    fn into_h1(self) -> Response<HttpBody> {
        let mut response = Response::new(HttpBody::Ready(Some(self.body)));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        if self.close {
            response
                .headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("close"));
        }
        response
    }
}

async fn serve_h1(stream: TcpStream) {
    let mut codec = ServerCodec::new(stream);
    while let Some(Ok(request)) = codec.next().await {
        let (parts, mut payload) = request.into_parts();
        if codec.fill_payload().await.is_err() {
            return;
        }
        let mut body = BytesMut::new();
        while let Some(chunk) = payload.next_data().await {
            match chunk {
                Ok(chunk) => body.extend_from_slice(&chunk),
                Err(_) => return,
            }
        }

        let reply = reply(&parts, body.freeze()).await;
        let close = reply.close;
        if codec.send_and_flush(reply.into_h1()).await.is_err() || close {
            return;
        }
    }
}

async fn serve_h2(stream: TcpStream) {
    let Ok(mut connection) = monoio_http::h2::server::handshake(stream).await else {
        return;
    };
    while let Some(Ok((request, respond))) = connection.accept().await {
        monoio::spawn(respond_h2(request, respond));
    }
}

async fn respond_h2(
    request: http::Request<monoio_http::h2::RecvStream>,
    mut respond: monoio_http::h2::server::SendResponse<Bytes>,
) -> Result<(), monoio_http::h2::Error> {
    let (parts, mut recv) = request.into_parts();
    let mut body = BytesMut::new();
    while let Some(data) = recv.data().await {
        let data = data?;
        let _ = recv.flow_control().release_capacity(data.len());
        body.extend_from_slice(&data);
    }

    let reply = reply(&parts, body.freeze()).await;
    let mut response = Response::new(());
    *response.status_mut() = reply.status;
    *response.headers_mut() = reply.headers;
    if reply.body.is_empty() {
        respond.send_response(response, true)?;
    } else {
        let mut send = respond.send_response(response, false)?;
        send.send_data(reply.body, true)?;
    }
    Ok(())
}

async fn reply(head: &Parts, body: Bytes) -> Reply {
    match head.uri.path() {
        "/echo" => {
            let content_type = head
                .headers
                .get(CONTENT_TYPE)
                .cloned()
                .unwrap_or(HeaderValue::from_static("application/octet-stream"));
            let mut reply = Reply::new(200, "application/octet-stream", body);
            reply.headers.insert(CONTENT_TYPE, content_type);
            reply
                .headers
                .insert("x-method", HeaderValue::from_str(head.method.as_str()).unwrap());
            for (name, value) in head.headers.iter() {
                if name.as_str().starts_with("x-") {
                    reply.headers.append(name.clone(), value.clone());
                }
            }
            reply
        }
        "/head" => {
            let mut rendered = String::new();
            let _ = write!(rendered, "{} {} {:?}\r\n", head.method, head.uri, head.version);
            for (name, value) in head.headers.iter() {
                let _ = write!(rendered, "{}: {}\r\n", name, value.to_str().unwrap_or_default());
            }
            Reply::new(200, "text/plain", rendered)
        }
        "/close" => {
            let mut reply = Reply::new(200, "text/plain", "bye");
            reply.close = true;
            reply
        }
        "/slow" => {
            monoio::time::sleep(Duration::from_millis(300)).await;
            Reply::new(200, "text/plain", "late")
        }
        "/latin1" => Reply::new(200, "text/plain; charset=ISO-8859-1", &b"caf\xe9"[..]),
        "/json" => Reply::new(200, "application/json", r#"{"id":7}"#),
        path => match path.strip_prefix("/status/").and_then(|s| s.parse().ok()) {
            Some(status) => Reply::new(status, "text/plain", ""),
            None => Reply::new(404, "text/plain", "not found"),
        },
    }
}
