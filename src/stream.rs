//! Response body handed out together with the connection that carries it.
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use monoio_http::common::body::HttpBody;

use crate::{
    decoder::read_chunk,
    error::{ExchangeError, Result},
    pool::{Key, Poolable, Pooled},
};

/// A leased connection as seen by a [`ResponseBodyStream`].
pub trait Lease {
    /// Give the connection back to the pool.
    fn release(self: Box<Self>);
    /// Close the connection; the lease slot is freed all the same.
    fn discard(self: Box<Self>);
}

impl<K: Key, T: Poolable> Lease for Pooled<K, T> {
    #[inline]
    fn release(self: Box<Self>) {
        drop(self)
    }

    #[inline]
    fn discard(self: Box<Self>) {
        Pooled::discard(*self)
    }
}

struct Open {
    body: HttpBody,
    buffered: Bytes,
    eof: bool,
    lease: Box<dyn Lease>,
}

/// Streamed response body.
///
/// The connection stays leased until the stream is closed or dropped.
/// `close` may be called any number of times; reads after it fail with
/// [`ExchangeError::StreamClosed`]. A read that fails on the transport closes
/// the stream and discards the connection.
pub struct ResponseBodyStream {
    inner: Option<Open>,
    read_timeout: Option<Duration>,
}

impl std::fmt::Debug for ResponseBodyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBodyStream")
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ResponseBodyStream {
    pub fn new(body: HttpBody, lease: Box<dyn Lease>, read_timeout: Option<Duration>) -> Self {
        Self {
            inner: Some(Open {
                body,
                buffered: Bytes::new(),
                eof: false,
                lease,
            }),
            read_timeout,
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Next byte, `None` at the end of the body.
    pub async fn read_byte(&mut self) -> Result<Option<u8>> {
        if !self.fill().await? {
            return Ok(None);
        }
        Ok(self.buffered_mut().map(|b| b.get_u8()))
    }

    /// Read into `buf`, returning the number of bytes copied; `0` means the
    /// body is exhausted (or `buf` is empty).
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return self.ensure_open().map(|_| 0);
        }
        if !self.fill().await? {
            return Ok(0);
        }
        let Some(buffered) = self.buffered_mut() else {
            return Ok(0);
        };
        let n = buf.len().min(buffered.len());
        buffered.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }

    /// Read `n` bytes, fewer only when the body ends first.
    pub async fn read_n(&mut self, n: usize) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            if !self.fill().await? {
                break;
            }
            if let Some(buffered) = self.buffered_mut() {
                let take = (n - out.len()).min(buffered.len());
                out.extend_from_slice(&buffered.split_to(take));
            }
        }
        Ok(out.freeze())
    }

    /// Everything left in the body.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while self.fill().await? {
            if let Some(buffered) = self.buffered_mut() {
                out.extend_from_slice(buffered);
                buffered.clear();
            }
        }
        Ok(out.freeze())
    }

    /// Give the connection back to the pool. Later calls do nothing.
    pub fn close(&mut self) {
        if let Some(open) = self.inner.take() {
            #[cfg(feature = "logging")]
            tracing::debug!("response body stream closed");
            drop(open.body);
            open.lease.release();
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.inner {
            Some(_) => Ok(()),
            None => Err(ExchangeError::StreamClosed),
        }
    }

    fn buffered_mut(&mut self) -> Option<&mut Bytes> {
        self.inner.as_mut().map(|open| &mut open.buffered)
    }

    /// Make sure buffered data is available; `false` at the end of the body.
    async fn fill(&mut self) -> Result<bool> {
        let read_timeout = self.read_timeout;
        let open = self.inner.as_mut().ok_or(ExchangeError::StreamClosed)?;
        let failed = loop {
            if !open.buffered.is_empty() || open.eof {
                break None;
            }
            match read_chunk(&mut open.body, read_timeout).await {
                Ok(Some(chunk)) => open.buffered = chunk,
                Ok(None) => open.eof = true,
                Err(e) => break Some(e),
            }
        };
        if let Some(e) = failed {
            if let Some(open) = self.inner.take() {
                open.lease.discard();
            }
            return Err(e.into());
        }
        Ok(self
            .inner
            .as_ref()
            .map(|open| !open.buffered.is_empty())
            .unwrap_or(false))
    }
}

impl Drop for ResponseBodyStream {
    fn drop(&mut self) {
        self.close();
    }
}
