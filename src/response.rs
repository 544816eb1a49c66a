//! Transport agnostic response model and body conversion.
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use http::StatusCode;
use serde::de::DeserializeOwned;

use crate::{
    error::ConversionFailure,
    request::{ApiRequest, Headers},
};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies the engine that produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exchange-client-{}", self.0)
    }
}

#[derive(Debug)]
pub struct ApiResponse<T> {
    status: StatusCode,
    headers: Headers,
    body: T,
    client: ClientId,
}

impl<T> ApiResponse<T> {
    pub fn new(status: StatusCode, headers: Headers, body: T, client: ClientId) -> Self {
        Self {
            status,
            headers,
            body,
            client,
        }
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Canonical reason phrase, `None` for codes without one.
    #[inline]
    pub fn reason(&self) -> Option<&'static str> {
        self.status.canonical_reason()
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[inline]
    pub fn body(&self) -> &T {
        &self.body
    }

    #[inline]
    pub fn body_mut(&mut self) -> &mut T {
        &mut self.body
    }

    #[inline]
    pub fn into_body(self) -> T {
        self.body
    }

    #[inline]
    pub fn client(&self) -> ClientId {
        self.client
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            status: self.status,
            headers: self.headers,
            body: f(self.body),
            client: self.client,
        }
    }
}

/// Conversion of the decoded response text into the type the caller asked
/// for.
pub trait ConvertBody: Sized {
    fn convert(request: &ApiRequest, headers: &Headers, body: String) -> Result<Self, ConversionFailure>;
}

impl ConvertBody for String {
    #[inline]
    fn convert(_: &ApiRequest, _: &Headers, body: String) -> Result<Self, ConversionFailure> {
        Ok(body)
    }
}

impl ConvertBody for () {
    #[inline]
    fn convert(_: &ApiRequest, _: &Headers, _: String) -> Result<Self, ConversionFailure> {
        Ok(())
    }
}

impl ConvertBody for serde_json::Value {
    /// An empty body is `null`.
    fn convert(_: &ApiRequest, _: &Headers, body: String) -> Result<Self, ConversionFailure> {
        if body.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

/// Deserializes a JSON body into `T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    #[inline]
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: DeserializeOwned> ConvertBody for Json<T> {
    fn convert(_: &ApiRequest, _: &Headers, body: String) -> Result<Self, ConversionFailure> {
        Ok(Json(serde_json::from_str(&body)?))
    }
}

#[cfg(test)]
mod tests {
    use http::Uri;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
    }

    #[test]
    fn unknown_status_is_kept_by_number() {
        let status = StatusCode::from_u16(599).unwrap();
        let resp = ApiResponse::new(status, Headers::new(), (), ClientId::next());
        assert_eq!(resp.status().as_u16(), 599);
        assert_eq!(resp.reason(), None);
        let ok = resp.map(|_| "x");
        assert_eq!(ApiResponse::new(StatusCode::OK, Headers::new(), 1, ok.client()).reason(), Some("OK"));
    }

    #[test]
    fn client_ids_are_distinct() {
        assert_ne!(ClientId::next(), ClientId::next());
    }

    #[test]
    fn json_conversion() {
        let req = ApiRequest::get(Uri::from_static("http://localhost/"));
        let headers = Headers::new();
        let Json(item) = Json::<Item>::convert(&req, &headers, r#"{"id":7}"#.into()).unwrap();
        assert_eq!(item, Item { id: 7 });
        assert!(Json::<Item>::convert(&req, &headers, "nope".into()).is_err());
        assert_eq!(
            serde_json::Value::convert(&req, &headers, String::new()).unwrap(),
            serde_json::Value::Null
        );
    }
}
