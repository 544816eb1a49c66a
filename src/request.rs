//! Transport agnostic request model.
use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use encoding_rs::{Encoding, UTF_8};
use http::{header::CONTENT_TYPE, HeaderMap, Method, Uri};
use serde::Serialize;

use crate::error::EncodingFailure;

/// Ordered multi-map of header names to their values.
///
/// Names are matched ASCII case-insensitively and keep the order in which they
/// were first seen; values keep insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
}

impl Headers {
    #[inline]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.position(name)
            .map(|idx| self.entries[idx].1.as_slice())
            .unwrap_or_default()
    }

    /// First value of `name`, if any.
    #[inline]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Every `(name, value)` pair, values of one name grouped in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(k, vs)| vs.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Number of `(name, value)` pairs.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, vs)| vs.len()).sum()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

impl From<&HeaderMap> for Headers {
    fn from(map: &HeaderMap) -> Self {
        map.iter()
            .map(|(k, v)| (k.as_str(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect()
    }
}

/// Request body, tagged by the kind of wire entity it turns into.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Text(String),
    Bytes(Bytes),
    /// Streamed from the file when the request is sent.
    File(PathBuf),
    Serialized(serde_json::Value),
    /// String form of an arbitrary value, `None` standing for null.
    Opaque(Option<String>),
}

impl RequestBody {
    pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, EncodingFailure> {
        Ok(Self::Serialized(serde_json::to_value(value)?))
    }

    pub fn display<T: Display + ?Sized>(value: Option<&T>) -> Self {
        Self::Opaque(value.map(ToString::to_string))
    }
}

impl From<String> for RequestBody {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for RequestBody {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v.into())
    }
}

impl From<&[u8]> for RequestBody {
    fn from(v: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(v))
    }
}

impl From<Bytes> for RequestBody {
    fn from(b: Bytes) -> Self {
        Self::Bytes(b)
    }
}

impl From<PathBuf> for RequestBody {
    fn from(p: PathBuf) -> Self {
        Self::File(p)
    }
}

impl From<&Path> for RequestBody {
    fn from(p: &Path) -> Self {
        Self::File(p.to_owned())
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(v: serde_json::Value) -> Self {
        Self::Serialized(v)
    }
}

/// A request as the caller describes it, before any wire mapping.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    uri: Uri,
    headers: Headers,
    body: Option<RequestBody>,
    charset: &'static Encoding,
}

impl ApiRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: Headers::new(),
            body: None,
            charset: UTF_8,
        }
    }

    #[inline]
    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    #[inline]
    pub fn post(uri: Uri) -> Self {
        Self::new(Method::POST, uri)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_charset(mut self, charset: &'static Encoding) -> Self {
        self.charset = charset;
        self
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    #[inline]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[inline]
    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    #[inline]
    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    #[inline]
    pub fn charset(&self) -> &'static Encoding {
        self.charset
    }

    /// Declared `Content-Type`, if any.
    #[inline]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.first(CONTENT_TYPE.as_str())
    }
}
