//! Turns a [`RequestBody`] into the entity written on the wire.
use std::{path::PathBuf, str::FromStr};

use bytes::Bytes;
use encoding_rs::Encoding;
use mime::Mime;
use monoio::fs::File;
use monoio_http::common::{
    body::{Body, StreamHint},
    error::HttpError,
};

use crate::{error::EncodingFailure, request::RequestBody};

const FILE_CHUNK: usize = 16 * 1024;

/// Which body shape produced an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Text,
    Bytes,
    File,
    Serialized,
    Opaque,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitySource {
    Bytes(Bytes),
    /// Opened when the request is bound to a connection.
    File(PathBuf),
}

/// Encoded request entity. `content_type` is only set when the caller
/// declared one; the wire layer falls back to
/// [`effective_content_type`](WireEntity::effective_content_type).
#[derive(Debug, Clone, PartialEq)]
pub struct WireEntity {
    source: EntitySource,
    kind: EntityKind,
    content_type: Option<Mime>,
    charset: &'static Encoding,
}

impl WireEntity {
    #[inline]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    #[inline]
    pub fn source(&self) -> &EntitySource {
        &self.source
    }

    #[inline]
    pub fn content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }

    /// Length in bytes, unknown for files until they are opened.
    pub fn length(&self) -> Option<u64> {
        match &self.source {
            EntitySource::Bytes(b) => Some(b.len() as u64),
            EntitySource::File(_) => None,
        }
    }

    /// The declared content type, or the default for the entity kind.
    pub fn effective_content_type(&self) -> Mime {
        if let Some(mime) = &self.content_type {
            return mime.clone();
        }
        match (&self.kind, &self.source) {
            (EntityKind::Text | EntityKind::Opaque, _) => {
                with_charset(&mime::TEXT_PLAIN, self.charset).unwrap_or(mime::TEXT_PLAIN_UTF_8)
            }
            (EntityKind::Serialized, _) => mime::APPLICATION_JSON,
            (EntityKind::File, EntitySource::File(path)) => {
                mime_guess::from_path(path).first_or_octet_stream()
            }
            _ => mime::APPLICATION_OCTET_STREAM,
        }
    }

    /// Body to send and its length. Files are opened here and read chunk by
    /// chunk while the request is written.
    pub async fn into_body(self) -> Result<(EntityBody, u64), EncodingFailure> {
        match self.source {
            EntitySource::Bytes(b) => {
                let len = b.len() as u64;
                Ok((EntityBody::Fixed(Some(b)), len))
            }
            EntitySource::File(path) => match open_file(&path).await {
                Ok((file, len)) => Ok((EntityBody::File(FileChunks::new(file)), len)),
                Err(source) => Err(EncodingFailure::File { path, source }),
            },
        }
    }
}

async fn open_file(path: &std::path::Path) -> std::io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let len = file.metadata().await?.len();
    Ok((file, len))
}

/// Request body as written by the connection.
pub enum EntityBody {
    Empty,
    /// Sent in one piece with a known length.
    Fixed(Option<Bytes>),
    File(FileChunks),
}

impl Body for EntityBody {
    type Data = Bytes;
    type Error = HttpError;

    async fn next_data(&mut self) -> Option<Result<Bytes, HttpError>> {
        match self {
            EntityBody::Empty => None,
            EntityBody::Fixed(data) => data.take().map(Ok),
            EntityBody::File(chunks) => chunks.next_chunk().await,
        }
    }

    fn stream_hint(&self) -> StreamHint {
        match self {
            EntityBody::Empty => StreamHint::None,
            EntityBody::Fixed(_) => StreamHint::Fixed,
            EntityBody::File(_) => StreamHint::Stream,
        }
    }
}

/// Reads a file front to back, one chunk per call. The file is closed at EOF
/// or on the first error.
pub struct FileChunks {
    file: Option<File>,
    pos: u64,
}

impl FileChunks {
    fn new(file: File) -> Self {
        Self {
            file: Some(file),
            pos: 0,
        }
    }

    async fn next_chunk(&mut self) -> Option<Result<Bytes, HttpError>> {
        let file = self.file.as_ref()?;
        let (res, mut buf) = file.read_at(Vec::with_capacity(FILE_CHUNK), self.pos).await;
        match res {
            Ok(0) => {
                self.file = None;
                None
            }
            Ok(n) => {
                self.pos += n as u64;
                buf.truncate(n);
                Some(Ok(buf.into()))
            }
            Err(e) => {
                self.file = None;
                Some(Err(e.into()))
            }
        }
    }
}

/// Maps request bodies onto wire entities.
pub struct EntityCodec;

impl EntityCodec {
    /// Encode `body`. A `declared` content type keeps its type and parameters
    /// but its charset is replaced by `charset`.
    ///
    /// `charset` must be one encoding_rs can also encode into (UTF-16 and
    /// `replacement` cannot). Characters it cannot represent are written as
    /// decimal numeric character references.
    pub fn encode(
        body: &RequestBody,
        declared: Option<&str>,
        charset: &'static Encoding,
    ) -> Result<WireEntity, EncodingFailure> {
        if charset.output_encoding() != charset {
            return Err(EncodingFailure::Charset(charset.name()));
        }
        let content_type = declared
            .map(|ct| {
                Mime::from_str(ct)
                    .ok()
                    .and_then(|mime| with_charset(&mime, charset))
                    .ok_or_else(|| EncodingFailure::ContentType(ct.to_owned()))
            })
            .transpose()?;

        let (kind, source) = match body {
            RequestBody::Text(text) => (EntityKind::Text, EntitySource::Bytes(encode_text(text, charset))),
            RequestBody::Bytes(bytes) => (EntityKind::Bytes, EntitySource::Bytes(bytes.clone())),
            RequestBody::File(path) => (EntityKind::File, EntitySource::File(path.clone())),
            RequestBody::Serialized(value) => (
                EntityKind::Serialized,
                EntitySource::Bytes(serde_json::to_vec(value)?.into()),
            ),
            RequestBody::Opaque(value) => (
                EntityKind::Opaque,
                EntitySource::Bytes(encode_text(value.as_deref().unwrap_or_default(), charset)),
            ),
        };

        Ok(WireEntity {
            source,
            kind,
            content_type,
            charset,
        })
    }
}

fn encode_text(text: &str, charset: &'static Encoding) -> Bytes {
    let (encoded, _, _) = charset.encode(text);
    Bytes::copy_from_slice(&encoded)
}

/// `mime` with its charset parameter set to `charset`, other parameters kept
/// in order.
fn with_charset(mime: &Mime, charset: &'static Encoding) -> Option<Mime> {
    let mut rendered = mime.essence_str().to_owned();
    for (name, value) in mime.params() {
        if name == mime::CHARSET {
            continue;
        }
        rendered.push_str("; ");
        rendered.push_str(name.as_str());
        rendered.push('=');
        push_param_value(&mut rendered, value.as_str());
    }
    rendered.push_str("; charset=");
    rendered.push_str(charset.name());
    Mime::from_str(&rendered).ok()
}

// parsed values come back unquoted
fn push_param_value(rendered: &mut String, value: &str) {
    if !value.is_empty() && value.bytes().all(is_token) {
        rendered.push_str(value);
    } else {
        rendered.push('"');
        rendered.push_str(value);
        rendered.push('"');
    }
}

fn is_token(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&c)
}

#[cfg(test)]
mod tests {
    use encoding_rs::{ISO_8859_2, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};

    use super::*;

    fn charset_of(entity: &WireEntity) -> Option<String> {
        entity
            .content_type()
            .and_then(|m| m.get_param(mime::CHARSET))
            .map(|c| c.as_str().to_ascii_lowercase())
    }

    #[test]
    fn declared_charset_is_replaced() {
        let entity = EntityCodec::encode(
            &RequestBody::from("caf\u{e9}"),
            Some("text/plain; charset=ISO-8859-1; format=flowed"),
            UTF_8,
        )
        .unwrap();
        assert_eq!(charset_of(&entity).as_deref(), Some("utf-8"));
        assert_eq!(
            entity.content_type().unwrap().get_param("format").unwrap(),
            "flowed"
        );
        assert_eq!(entity.kind(), EntityKind::Text);
        assert_eq!(
            entity.source(),
            &EntitySource::Bytes(Bytes::from_static("caf\u{e9}".as_bytes()))
        );
    }

    #[test]
    fn text_is_encoded_with_request_charset() {
        let entity = EntityCodec::encode(&RequestBody::from("caf\u{e9}"), None, WINDOWS_1252).unwrap();
        assert_eq!(
            entity.source(),
            &EntitySource::Bytes(Bytes::from_static(b"caf\xe9"))
        );
        assert!(entity.content_type().is_none());
        assert_eq!(
            entity.effective_content_type().to_string().to_ascii_lowercase(),
            "text/plain; charset=windows-1252"
        );
    }

    #[test]
    fn charset_added_to_declared_type_without_one() {
        let entity = EntityCodec::encode(
            &RequestBody::from(vec![1u8, 2, 3]),
            Some("application/x-thing"),
            ISO_8859_2,
        )
        .unwrap();
        assert_eq!(charset_of(&entity).as_deref(), Some("iso-8859-2"));
        assert_eq!(entity.kind(), EntityKind::Bytes);
        assert_eq!(entity.length(), Some(3));
    }

    #[test]
    fn every_kind_encodes_without_hint() {
        let bodies = [
            (RequestBody::from("text"), "text/plain; charset=utf-8"),
            (RequestBody::from(&b"raw"[..]), "application/octet-stream"),
            (
                RequestBody::from(PathBuf::from("/tmp/report.json")),
                "application/json",
            ),
            (
                RequestBody::serialize(&serde_json::json!({"a": 1})).unwrap(),
                "application/json",
            ),
            (RequestBody::display(Some(&3.5)), "text/plain; charset=utf-8"),
        ];
        for (body, expected) in bodies {
            let entity = EntityCodec::encode(&body, None, UTF_8).unwrap();
            assert_eq!(
                entity.effective_content_type().to_string().to_ascii_lowercase(),
                expected,
                "{body:?}"
            );
        }
    }

    #[test]
    fn null_opaque_value_is_empty_text() {
        let entity = EntityCodec::encode(&RequestBody::Opaque(None), None, UTF_8).unwrap();
        assert_eq!(entity.kind(), EntityKind::Opaque);
        assert_eq!(entity.length(), Some(0));
        assert_eq!(entity.source(), &EntitySource::Bytes(Bytes::new()));
    }

    #[test]
    fn serialized_value_is_json() {
        let body = RequestBody::serialize(&serde_json::json!({"name": "x", "n": [1, 2]})).unwrap();
        let entity = EntityCodec::encode(&body, None, UTF_8).unwrap();
        let EntitySource::Bytes(bytes) = entity.source() else {
            panic!("serialized body is in memory");
        };
        let value: serde_json::Value = serde_json::from_slice(bytes).unwrap();
        assert_eq!(value["n"][1], 2);
    }

    #[test]
    fn bad_declared_type_fails() {
        let err = EntityCodec::encode(&RequestBody::from("x"), Some("not a type"), UTF_8).unwrap_err();
        assert!(matches!(err, EncodingFailure::ContentType(ct) if ct == "not a type"));
    }

    #[test]
    fn quoted_parameters_survive_charset_forcing() {
        let entity = EntityCodec::encode(
            &RequestBody::from("x"),
            Some("multipart/form-data; boundary=\"simple boundary\""),
            UTF_8,
        )
        .unwrap();
        let mime = entity.content_type().unwrap();
        assert_eq!(mime.get_param(mime::BOUNDARY).unwrap(), "simple boundary");
        assert_eq!(charset_of(&entity).as_deref(), Some("utf-8"));
        assert!(mime.to_string().contains("boundary=\"simple boundary\""));
    }

    #[test]
    fn charsets_without_an_encoder_are_rejected() {
        for charset in [UTF_16LE, UTF_16BE] {
            let err = EntityCodec::encode(&RequestBody::from("x"), None, charset).unwrap_err();
            assert!(matches!(err, EncodingFailure::Charset(name) if name == charset.name()));
        }
    }

    #[test]
    fn unmappable_text_becomes_character_references() {
        let entity = EntityCodec::encode(&RequestBody::from("\u{20ac}1"), None, ISO_8859_2).unwrap();
        assert_eq!(
            entity.source(),
            &EntitySource::Bytes(Bytes::from_static(b"&#8364;1"))
        );
    }

    async fn drain(body: &mut EntityBody) -> (usize, Vec<u8>) {
        let mut chunks = 0;
        let mut data = Vec::new();
        while let Some(chunk) = body.next_data().await {
            chunks += 1;
            data.extend_from_slice(&chunk.unwrap());
        }
        (chunks, data)
    }

    #[monoio::test]
    async fn file_is_streamed_in_chunks() {
        let path = std::env::temp_dir().join(format!("monoio-exchange-entity-{}.txt", std::process::id()));
        let content: Vec<u8> = (0..FILE_CHUNK * 2 + 10).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        let entity = EntityCodec::encode(&RequestBody::from(path.clone()), None, UTF_8).unwrap();
        assert_eq!(entity.length(), None);
        assert_eq!(entity.effective_content_type(), mime::TEXT_PLAIN);
        let (mut body, len) = entity.into_body().await.unwrap();
        assert_eq!(len, content.len() as u64);
        assert_eq!(body.stream_hint(), StreamHint::Stream);
        let (chunks, data) = drain(&mut body).await;
        assert_eq!(chunks, 3);
        assert_eq!(data, content);
        assert!(body.next_data().await.is_none());
        std::fs::remove_file(&path).unwrap();

        let missing = EntityCodec::encode(&RequestBody::from(path), None, UTF_8).unwrap();
        assert!(matches!(
            missing.into_body().await,
            Err(EncodingFailure::File { .. })
        ));
    }

    #[monoio::test]
    async fn in_memory_body_is_fixed() {
        let entity = EntityCodec::encode(&RequestBody::from("abc"), None, UTF_8).unwrap();
        let (mut body, len) = entity.into_body().await.unwrap();
        assert_eq!(len, 3);
        assert_eq!(body.stream_hint(), StreamHint::Fixed);
        assert_eq!(drain(&mut body).await, (1, b"abc".to_vec()));
    }
}
