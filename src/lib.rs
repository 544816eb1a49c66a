//! Pooled HTTP exchange engine on monoio transports.
//!
//! An [`ApiRequest`] is mapped onto an HTTP request, sent over a pooled
//! connection and the response decoded back into an [`ApiResponse`]:
//!
//! ```no_run
//! use monoio_exchange::{ApiRequest, ClientConfig, ExchangeEngine};
//!
//! #[monoio::main(enable_timer = true)]
//! async fn main() {
//!     let engine = ExchangeEngine::new(ClientConfig::default());
//!     let request = ApiRequest::get("http://httpbin.org/get".parse().unwrap());
//!     let response = engine.exchange::<String>(&request).await.unwrap();
//!     println!("{} {}", response.status(), response.body());
//! }
//! ```
mod error;
pub use error::{
    ConversionFailure, EncodingFailure, ExchangeError, FailureKind, FromUriError, Result,
    TransportError, TransportFailure,
};

pub mod builder;
pub mod config;
pub mod connectors;
pub mod decoder;
pub mod engine;
pub mod entity;
pub mod factory;
pub mod http;
pub mod key;
pub mod pool;
pub mod request;
pub mod response;
pub mod stream;

#[cfg(test)]
mod test_util;

pub use builder::{RequestBuilder, WireRequest};
pub use config::{ClientConfig, PoolConfig, TransportConfig};
pub use decoder::ResponseDecoder;
pub use engine::ExchangeEngine;
pub use entity::{EntityCodec, EntityKind, WireEntity};
pub use factory::{
    ClientOverrides, ConnectionPoolFactory, ExchangeClientFactory, PoolOverrides, PooledClient,
};
pub use request::{ApiRequest, Headers, RequestBody};
pub use response::{ApiResponse, ClientId, ConvertBody, Json};
pub use stream::ResponseBodyStream;
