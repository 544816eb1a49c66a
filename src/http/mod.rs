mod connection;
mod connector;

pub use connection::{Http1Connection, Http2Connection, HttpConnection};
pub use connector::HttpConnector;
