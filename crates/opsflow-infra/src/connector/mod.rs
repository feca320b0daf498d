//! Connector implementations backed by real services.

pub mod http;

pub use http::{HttpConnector, HttpConnectorError};
