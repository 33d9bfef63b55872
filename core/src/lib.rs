//! Declarative HTTP/HTTPS request client.
//!
//! # Overview
//! Callers describe requests with `RequestBuilder` (method, URL, headers,
//! body, content type, authentication, trust policy, timeouts), register
//! them with a `RequestClient`, and read back a `ResponseRecord` holding the
//! status, headers, decoded body and, for TLS, the negotiated cipher suite
//! and peer certificate chain.
//!
//! # Design
//! - Descriptors are frozen by `RequestBuilder::build`; only validation
//!   errors are returned as `Err`.
//! - Execution faults (connect, write, read) are data: they land in
//!   `ResponseRecord::failure` and never abort a queue drain.
//! - The pipeline is `transport::execute` (socket, TLS, request, response
//!   head) followed by `reader::read` (framing, gzip, UTF-8 text).
//! - All I/O is blocking and bounded by the connect and read timeouts.

pub mod client;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod form;
pub mod http;
pub mod reader;
pub mod tls;
pub mod transport;

pub use client::{execute_once, RequestClient, RequestState};
pub use config::ClientConfig;
pub use descriptor::{Body, RequestBuilder, RequestDescriptor, RequestId};
pub use error::RequestError;
pub use form::{encode_form, Form};
pub use http::{ContentType, HeaderList, HttpMethod, ResponseHeaders, ResponseRecord};
pub use tls::TrustPolicy;
pub use transport::ExecutionSettings;
