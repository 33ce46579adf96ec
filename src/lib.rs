//! `poolhttp` is a blocking HTTP client over one shared connection pool, with
//! bounded redirect following, pre-send retries and keep-alive negotiation.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use poolhttp::prelude::{HttpClient, Request};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = HttpClient::builder()
//!         .connect_timeout(Duration::from_secs(3))
//!         .socket_timeout(Duration::from_secs(10))
//!         .retry_count(2)
//!         .build()?;
//!
//!     let page = client.get("https://example.com/status")?;
//!     println!("{page}");
//!
//!     let echoed = client.post_form(
//!         "https://example.com/echo",
//!         [("code", "200"), ("status", "2")],
//!     )?;
//!     println!("{echoed}");
//!
//!     let response = client.execute(
//!         Request::post_body("https://example.com/items", r#"{"name":"demo"}"#)
//!             .content_type(poolhttp::CONTENT_TYPE_APPLICATION_JSON),
//!     )?;
//!     if let Some(response) = response {
//!         println!("{} keep-alive={:?}", response.status(), response.keep_alive());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Pool Sharing
//!
//! Clients bind to [`PoolHandle::global`] unless another handle is given with
//! [`HttpClientBuilder::pool`]. The first client built on a handle fixes its
//! pool limits, keep-alive fallback, trust policy and TLS backend.

#[cfg(all(not(feature = "tls-rustls"), not(feature = "tls-native")))]
compile_error!("poolhttp requires one TLS backend feature: enable `tls-rustls` or `tls-native`");

mod client;
mod config;
mod error;
mod keep_alive;
mod limiters;
mod pool;
mod redirect;
mod request;
mod response;
mod retry;
mod tls;
mod user_agent;
mod util;

pub use crate::client::{HttpClient, HttpClientBuilder};
pub use crate::config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_CONNECTION_REQUEST_TIMEOUT, DEFAULT_MAX_RESPONSE_BODY_BYTES,
    DEFAULT_SOCKET_TIMEOUT, TransportConfig,
};
pub use crate::error::{Error, ErrorCode, TimeoutPhase, TransportErrorKind};
pub use crate::keep_alive::{DEFAULT_KEEP_ALIVE_TIMEOUT, KeepAliveNegotiator};
pub use crate::pool::{
    ConnectionPool, DEFAULT_MAX_PER_ROUTE, DEFAULT_MAX_TOTAL, PoolHandle, PoolSettings, PoolStats,
    Route, Scheme,
};
pub use crate::redirect::{
    MAX_REDIRECT_HOPS, RedirectResolver, RedirectState, RedirectStep, RedirectStop,
};
pub use crate::request::{
    APPLICATION_OCTET_STREAM, CONTENT_TYPE_APPLICATION_JSON, CONTENT_TYPE_APPLICATION_SOAP_XML,
    CONTENT_TYPE_FORM_URLENCODED, CONTENT_TYPE_TEXT_PLAIN, CONTENT_TYPE_TEXT_XML, Request,
    RequestBody, SOAP_ACTION,
};
pub use crate::response::Response;
pub use crate::retry::{RetryDecision, RetryPolicy};
pub use crate::tls::{LEGACY_PROTOCOLS, TlsBackend, TlsProtocol, TrustDecision, TrustPolicy};
pub use crate::user_agent::{DEFAULT_USER_AGENT, USER_AGENTS, random_user_agent};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Error, ErrorCode, HttpClient, HttpClientBuilder, PoolHandle, Request, Response, Result,
        RetryPolicy, TimeoutPhase, TransportErrorKind, TrustPolicy,
    };
}
