use std::sync::Arc;
use std::time::Duration;

use crate::config::TransportConfig;
use crate::pool::{ConnectionPool, PoolHandle};
use crate::tls::{TlsBackend, TrustPolicy};

mod builder;
mod execute;
mod transport;

/// Collects transport options. Unset options take their defaults when
/// [`HttpClientBuilder::build`] runs.
#[derive(Clone, Debug, Default)]
pub struct HttpClientBuilder {
    max_total: Option<usize>,
    max_per_route: Option<usize>,
    user_agent: Option<String>,
    keep_alive_timeout: Option<Duration>,
    connection_request_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    socket_timeout: Option<Duration>,
    retry_count: Option<u32>,
    max_response_body_bytes: Option<usize>,
    trust_policy: Option<TrustPolicy>,
    tls_backend: Option<TlsBackend>,
    pool: Option<PoolHandle>,
}

/// A blocking HTTP client bound to a shared [`ConnectionPool`].
///
/// Cheap to clone and safe to share between threads. All clones and every
/// client built through the same [`PoolHandle`] send through one pool.
#[derive(Clone, Debug)]
pub struct HttpClient {
    config: Arc<TransportConfig>,
    pool: Arc<ConnectionPool>,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }
}
