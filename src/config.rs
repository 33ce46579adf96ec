use std::time::Duration;

use crate::keep_alive::{DEFAULT_KEEP_ALIVE_TIMEOUT, KeepAliveNegotiator};
use crate::pool::{DEFAULT_MAX_PER_ROUTE, DEFAULT_MAX_TOTAL, PoolSettings};
use crate::retry::RetryPolicy;
use crate::tls::{TlsBackend, TrustPolicy, default_tls_backend};

pub const DEFAULT_CONNECTION_REQUEST_TIMEOUT: Duration = Duration::from_millis(60_000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(60_000);
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_millis(60_000);
pub const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Resolved client configuration. Every field has its final value; nothing
/// is defaulted again after [`crate::HttpClientBuilder::build`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    pub max_total: usize,
    pub max_per_route: usize,
    pub user_agent: Option<String>,
    pub keep_alive_timeout: Duration,
    pub connection_request_timeout: Duration,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    pub retry_count: u32,
    pub max_response_body_bytes: usize,
    pub trust_policy: TrustPolicy,
    pub tls_backend: TlsBackend,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_total: DEFAULT_MAX_TOTAL,
            max_per_route: DEFAULT_MAX_PER_ROUTE,
            user_agent: None,
            keep_alive_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
            connection_request_timeout: DEFAULT_CONNECTION_REQUEST_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            retry_count: 0,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
            trust_policy: TrustPolicy::default(),
            tls_backend: default_tls_backend(),
        }
    }
}

impl TransportConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_retries(self.retry_count)
    }

    pub fn keep_alive(&self) -> KeepAliveNegotiator {
        KeepAliveNegotiator::new(self.keep_alive_timeout)
    }

    /// The part of the configuration a pool is created from.
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_total: self.max_total,
            max_per_route: self.max_per_route,
            keep_alive: self.keep_alive(),
            trust_policy: self.trust_policy.clone(),
            tls_backend: self.tls_backend,
        }
    }
}
