use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::Result;
use crate::config::TransportConfig;
use crate::pool::PoolHandle;
use crate::tls::{TlsBackend, TrustPolicy};
use crate::util::non_blank;

use super::{HttpClient, HttpClientBuilder};

const MIN_DURATION: Duration = Duration::from_millis(1);

impl HttpClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_total(mut self, max_total: usize) -> Self {
        self.max_total = Some(max_total.max(1));
        self
    }

    pub fn max_per_route(mut self, max_per_route: usize) -> Self {
        self.max_per_route = Some(max_per_route.max(1));
        self
    }

    /// Fixed user agent for every request that does not set its own. Blank
    /// values clear it, so the built-in rotation is used.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        let user_agent = user_agent.into();
        self.user_agent = non_blank(Some(&user_agent)).map(ToOwned::to_owned);
        self
    }

    pub fn keep_alive_timeout(mut self, keep_alive_timeout: Duration) -> Self {
        self.keep_alive_timeout = Some(keep_alive_timeout);
        self
    }

    /// Longest wait for a free pooled connection.
    pub fn connection_request_timeout(mut self, connection_request_timeout: Duration) -> Self {
        self.connection_request_timeout = Some(connection_request_timeout.max(MIN_DURATION));
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = Some(connect_timeout.max(MIN_DURATION));
        self
    }

    /// Read/write timeout once connected.
    pub fn socket_timeout(mut self, socket_timeout: Duration) -> Self {
        self.socket_timeout = Some(socket_timeout.max(MIN_DURATION));
        self
    }

    /// Extra attempts for sends that fail before the request is written.
    /// `0` disables retrying.
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = Some(max_response_body_bytes.max(1));
        self
    }

    pub fn trust_policy(mut self, trust_policy: TrustPolicy) -> Self {
        self.trust_policy = Some(trust_policy);
        self
    }

    /// Accepts any server certificate and hostname, negotiating the legacy
    /// protocol list. Only takes effect if this configuration creates the pool.
    pub fn danger_accept_any_certificate(self) -> Self {
        self.trust_policy(TrustPolicy::insecure_accept_all())
    }

    pub fn tls_backend(mut self, tls_backend: TlsBackend) -> Self {
        self.tls_backend = Some(tls_backend);
        self
    }

    pub fn pool(mut self, pool: PoolHandle) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Resolves every option to its final value without touching any pool.
    pub fn transport_config(&self) -> TransportConfig {
        let defaults = TransportConfig::default();
        TransportConfig {
            max_total: self.max_total.unwrap_or(defaults.max_total),
            max_per_route: self.max_per_route.unwrap_or(defaults.max_per_route),
            user_agent: self.user_agent.clone(),
            keep_alive_timeout: self
                .keep_alive_timeout
                .unwrap_or(defaults.keep_alive_timeout),
            connection_request_timeout: self
                .connection_request_timeout
                .unwrap_or(defaults.connection_request_timeout),
            connect_timeout: self.connect_timeout.unwrap_or(defaults.connect_timeout),
            socket_timeout: self.socket_timeout.unwrap_or(defaults.socket_timeout),
            retry_count: self.retry_count.unwrap_or(defaults.retry_count),
            max_response_body_bytes: self
                .max_response_body_bytes
                .unwrap_or(defaults.max_response_body_bytes),
            trust_policy: self
                .trust_policy
                .clone()
                .unwrap_or(defaults.trust_policy),
            tls_backend: self.tls_backend.unwrap_or(defaults.tls_backend),
        }
    }

    /// Resolves the configuration and binds it to the pool handle, creating
    /// the pool on first use.
    pub fn build(self) -> Result<HttpClient> {
        let config = self.transport_config();
        let handle = self.pool.unwrap_or_else(PoolHandle::global);
        let pool = handle.acquire(&config.pool_settings())?;

        debug!(
            retry_count = config.retry_count,
            connect_timeout_ms = config.connect_timeout.as_millis() as u64,
            socket_timeout_ms = config.socket_timeout.as_millis() as u64,
            fixed_user_agent = config.user_agent.is_some(),
            "http client built"
        );

        Ok(HttpClient {
            config: Arc::new(config),
            pool,
        })
    }
}
