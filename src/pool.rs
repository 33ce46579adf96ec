//! The shared connection pool and the handle that owns it.
//!
//! A [`PoolHandle`] holds at most one [`ConnectionPool`]. The first
//! [`PoolHandle::acquire`] creates it from the settings it was given; every
//! later acquire returns the same pool, whatever settings it passes. Pool
//! size, keep-alive fallback, trust policy and TLS backend are therefore
//! fixed by whichever configuration reaches the handle first.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use http::{Method, Uri};
use tracing::debug;

use crate::error::{Error, TimeoutPhase};
use crate::keep_alive::KeepAliveNegotiator;
use crate::limiters::{AcquirePermitError, RouteLimiters, RoutePermit};
use crate::tls::{TlsBackend, TrustPolicy, default_tls_backend};
use crate::util::{lock_unpoisoned, redact_uri_for_logs};

pub const DEFAULT_MAX_TOTAL: usize = 400;
pub const DEFAULT_MAX_PER_ROUTE: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scheme {
    Plain,
    Tls,
}

impl Scheme {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "http",
            Self::Tls => "https",
        }
    }

    pub const fn default_port(self) -> u16 {
        match self {
            Self::Plain => 80,
            Self::Tls => 443,
        }
    }
}

/// Scheme, host and port of a request target; connections are limited per
/// route.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Route {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Route {
    pub fn from_uri(uri: &Uri) -> Result<Self, Error> {
        let invalid = || Error::InvalidUri {
            uri: redact_uri_for_logs(&uri.to_string()),
        };
        let scheme = match uri.scheme_str() {
            Some(scheme) if scheme.eq_ignore_ascii_case("http") => Scheme::Plain,
            Some(scheme) if scheme.eq_ignore_ascii_case("https") => Scheme::Tls,
            _ => return Err(invalid()),
        };
        let host = uri.host().ok_or_else(invalid)?.to_ascii_lowercase();
        let port = uri.port_u16().unwrap_or(scheme.default_port());
        Ok(Self { scheme, host, port })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Route {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}://{}:{}",
            self.scheme.as_str(),
            self.host,
            self.port
        )
    }
}

/// Everything that is fixed when a pool is created.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_total: usize,
    pub max_per_route: usize,
    pub keep_alive: KeepAliveNegotiator,
    pub trust_policy: TrustPolicy,
    pub tls_backend: TlsBackend,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_total: DEFAULT_MAX_TOTAL,
            max_per_route: DEFAULT_MAX_PER_ROUTE,
            keep_alive: KeepAliveNegotiator::default(),
            trust_policy: TrustPolicy::default(),
            tls_backend: default_tls_backend(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub max_total: usize,
    pub max_per_route: usize,
    pub total_in_use: usize,
    pub tracked_routes: usize,
}

/// One pooled transport serving plain and TLS routes, plus the checkout
/// limits applied in front of it.
pub struct ConnectionPool {
    settings: PoolSettings,
    agent: ureq::Agent,
    limiters: RouteLimiters,
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConnectionPool")
            .field("settings", &self.settings)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    fn new(settings: PoolSettings) -> Result<Self, Error> {
        let settings = PoolSettings {
            max_total: settings.max_total.max(1),
            max_per_route: settings.max_per_route.max(1),
            ..settings
        };
        let tls_config = settings
            .trust_policy
            .build_tls_config(settings.tls_backend)?;
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(0)
            .max_redirects_will_error(false)
            .max_idle_age(settings.keep_alive.fallback())
            .max_idle_connections_per_host(settings.max_per_route)
            .max_idle_connections(settings.max_total)
            .tls_config(tls_config)
            .build();

        debug!(
            max_total = settings.max_total,
            max_per_route = settings.max_per_route,
            keep_alive_ms = settings.keep_alive.fallback().as_millis() as u64,
            tls_backend = settings.tls_backend.as_str(),
            insecure = settings.trust_policy.is_insecure(),
            "connection pool created"
        );

        Ok(Self {
            limiters: RouteLimiters::new(settings.max_total, settings.max_per_route),
            agent: config.new_agent(),
            settings,
        })
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_total: self.settings.max_total,
            max_per_route: self.settings.max_per_route,
            total_in_use: self.limiters.total_in_use(),
            tracked_routes: self.limiters.tracked_routes(),
        }
    }

    pub fn route_in_use(&self, route: &Route) -> usize {
        self.limiters.route_in_use(&route.to_string())
    }

    pub(crate) fn agent(&self) -> &ureq::Agent {
        &self.agent
    }

    /// Waits up to `wait` for a connection slot on `route`.
    pub(crate) fn checkout(
        &self,
        route: &Route,
        wait: Duration,
        method: &Method,
        redacted_uri: &str,
    ) -> Result<RoutePermit, Error> {
        let deadline_at = Instant::now() + wait;
        self.limiters
            .acquire(&route.to_string(), deadline_at)
            .map_err(|error| match error {
                AcquirePermitError::Timeout => Error::Timeout {
                    phase: TimeoutPhase::ConnectionRequest,
                    timeout_ms: wait.as_millis(),
                    method: method.clone(),
                    uri: redacted_uri.to_owned(),
                },
            })
    }
}

/// Owner of at most one [`ConnectionPool`].
///
/// Clones share the same slot. [`PoolHandle::global`] is the process-wide
/// handle clients use unless another one is injected.
#[derive(Clone, Debug, Default)]
pub struct PoolHandle {
    slot: Arc<Mutex<Option<Arc<ConnectionPool>>>>,
}

impl PoolHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Self {
        static GLOBAL: OnceLock<PoolHandle> = OnceLock::new();
        GLOBAL.get_or_init(PoolHandle::new).clone()
    }

    /// Returns the pool, creating it from `settings` if the slot is empty.
    /// When a pool already exists `settings` are ignored.
    pub fn acquire(&self, settings: &PoolSettings) -> Result<Arc<ConnectionPool>, Error> {
        let mut slot = lock_unpoisoned(&self.slot);
        if let Some(pool) = slot.as_ref() {
            if pool.settings() != settings {
                debug!(
                    existing_max_total = pool.settings().max_total,
                    requested_max_total = settings.max_total,
                    "reusing existing connection pool; requested pool settings are ignored"
                );
            }
            return Ok(Arc::clone(pool));
        }

        let pool = Arc::new(ConnectionPool::new(settings.clone())?);
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    pub fn current(&self) -> Option<Arc<ConnectionPool>> {
        lock_unpoisoned(&self.slot).clone()
    }

    /// Drops the handle's pool. Clients built earlier keep their own
    /// reference; the next acquire creates a fresh pool.
    pub fn teardown(&self) -> bool {
        let removed = lock_unpoisoned(&self.slot).take();
        if removed.is_some() {
            debug!("connection pool released from handle");
        }
        removed.is_some()
    }

    pub fn same_handle(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}
