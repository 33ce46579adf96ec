//! TLS backend selection and the certificate trust policy applied to the
//! shared connection pool.

use tracing::{debug, warn};

use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlsBackend {
    Rustls,
    NativeTls,
}

impl TlsBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rustls => "rustls",
            Self::NativeTls => "native-tls",
        }
    }

    /// Protocol versions the backend is able to negotiate.
    pub const fn supported_protocols(self) -> &'static [TlsProtocol] {
        match self {
            Self::Rustls => &[TlsProtocol::Tls13, TlsProtocol::Tls12],
            Self::NativeTls => &[
                TlsProtocol::Tls13,
                TlsProtocol::Tls12,
                TlsProtocol::Tls11,
                TlsProtocol::Tls10,
            ],
        }
    }

    pub(crate) const fn is_available(self) -> bool {
        match self {
            Self::Rustls => cfg!(feature = "tls-rustls"),
            Self::NativeTls => cfg!(feature = "tls-native"),
        }
    }
}

pub(crate) const fn default_tls_backend() -> TlsBackend {
    #[cfg(feature = "tls-rustls")]
    {
        return TlsBackend::Rustls;
    }
    #[allow(unreachable_code)]
    TlsBackend::NativeTls
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TlsProtocol {
    Tls13,
    Tls12,
    Tls11,
    Tls10,
    Ssl3,
}

impl TlsProtocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tls13 => "TLSv1.3",
            Self::Tls12 => "TLSv1.2",
            Self::Tls11 => "TLSv1.1",
            Self::Tls10 => "TLSv1",
            Self::Ssl3 => "SSLv3",
        }
    }
}

/// Protocols enabled by [`TrustPolicy::insecure_accept_all`].
pub const LEGACY_PROTOCOLS: &[TlsProtocol] = &[
    TlsProtocol::Tls12,
    TlsProtocol::Tls11,
    TlsProtocol::Tls10,
    TlsProtocol::Ssl3,
];

const MODERN_PROTOCOLS: &[TlsProtocol] = &[TlsProtocol::Tls13, TlsProtocol::Tls12];

/// Outcome of a trust check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrustDecision {
    /// The identity is accepted without further checks.
    Accept,
    /// The backend's own verifier decides.
    Delegate,
}

/// How server certificates and hostnames are verified.
///
/// `Strict` is the default. `InsecureAcceptAll` disables certificate chain
/// and hostname verification for every connection made through the pool and
/// has to be requested explicitly.
///
/// The protocol list filters and validates only. ureq offers no version
/// setting, so connections negotiate whatever the backend supports,
/// including TLS 1.3. Pool creation fails when no listed protocol is
/// supported by the backend.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TrustPolicy {
    #[default]
    Strict,
    InsecureAcceptAll { protocols: Vec<TlsProtocol> },
}

impl TrustPolicy {
    pub fn insecure_accept_all() -> Self {
        Self::InsecureAcceptAll {
            protocols: LEGACY_PROTOCOLS.to_vec(),
        }
    }

    pub fn insecure_accept_all_with_protocols(
        protocols: impl IntoIterator<Item = TlsProtocol>,
    ) -> Self {
        Self::InsecureAcceptAll {
            protocols: protocols.into_iter().collect(),
        }
    }

    pub const fn is_insecure(&self) -> bool {
        matches!(self, Self::InsecureAcceptAll { .. })
    }

    /// Requested protocol list. It is checked against the backend when the
    /// pool is created but does not restrict the versions the backend offers.
    pub fn protocols(&self) -> &[TlsProtocol] {
        match self {
            Self::Strict => MODERN_PROTOCOLS,
            Self::InsecureAcceptAll { protocols } => protocols,
        }
    }

    /// Certificate chain check. `chain` holds DER-encoded certificates, leaf
    /// first; `auth_type` is the key exchange algorithm name.
    pub fn verify_certificate(&self, _chain: &[&[u8]], _auth_type: &str) -> TrustDecision {
        match self {
            Self::Strict => TrustDecision::Delegate,
            Self::InsecureAcceptAll { .. } => TrustDecision::Accept,
        }
    }

    pub fn verify_hostname(&self, _hostname: &str) -> TrustDecision {
        match self {
            Self::Strict => TrustDecision::Delegate,
            Self::InsecureAcceptAll { .. } => TrustDecision::Accept,
        }
    }

    fn skips_backend_verification(&self) -> bool {
        self.verify_certificate(&[], "") == TrustDecision::Accept
            && self.verify_hostname("") == TrustDecision::Accept
    }

    /// Intersects the requested protocols with what `backend` supports.
    pub(crate) fn negotiable_protocols(
        &self,
        backend: TlsBackend,
    ) -> Result<Vec<TlsProtocol>, Error> {
        let supported = backend.supported_protocols();
        let mut negotiable = Vec::new();
        for protocol in self.protocols() {
            if supported.contains(protocol) {
                if !negotiable.contains(protocol) {
                    negotiable.push(*protocol);
                }
            } else {
                warn!(
                    backend = backend.as_str(),
                    protocol = protocol.as_str(),
                    "tls protocol is not supported by backend; ignoring"
                );
            }
        }
        if negotiable.is_empty() {
            return Err(tls_config_error(
                backend,
                format!(
                    "none of the requested protocols ({}) are supported",
                    self.protocols()
                        .iter()
                        .map(|protocol| protocol.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ));
        }
        Ok(negotiable)
    }

    pub(crate) fn build_tls_config(
        &self,
        backend: TlsBackend,
    ) -> Result<ureq::tls::TlsConfig, Error> {
        if !backend.is_available() {
            return Err(Error::TlsBackendUnavailable {
                backend: backend.as_str(),
            });
        }
        let negotiable = self.negotiable_protocols(backend)?;
        debug!(
            backend = backend.as_str(),
            requested = ?negotiable,
            offered = ?backend.supported_protocols(),
            "tls protocol list validated; backend versions are offered"
        );

        let provider = match backend {
            TlsBackend::Rustls => ureq::tls::TlsProvider::Rustls,
            TlsBackend::NativeTls => ureq::tls::TlsProvider::NativeTls,
        };
        let insecure = self.skips_backend_verification();
        if insecure {
            warn!(
                backend = backend.as_str(),
                "tls certificate and hostname verification are DISABLED for this connection pool"
            );
        }

        Ok(ureq::tls::TlsConfig::builder()
            .provider(provider)
            .disable_verification(insecure)
            .build())
    }
}

pub(crate) fn tls_config_error(backend: TlsBackend, message: impl Into<String>) -> Error {
    Error::TlsConfig {
        backend: backend.as_str(),
        message: message.into(),
    }
}
