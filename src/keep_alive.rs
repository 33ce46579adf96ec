use std::time::Duration;

use http::HeaderMap;
use http::header::HeaderName;

const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

pub const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_millis(60_000);

/// Fallback values below this many milliseconds are treated as a
/// misconfigured seconds value and replaced by [`DEFAULT_KEEP_ALIVE_TIMEOUT`].
const MIN_FALLBACK_MILLIS: u128 = 60;

/// Decides how long an idle pooled connection may be kept alive.
///
/// ureq has no per-connection idle deadline, so pooled connections always
/// expire after [`KeepAliveNegotiator::fallback`]. The value negotiated from
/// a response is reported on [`crate::Response::keep_alive`] and logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeepAliveNegotiator {
    fallback: Duration,
}

impl KeepAliveNegotiator {
    pub fn new(fallback: Duration) -> Self {
        let fallback = if fallback.as_millis() < MIN_FALLBACK_MILLIS {
            DEFAULT_KEEP_ALIVE_TIMEOUT
        } else {
            fallback
        };
        Self { fallback }
    }

    pub fn fallback(&self) -> Duration {
        self.fallback
    }

    /// Returns the server's `Keep-Alive: timeout=N` hint as `N` seconds, or
    /// the fallback when no element carries a usable value.
    pub fn negotiate(&self, headers: &HeaderMap) -> Duration {
        server_timeout(headers).unwrap_or(self.fallback)
    }
}

impl Default for KeepAliveNegotiator {
    fn default() -> Self {
        Self::new(DEFAULT_KEEP_ALIVE_TIMEOUT)
    }
}

fn server_timeout(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get_all(KEEP_ALIVE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(header_element)
        .find_map(|(name, value)| {
            if !name.eq_ignore_ascii_case("timeout") {
                return None;
            }
            let seconds = value?.parse::<u64>().ok()?;
            Some(Duration::from_millis(seconds.saturating_mul(1000)))
        })
}

// `name=value; param=...`; parameters after the first `;` belong to the
// element and are not elements themselves.
fn header_element(element: &str) -> Option<(&str, Option<&str>)> {
    let head = element.split(';').next()?.trim();
    if head.is_empty() {
        return None;
    }
    match head.split_once('=') {
        Some((name, value)) => Some((name.trim(), Some(value.trim().trim_matches('"')))),
        None => Some((head, None)),
    }
}
