use http::Method;
use tracing::warn;

use crate::error::{Error, TimeoutPhase, TransportErrorKind};

#[derive(Clone, Debug)]
pub struct RetryDecision {
    pub attempt: u32,
    pub max_attempts: u32,
    pub method: Method,
    pub uri: String,
    pub transport_error_kind: Option<TransportErrorKind>,
    pub timeout_phase: Option<TimeoutPhase>,
    /// Copied from [`Error::is_pre_send`] for the failed attempt.
    pub pre_send: bool,
}

/// Re-sends a request whose previous attempt failed before any bytes were
/// written. Failures after transmission are never retried, whatever the
/// method.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub const fn disabled() -> Self {
        Self { max_retries: 0 }
    }

    pub const fn with_retries(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub const fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }

    pub fn should_retry_decision(&self, decision: &RetryDecision) -> bool {
        decision.attempt < decision.max_attempts && decision.pre_send
    }

    /// Runs `attempt_fn` until it succeeds, fails with an error that is not
    /// retryable, or attempts are exhausted. The last error is returned.
    pub(crate) fn run<T>(
        &self,
        method: &Method,
        redacted_uri: &str,
        mut attempt_fn: impl FnMut(u32) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let max_attempts = self.max_attempts();
        let mut attempt = 1_u32;
        loop {
            let error = match attempt_fn(attempt) {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let Some(decision) =
                retry_decision(&error, attempt, max_attempts, method, redacted_uri)
            else {
                return Err(error);
            };
            if !self.should_retry_decision(&decision) {
                return Err(error);
            }

            warn!(
                attempt,
                max_attempts,
                method = %method,
                uri = redacted_uri,
                error = %error,
                "retrying request after pre-send failure"
            );
            attempt += 1;
        }
    }
}

fn retry_decision(
    error: &Error,
    attempt: u32,
    max_attempts: u32,
    method: &Method,
    uri: &str,
) -> Option<RetryDecision> {
    let (transport_error_kind, timeout_phase) = match error {
        Error::Transport { kind, .. } => (Some(*kind), None),
        Error::Timeout { phase, .. } => (None, Some(*phase)),
        _ => return None,
    };
    Some(RetryDecision {
        attempt,
        max_attempts,
        method: method.clone(),
        uri: uri.to_owned(),
        transport_error_kind,
        timeout_phase,
        pre_send: error.is_pre_send(),
    })
}
