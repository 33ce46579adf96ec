use std::io::Read;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use tracing::warn;

use crate::Result;
use crate::error::{Error, TimeoutPhase, TransportErrorKind};
use crate::limiters::RoutePermit;

pub(super) struct Timeouts {
    pub(super) connect: Duration,
    pub(super) socket: Duration,
}

impl Timeouts {
    fn for_phase(&self, phase: TimeoutPhase) -> Duration {
        match phase {
            TimeoutPhase::Connect => self.connect,
            TimeoutPhase::ConnectionRequest | TimeoutPhase::Socket => self.socket,
        }
    }
}

pub(super) fn send(
    agent: &ureq::Agent,
    method: &Method,
    uri: &Uri,
    redacted_uri: &str,
    headers: &HeaderMap,
    body: Option<&[u8]>,
    timeouts: &Timeouts,
) -> Result<ureq::http::Response<ureq::Body>> {
    let mut builder = ureq::http::Request::builder()
        .method(method.clone())
        .uri(uri.clone());
    for (name, value) in headers {
        builder = builder.header(name, value);
    }

    match body {
        Some(body) => {
            let request = builder
                .body(body.to_vec())
                .map_err(|source| Error::RequestBuild { source })?;
            run_configured_request(agent, request, method, redacted_uri, timeouts)
        }
        None => {
            let request = builder
                .body(())
                .map_err(|source| Error::RequestBuild { source })?;
            run_configured_request(agent, request, method, redacted_uri, timeouts)
        }
    }
}

fn run_configured_request<S: ureq::AsSendBody>(
    agent: &ureq::Agent,
    request: ureq::http::Request<S>,
    method: &Method,
    redacted_uri: &str,
    timeouts: &Timeouts,
) -> Result<ureq::http::Response<ureq::Body>> {
    let configured_request = agent
        .configure_request(request)
        .timeout_resolve(Some(timeouts.connect))
        .timeout_connect(Some(timeouts.connect))
        .timeout_send_request(Some(timeouts.socket))
        .timeout_send_body(Some(timeouts.socket))
        .timeout_recv_response(Some(timeouts.socket))
        .timeout_recv_body(Some(timeouts.socket))
        .build();

    agent
        .run(configured_request)
        .map_err(|source| map_ureq_error(source, method, redacted_uri, timeouts))
}

fn map_ureq_error(
    error: ureq::Error,
    method: &Method,
    redacted_uri: &str,
    timeouts: &Timeouts,
) -> Error {
    match error {
        ureq::Error::Timeout(timeout) => {
            let phase = classify_ureq_timeout(timeout);
            Error::Timeout {
                phase,
                timeout_ms: timeouts.for_phase(phase).as_millis(),
                method: method.clone(),
                uri: redacted_uri.to_owned(),
            }
        }
        other => Error::Transport {
            kind: classify_ureq_transport_error(&other),
            method: method.clone(),
            uri: redacted_uri.to_owned(),
            source: Box::new(other),
        },
    }
}

pub(super) fn classify_ureq_timeout(timeout: ureq::Timeout) -> TimeoutPhase {
    match timeout {
        ureq::Timeout::Resolve | ureq::Timeout::Connect => TimeoutPhase::Connect,
        _ => TimeoutPhase::Socket,
    }
}

pub(super) fn classify_ureq_transport_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Tls(_) => TransportErrorKind::Tls,
        #[cfg(feature = "tls-rustls")]
        ureq::Error::Rustls(_) => TransportErrorKind::Tls,
        #[cfg(feature = "tls-native")]
        ureq::Error::NativeTls(_) => TransportErrorKind::Tls,
        #[cfg(feature = "tls-native")]
        ureq::Error::Der(_) => TransportErrorKind::Tls,
        ureq::Error::Pem(_) => TransportErrorKind::Tls,
        ureq::Error::ConnectionFailed => TransportErrorKind::Connect,
        ureq::Error::Io(source) => classify_io_error(source),
        _ => TransportErrorKind::Other,
    }
}

fn classify_io_error(source: &std::io::Error) -> TransportErrorKind {
    match source.kind() {
        std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
        std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::AddrNotAvailable
        | std::io::ErrorKind::HostUnreachable
        | std::io::ErrorKind::NetworkUnreachable => TransportErrorKind::Connect,
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::TimedOut
        | std::io::ErrorKind::WouldBlock => TransportErrorKind::Read,
        _ => TransportErrorKind::Other,
    }
}

fn wrapped_ureq_error(io_error: &std::io::Error) -> Option<&ureq::Error> {
    io_error
        .get_ref()
        .and_then(|source| source.downcast_ref::<ureq::Error>())
}

/// A response whose body still occupies a pooled connection, together with
/// the checkout permit for that connection.
///
/// Reading the body to the end hands the connection back to the pool.
/// Dropping a lease with unread body closes the connection instead. Fields
/// drop in order, so the connection is settled before the permit frees up.
pub(super) struct Lease {
    response: ureq::http::Response<ureq::Body>,
    _permit: RoutePermit,
}

impl Lease {
    pub(super) fn new(response: ureq::http::Response<ureq::Body>, permit: RoutePermit) -> Self {
        Self {
            response,
            _permit: permit,
        }
    }

    pub(super) fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub(super) fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    /// Reads the whole body, failing once it exceeds `max_bytes`.
    pub(super) fn read_body(
        mut self,
        max_bytes: usize,
        method: &Method,
        redacted_uri: &str,
        socket_timeout: Duration,
    ) -> Result<(StatusCode, HeaderMap, Bytes)> {
        let body = read_all_body_limited(&mut self.response, max_bytes).map_err(|error| {
            match error {
                ReadBodyError::TooLarge { actual_bytes } => Error::ResponseBodyTooLarge {
                    limit_bytes: max_bytes,
                    actual_bytes,
                    method: method.clone(),
                    uri: redacted_uri.to_owned(),
                },
                ReadBodyError::Read(source) => {
                    if let Some(ureq::Error::Timeout(_)) = wrapped_ureq_error(&source) {
                        return Error::Timeout {
                            phase: TimeoutPhase::Socket,
                            timeout_ms: socket_timeout.as_millis(),
                            method: method.clone(),
                            uri: redacted_uri.to_owned(),
                        };
                    }
                    Error::ReadBody {
                        method: method.clone(),
                        uri: redacted_uri.to_owned(),
                        source: Box::new(source),
                    }
                }
            }
        })?;
        let status = self.response.status();
        let headers = std::mem::take(self.response.headers_mut());
        Ok((status, headers, body))
    }

    /// Drains at most `max_bytes` of the body so the connection can be
    /// reused. Failures are logged and the connection is closed.
    pub(super) fn discard(mut self, max_bytes: usize, redacted_uri: &str) {
        let mut reader = self
            .response
            .body_mut()
            .as_reader()
            .take(max_bytes as u64);
        if let Err(error) = std::io::copy(&mut reader, &mut std::io::sink()) {
            warn!(
                uri = redacted_uri,
                error = %error,
                "failed to drain response body; closing connection"
            );
        }
    }
}

pub(super) enum ReadBodyError {
    Read(std::io::Error),
    TooLarge { actual_bytes: usize },
}

pub(super) fn read_all_body_limited(
    response: &mut ureq::http::Response<ureq::Body>,
    max_bytes: usize,
) -> std::result::Result<Bytes, ReadBodyError> {
    let mut reader = response.body_mut().as_reader();
    let mut collected = Vec::new();
    let mut chunk = [0_u8; 8192];
    let mut total_len = 0_usize;

    loop {
        let read = reader.read(&mut chunk).map_err(ReadBodyError::Read)?;
        if read == 0 {
            break;
        }
        total_len = total_len.saturating_add(read);
        if total_len > max_bytes {
            return Err(ReadBodyError::TooLarge {
                actual_bytes: total_len,
            });
        }
        collected.extend_from_slice(&chunk[..read]);
    }

    Ok(Bytes::from(collected))
}
