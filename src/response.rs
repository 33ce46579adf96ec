use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Uri};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::Result;
use crate::error::Error;
use crate::util::{
    DEFAULT_CHARSET, declared_charset, decode_text, lookup_encoding, truncate_for_logs,
};

/// A fully read response. The pooled connection it came from has already
/// been released when this value exists.
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    url: Uri,
    keep_alive: Duration,
    redirects: u32,
    requested_encoding: Option<String>,
}

impl Response {
    pub(crate) fn new(
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
        url: Uri,
        keep_alive: Duration,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            url,
            keep_alive,
            redirects: 0,
            requested_encoding: None,
        }
    }

    pub(crate) fn with_redirects(mut self, redirects: u32) -> Self {
        self.redirects = redirects;
        self
    }

    pub(crate) fn with_requested_encoding(mut self, encoding: Option<&str>) -> Self {
        self.requested_encoding = encoding.map(ToOwned::to_owned);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// URL of the request that produced this response, after redirects.
    pub fn url(&self) -> &Uri {
        &self.url
    }

    /// Idle lifetime negotiated from this response's `Keep-Alive` header.
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn redirects(&self) -> u32 {
        self.redirects
    }

    /// The charset [`Response::text`] decodes with: the encoding requested on
    /// the call, else a recognised `Content-Type` charset, else UTF-8.
    pub fn charset(&self) -> String {
        if let Some(requested) = &self.requested_encoding {
            return requested.clone();
        }
        declared_charset(&self.headers)
            .filter(|declared| lookup_encoding(declared).is_ok())
            .unwrap_or_else(|| DEFAULT_CHARSET.to_owned())
    }

    /// Decodes the body with [`Response::charset`].
    ///
    /// An unknown requested encoding is an `UnsupportedEncoding` error. An
    /// unknown charset declared by the server decodes as UTF-8.
    pub fn text(&self) -> Result<String> {
        if self.requested_encoding.is_none()
            && let Some(declared) = declared_charset(&self.headers)
            && lookup_encoding(&declared).is_err()
        {
            warn!(
                charset = %declared,
                uri = %self.url,
                "unknown response charset; decoding as UTF-8"
            );
        }
        decode_text(&self.body, &self.charset())
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body).map_err(|source| Error::Deserialize {
            source,
            body: truncate_for_logs(&self.body),
        })
    }
}
