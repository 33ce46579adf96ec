use std::borrow::Cow;
use std::sync::Mutex;

use encoding_rs::Encoding;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Uri};

use crate::error::Error;

pub(crate) const DEFAULT_CHARSET: &str = "UTF-8";

const MAX_LOGGED_BODY_LEN: usize = 512;

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !is_blank(value))
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_request_uri(uri_text: &str) -> Result<Uri, Error> {
    let trimmed = uri_text.trim();
    let invalid = || Error::InvalidUri {
        uri: redact_uri_for_logs(uri_text),
    };
    let uri: Uri = trimmed.parse().map_err(|_| invalid())?;
    if uri.host().is_none() {
        return Err(invalid());
    }
    Ok(uri)
}

pub(crate) fn resolve_redirect_uri(current_uri: &Uri, location: &str) -> Option<Uri> {
    let base = url::Url::parse(&current_uri.to_string()).ok()?;
    let joined = base.join(location.trim()).ok()?;
    joined.as_str().parse().ok()
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

pub(crate) fn truncate_for_logs(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_LOGGED_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_LOGGED_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}

/// Extracts the `charset` parameter of a `Content-Type` value, if any.
pub(crate) fn content_type_charset(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|parameter| {
        let (name, value) = parameter.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        let value = value.trim().trim_matches('"');
        (!value.is_empty()).then_some(value)
    })
}

pub(crate) fn declared_charset(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(content_type_charset)
        .map(ToOwned::to_owned)
}

pub(crate) fn lookup_encoding(label: &str) -> Result<&'static Encoding, Error> {
    Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| Error::UnsupportedEncoding {
        encoding: label.to_owned(),
    })
}

pub(crate) fn decode_text(body: &[u8], charset: &str) -> Result<String, Error> {
    let encoding = lookup_encoding(charset)?;
    let (text, _, _) = encoding.decode(body);
    Ok(text.into_owned())
}

pub(crate) fn encode_text<'a>(text: &'a str, charset: &str) -> Result<Cow<'a, [u8]>, Error> {
    let encoding = lookup_encoding(charset)?;
    let (bytes, _, _) = encoding.encode(text);
    Ok(bytes)
}
