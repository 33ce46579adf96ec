use http::header::{AUTHORIZATION, COOKIE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;

use crate::Result;
use crate::error::Error;
use crate::util::{
    DEFAULT_CHARSET, content_type_charset, encode_text, is_blank, non_blank, parse_header_name,
    parse_header_value,
};

pub const CONTENT_TYPE_APPLICATION_JSON: &str = "application/json;charset=utf-8";
pub const APPLICATION_OCTET_STREAM: &str = "application/octet-stream;charset=utf-8";
pub const CONTENT_TYPE_APPLICATION_SOAP_XML: &str = "application/soap+xml;charset=utf-8";
pub const CONTENT_TYPE_TEXT_XML: &str = "text/xml;charset=utf-8";
pub const CONTENT_TYPE_TEXT_PLAIN: &str = "text/plain;charset=utf-8";
pub const CONTENT_TYPE_FORM_URLENCODED: &str = "application/x-www-form-urlencoded; charset=UTF-8";

pub const SOAP_ACTION: &str = "SOAPAction";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestBody {
    /// Name/value pairs sent form-urlencoded as UTF-8.
    Form(Vec<(String, String)>),
    /// A caller-built payload encoded in the charset of `content_type`.
    Raw {
        content: String,
        content_type: String,
    },
}

/// One call against the client: method, target, headers and an optional
/// body.
///
/// Constructors pick the request family. `get`, `delete` and `post_form`
/// follow redirects; the raw-body families (`post_body`, `put_body`,
/// `patch_body`, `post_xml`, `post_soap`) never do.
#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<RequestBody>,
    encoding: Option<String>,
    user_agent: Option<String>,
    follow_redirects: bool,
}

impl Request {
    fn new(method: Method, url: impl Into<String>, follow_redirects: bool) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            encoding: None,
            user_agent: None,
            follow_redirects,
        }
    }

    fn raw(
        method: Method,
        url: impl Into<String>,
        content: impl Into<String>,
        content_type: &str,
    ) -> Self {
        let mut request = Self::new(method, url, false);
        request.body = Some(RequestBody::Raw {
            content: content.into(),
            content_type: content_type.to_owned(),
        });
        request
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url, true)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url, true)
    }

    /// A form POST with no parameters yet; add them with
    /// [`Request::form_param`] or [`Request::form`].
    pub fn post_form(url: impl Into<String>) -> Self {
        let mut request = Self::new(Method::POST, url, true);
        request.body = Some(RequestBody::Form(Vec::new()));
        request
    }

    pub fn post_body(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::raw(Method::POST, url, body, CONTENT_TYPE_TEXT_PLAIN)
    }

    pub fn put_body(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::raw(Method::PUT, url, body, CONTENT_TYPE_TEXT_PLAIN)
    }

    pub fn patch_body(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::raw(Method::PATCH, url, body, CONTENT_TYPE_TEXT_PLAIN)
    }

    pub fn post_xml(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::raw(Method::POST, url, body, CONTENT_TYPE_TEXT_XML)
    }

    pub fn post_soap(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self::raw(Method::POST, url, body, CONTENT_TYPE_APPLICATION_SOAP_XML)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    /// Inserts every `(name, value)` pair; later pairs overwrite earlier ones
    /// with the same name.
    pub fn try_headers<K, V, I>(mut self, headers: I) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (name, value) in headers {
            self = self.try_header(name.as_ref(), value.as_ref())?;
        }
        Ok(self)
    }

    pub fn cookie(self, cookie: &str) -> Result<Self> {
        self.try_header_if_present(COOKIE.as_str(), cookie)
    }

    pub fn authorization(self, authorization: &str) -> Result<Self> {
        self.try_header_if_present(AUTHORIZATION.as_str(), authorization)
    }

    pub fn soap_action(self, soap_action: &str) -> Result<Self> {
        self.try_header_if_present(SOAP_ACTION, soap_action)
    }

    fn try_header_if_present(self, name: &str, value: &str) -> Result<Self> {
        if is_blank(value) {
            return Ok(self);
        }
        self.try_header(name, value)
    }

    /// Appends a form parameter, turning the body into a form body if it was
    /// not one.
    pub fn form_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let pair = (name.into(), value.into());
        match &mut self.body {
            Some(RequestBody::Form(pairs)) => pairs.push(pair),
            _ => self.body = Some(RequestBody::Form(vec![pair])),
        }
        self
    }

    /// Like [`Request::form_param`]; a missing value is sent as empty.
    pub fn form_param_opt<V>(self, name: impl Into<String>, value: Option<V>) -> Self
    where
        V: Into<String>,
    {
        self.form_param(name, value.map(Into::into).unwrap_or_default())
    }

    pub fn form_params<K, V, I>(self, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        pairs
            .into_iter()
            .fold(self, |request, (name, value)| request.form_param(name, value))
    }

    pub fn form<T>(self, params: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let encoded =
            serde_urlencoded::to_string(params).map_err(|source| Error::SerializeForm { source })?;
        Ok(self.form_params(
            url::form_urlencoded::parse(encoded.as_bytes())
                .map(|(name, value)| (name.into_owned(), value.into_owned())),
        ))
    }

    /// Overrides the content type of a raw body. Blank values keep the
    /// family default; form and body-less requests ignore it.
    pub fn content_type(mut self, content_type: &str) -> Self {
        if let Some(RequestBody::Raw {
            content_type: current,
            ..
        }) = &mut self.body
            && !is_blank(content_type)
        {
            *current = content_type.trim().to_owned();
        }
        self
    }

    /// Character encoding used to decode the response body.
    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn requested_encoding(&self) -> Option<&str> {
        non_blank(self.encoding.as_deref())
    }

    pub fn user_agent_override(&self) -> Option<&str> {
        non_blank(self.user_agent.as_deref())
    }

    pub fn follows_redirects(&self) -> bool {
        self.follow_redirects
    }

    /// Raw-body requests with a blank URL or a blank body are not sent.
    pub fn is_sendable(&self) -> bool {
        match &self.body {
            Some(RequestBody::Raw { content, .. }) => !is_blank(&self.url) && !is_blank(content),
            _ => true,
        }
    }

    /// Serialized body bytes and their `Content-Type`.
    pub(crate) fn encode_body(&self) -> Result<Option<(Vec<u8>, HeaderValue)>> {
        let Some(body) = &self.body else {
            return Ok(None);
        };
        match body {
            RequestBody::Form(pairs) => {
                let encoded = serde_urlencoded::to_string(pairs)
                    .map_err(|source| Error::SerializeForm { source })?;
                Ok(Some((
                    encoded.into_bytes(),
                    HeaderValue::from_static(CONTENT_TYPE_FORM_URLENCODED),
                )))
            }
            RequestBody::Raw {
                content,
                content_type,
            } => {
                let charset = content_type_charset(content_type).unwrap_or(DEFAULT_CHARSET);
                let bytes = encode_text(content, charset)?.into_owned();
                let content_type = parse_header_value("content-type", content_type)?;
                Ok(Some((bytes, content_type)))
            }
        }
    }
}
