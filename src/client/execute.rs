use http::header::{CONTENT_TYPE, HeaderValue, USER_AGENT};
use http::{HeaderMap, Method, Uri};
use tracing::{debug, info_span, warn};

use crate::Result;
use crate::pool::Route;
use crate::redirect::{RedirectResolver, RedirectStep};
use crate::request::Request;
use crate::response::Response;
use crate::user_agent::random_user_agent;
use crate::util::{parse_header_value, parse_request_uri, redact_uri_for_logs};

use super::HttpClient;
use super::transport::{Lease, Timeouts, send};

impl HttpClient {
    /// Sends `request`, following redirects for the families that do, and
    /// reads the full response.
    ///
    /// Raw-body requests with a blank URL or body return `Ok(None)` without
    /// touching the network.
    pub fn execute(&self, request: Request) -> Result<Option<Response>> {
        if !request.is_sendable() {
            warn!(
                method = %request.method(),
                uri = %redact_uri_for_logs(request.url()),
                "skipping request with blank url or body"
            );
            return Ok(None);
        }
        self.send(&request).map(Some)
    }

    /// Like [`HttpClient::execute`], decoding the body as text.
    pub fn execute_text(&self, request: Request) -> Result<Option<String>> {
        self.execute(request)?
            .map(|response| response.text())
            .transpose()
    }

    pub fn get(&self, url: &str) -> Result<String> {
        self.send(&Request::get(url))?.text()
    }

    pub fn delete(&self, url: &str) -> Result<String> {
        self.send(&Request::delete(url))?.text()
    }

    pub fn post_form<K, V, I>(&self, url: &str, params: I) -> Result<String>
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.send(&Request::post_form(url).form_params(params))?.text()
    }

    pub fn post_body(
        &self,
        url: &str,
        body: &str,
        content_type: Option<&str>,
    ) -> Result<Option<String>> {
        let request = Request::post_body(url, body).content_type(content_type.unwrap_or_default());
        self.execute_text(request)
    }

    pub fn put_body(
        &self,
        url: &str,
        body: &str,
        content_type: Option<&str>,
    ) -> Result<Option<String>> {
        let request = Request::put_body(url, body).content_type(content_type.unwrap_or_default());
        self.execute_text(request)
    }

    pub fn patch_body(
        &self,
        url: &str,
        body: &str,
        content_type: Option<&str>,
    ) -> Result<Option<String>> {
        let request =
            Request::patch_body(url, body).content_type(content_type.unwrap_or_default());
        self.execute_text(request)
    }

    /// Posts an XML document; `Authorization` and `Cookie` are only sent when
    /// non-blank.
    pub fn post_xml(
        &self,
        url: &str,
        xml: &str,
        authorization: Option<&str>,
        cookie: Option<&str>,
    ) -> Result<Option<String>> {
        let request = Request::post_xml(url, xml)
            .authorization(authorization.unwrap_or_default())?
            .cookie(cookie.unwrap_or_default())?;
        self.execute_text(request)
    }

    pub fn post_soap(
        &self,
        url: &str,
        envelope: &str,
        soap_action: Option<&str>,
    ) -> Result<Option<String>> {
        let request =
            Request::post_soap(url, envelope).soap_action(soap_action.unwrap_or_default())?;
        self.execute_text(request)
    }

    fn send(&self, request: &Request) -> Result<Response> {
        let method = request.method();
        let mut current_uri = parse_request_uri(request.url())?;
        let body = request.encode_body()?;
        let headers = self.prepare_headers(request, body.as_ref().map(|(_, ct)| ct))?;
        let body = body.map(|(bytes, _)| bytes);

        let retry_policy = self.config.retry_policy();
        let mut resolver = RedirectResolver::new(request.follows_redirects());

        loop {
            let redacted_uri = redact_uri_for_logs(&current_uri.to_string());
            let hop = resolver.hops();
            let lease = retry_policy.run(method, &redacted_uri, |attempt| {
                let span = info_span!(
                    "poolhttp.request",
                    method = %method,
                    uri = %redacted_uri,
                    attempt,
                    hop
                );
                let _entered = span.enter();
                self.dispatch(method, &current_uri, &redacted_uri, &headers, body.as_deref())
            })?;

            match resolver.on_response(&current_uri, lease.status(), lease.headers()) {
                RedirectStep::Follow(next_uri) => {
                    debug!(
                        status = lease.status().as_u16(),
                        from = %redacted_uri,
                        to = %redact_uri_for_logs(&next_uri.to_string()),
                        hop = resolver.hops(),
                        "following redirect"
                    );
                    lease.discard(self.config.max_response_body_bytes, &redacted_uri);
                    current_uri = next_uri;
                }
                RedirectStep::Done(stop) => {
                    if stop.is_protocol_error() {
                        warn!(
                            status = lease.status().as_u16(),
                            uri = %redacted_uri,
                            reason = ?stop,
                            "redirect response without a usable location; returning it as-is"
                        );
                    }
                    let response = self.finish(lease, method, current_uri, &redacted_uri)?;
                    return Ok(response
                        .with_redirects(resolver.hops())
                        .with_requested_encoding(request.requested_encoding()));
                }
            }
        }
    }

    fn dispatch(
        &self,
        method: &Method,
        uri: &Uri,
        redacted_uri: &str,
        headers: &HeaderMap,
        body: Option<&[u8]>,
    ) -> Result<Lease> {
        let route = Route::from_uri(uri)?;
        let permit = self.pool.checkout(
            &route,
            self.config.connection_request_timeout,
            method,
            redacted_uri,
        )?;
        debug!(route = %route, "dispatching request");

        let timeouts = Timeouts {
            connect: self.config.connect_timeout,
            socket: self.config.socket_timeout,
        };
        let response = send(
            self.pool.agent(),
            method,
            uri,
            redacted_uri,
            headers,
            body,
            &timeouts,
        )?;
        Ok(Lease::new(response, permit))
    }

    fn finish(
        &self,
        lease: Lease,
        method: &Method,
        uri: Uri,
        redacted_uri: &str,
    ) -> Result<Response> {
        let keep_alive = self.pool.settings().keep_alive.negotiate(lease.headers());
        debug!(
            status = lease.status().as_u16(),
            keep_alive_ms = keep_alive.as_millis() as u64,
            "negotiated keep-alive"
        );
        let (status, headers, body) = lease.read_body(
            self.config.max_response_body_bytes,
            method,
            redacted_uri,
            self.config.socket_timeout,
        )?;
        Ok(Response::new(status, headers, body, uri, keep_alive))
    }

    fn prepare_headers(
        &self,
        request: &Request,
        content_type: Option<&HeaderValue>,
    ) -> Result<HeaderMap> {
        let mut headers = request.headers().clone();
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, content_type.clone());
        }

        let user_agent = match request.user_agent_override() {
            Some(user_agent) => Some(user_agent),
            None if headers.contains_key(USER_AGENT) => None,
            None => Some(
                self.config
                    .user_agent
                    .as_deref()
                    .unwrap_or_else(|| random_user_agent()),
            ),
        };
        if let Some(user_agent) = user_agent {
            headers.insert(
                USER_AGENT,
                parse_header_value(USER_AGENT.as_str(), user_agent)?,
            );
        }
        Ok(headers)
    }
}
