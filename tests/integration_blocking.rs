use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use poolhttp::prelude::{Error, HttpClient, PoolHandle, Request};
use poolhttp::{
    CONTENT_TYPE_APPLICATION_JSON, CONTENT_TYPE_APPLICATION_SOAP_XML, CONTENT_TYPE_TEXT_XML,
    TransportErrorKind, USER_AGENTS,
};
use serde_json::Value;

#[derive(Clone)]
struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl MockResponse {
    fn new(
        status: u16,
        headers: Vec<(impl Into<String>, impl Into<String>)>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
            body: body.into(),
        }
    }

    fn redirect(status: u16, location: &str) -> Self {
        Self::new(status, vec![("Location", location)], Vec::new())
    }
}

#[derive(Clone)]
enum MockAction {
    Respond(MockResponse),
    /// Answers 200 with the request body.
    Echo,
    /// Reads the request and closes the connection without answering.
    Hangup,
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

struct MockServer {
    base_url: String,
    served: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    fn start(actions: Vec<MockAction>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let served = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let served_clone = Arc::clone(&served);
        let captured_clone = Arc::clone(&captured);

        let join = thread::spawn(move || {
            let deadline = std::time::Instant::now() + Duration::from_secs(2);
            let mut action_index = 0;

            while action_index < actions.len() && std::time::Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        let request = read_request(&mut stream).ok();
                        served_clone.fetch_add(1, Ordering::SeqCst);
                        let action = &actions[action_index];
                        action_index += 1;

                        match action {
                            MockAction::Respond(response) => {
                                let _ = write_response(&mut stream, response);
                            }
                            MockAction::Echo => {
                                let body = request
                                    .as_ref()
                                    .map(|request| request.body.clone())
                                    .unwrap_or_default();
                                let response = MockResponse::new(
                                    200,
                                    vec![("Content-Type", "text/plain;charset=utf-8")],
                                    body,
                                );
                                let _ = write_response(&mut stream, &response);
                            }
                            MockAction::Hangup => {
                                let _ = stream.shutdown(Shutdown::Both);
                            }
                        }

                        if let Some(request) = request {
                            captured_clone
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            served,
            captured,
            join: Some(join),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn served_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.captured
            .lock()
            .expect("lock captured requests")
            .clone()
    }

    /// Waits for the server thread so every captured request is visible.
    fn finish(mut self) -> Vec<CapturedRequest> {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        self.requests()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if find_header_end(&raw).is_some() {
            break;
        }
    }

    let header_end = find_header_end(&raw).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed request without header terminator",
        )
    })?;

    let header_text = String::from_utf8_lossy(&raw[..header_end]);
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "missing request line")
    })?;
    let mut request_line_parts = request_line.split_whitespace();
    let method = request_line_parts.next().unwrap_or_default().to_owned();
    let path = request_line_parts.next().unwrap_or_default().to_owned();

    let mut headers = BTreeMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = raw[header_end + 4..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let body = &response.body;
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        body.len()
    );
    for (name, value) in &response.headers {
        raw.push_str(name);
        raw.push_str(": ");
        raw.push_str(value);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");

    stream.write_all(raw.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        301 => "Moved Permanently",
        302 => "Found",
        307 => "Temporary Redirect",
        404 => "Not Found",
        _ => "Unknown",
    }
}

fn respond(status: u16, body: &str) -> MockAction {
    MockAction::Respond(MockResponse::new(
        status,
        vec![("Content-Type", "text/plain;charset=utf-8")],
        body.as_bytes().to_vec(),
    ))
}

fn redirect(status: u16, location: &str) -> MockAction {
    MockAction::Respond(MockResponse::redirect(status, location))
}

fn client() -> HttpClient {
    HttpClient::builder()
        .pool(PoolHandle::new())
        .connect_timeout(Duration::from_secs(1))
        .socket_timeout(Duration::from_secs(1))
        .build()
        .expect("client should build")
}

#[test]
fn get_follows_moved_permanently_to_final_body() {
    let server = MockServer::start(vec![redirect(301, "/final"), respond(200, "ok")]);

    let body = client()
        .get(&server.url("/start"))
        .expect("redirected get should succeed");

    assert_eq!(body, "ok");
    let requests = server.finish();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].path, "/start");
    assert_eq!(requests[1].method, "GET");
    assert_eq!(requests[1].path, "/final");
}

#[test]
fn delete_follows_redirect_with_same_method() {
    let server = MockServer::start(vec![redirect(302, "/items/7"), respond(200, "deleted")]);

    let body = client()
        .delete(&server.url("/legacy/items/7"))
        .expect("redirected delete should succeed");

    assert_eq!(body, "deleted");
    let requests = server.finish();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "DELETE");
    assert_eq!(requests[1].method, "DELETE");
    assert_eq!(requests[1].path, "/items/7");
}

#[test]
fn raw_body_response_uses_declared_charset() {
    let server = MockServer::start(vec![MockAction::Respond(MockResponse::new(
        200,
        vec![("Content-Type", "text/plain; charset=GBK")],
        vec![0xD6, 0xD0, 0xCE, 0xC4],
    ))]);

    let body = client()
        .post_body(&server.url("/raw"), "ping", None)
        .expect("raw post should succeed");
    assert_eq!(body.as_deref(), Some("中文"));
}

#[test]
fn redirect_chain_returns_fourth_redirect_unchanged() {
    let server = MockServer::start(vec![
        redirect(302, "/hop-1"),
        redirect(302, "/hop-2"),
        redirect(302, "/hop-3"),
        redirect(302, "/hop-4"),
    ]);

    let response = client()
        .execute(Request::get(server.url("/start")))
        .expect("redirect chain should not fail")
        .expect("get always produces a response");

    assert_eq!(response.status().as_u16(), 302);
    assert_eq!(response.redirects(), 3);
    assert_eq!(
        response.headers().get("location").expect("location"),
        "/hop-4"
    );
    assert!(response.url().path().ends_with("/hop-3"));
    assert_eq!(server.served_count(), 4);
}

#[test]
fn other_redirect_statuses_are_not_followed() {
    let server = MockServer::start(vec![redirect(307, "/final")]);

    let response = client()
        .execute(Request::get(server.url("/start")))
        .expect("request should succeed")
        .expect("response");

    assert_eq!(response.status().as_u16(), 307);
    assert_eq!(response.redirects(), 0);
    assert_eq!(server.finish().len(), 1);
}

#[test]
fn post_form_is_urlencoded_and_echoed() {
    let server = MockServer::start(vec![MockAction::Echo]);

    let body = client()
        .post_form(&server.url("/echo"), [("code", "200"), ("status", "2")])
        .expect("form post should succeed");

    assert!(body.contains("code=200"));
    assert!(body.contains("status=2"));
    let requests = server.finish();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(
        requests[0]
            .headers
            .get("content-type")
            .map(String::as_str),
        Some("application/x-www-form-urlencoded; charset=UTF-8")
    );
}

#[test]
fn form_redirect_resubmits_the_same_post() {
    let server = MockServer::start(vec![redirect(302, "/moved"), MockAction::Echo]);

    let body = client()
        .post_form(&server.url("/submit"), [("code", "200"), ("status", "2")])
        .expect("redirected form post should succeed");

    assert_eq!(body, "code=200&status=2");
    let requests = server.finish();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].method, "POST");
    assert_eq!(requests[1].path, "/moved");
    assert_eq!(requests[1].body, requests[0].body);
}

#[test]
fn raw_post_does_not_follow_redirects() {
    let server = MockServer::start(vec![redirect(302, "/elsewhere")]);

    let response = client()
        .execute(
            Request::post_body(server.url("/items"), r#"{"name":"demo"}"#)
                .content_type(CONTENT_TYPE_APPLICATION_JSON),
        )
        .expect("raw post should succeed")
        .expect("non-blank raw post is sent");

    assert_eq!(response.status().as_u16(), 302);
    let requests = server.finish();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, br#"{"name":"demo"}"#.to_vec());
    assert_eq!(
        requests[0]
            .headers
            .get("content-type")
            .map(String::as_str),
        Some(CONTENT_TYPE_APPLICATION_JSON)
    );
}

#[test]
fn blank_raw_inputs_skip_the_network() {
    let client = client();
    let unreachable = "http://127.0.0.1:9/never";

    assert_eq!(client.post_body("", "{}", None).expect("no error"), None);
    assert_eq!(client.post_body("   ", "{}", None).expect("no error"), None);
    assert_eq!(client.put_body(unreachable, "", None).expect("no error"), None);
    assert_eq!(
        client.patch_body(unreachable, " \t", None).expect("no error"),
        None
    );
    assert_eq!(
        client
            .post_xml(unreachable, "", Some("Bearer t"), None)
            .expect("no error"),
        None
    );
    assert_eq!(
        client
            .post_soap(unreachable, "\n", Some("urn:Ping"))
            .expect("no error"),
        None
    );
    assert!(client.pool().stats().tracked_routes == 0);
}

#[test]
fn soap_request_sets_action_and_default_content_type() {
    let server = MockServer::start(vec![MockAction::Echo]);
    let envelope = "<soap:Envelope><soap:Body><Ping/></soap:Body></soap:Envelope>";

    let body = client()
        .post_soap(&server.url("/soap"), envelope, Some("urn:Ping"))
        .expect("soap post should succeed");

    assert_eq!(body.as_deref(), Some(envelope));
    let requests = server.finish();
    assert_eq!(
        requests[0].headers.get("soapaction").map(String::as_str),
        Some("urn:Ping")
    );
    assert_eq!(
        requests[0]
            .headers
            .get("content-type")
            .map(String::as_str),
        Some(CONTENT_TYPE_APPLICATION_SOAP_XML)
    );
}

#[test]
fn xml_request_only_sends_non_blank_credentials() {
    let server = MockServer::start(vec![MockAction::Echo]);

    client()
        .post_xml(&server.url("/xml"), "<ping/>", Some("Bearer token"), Some("  "))
        .expect("xml post should succeed");

    let requests = server.finish();
    let headers = &requests[0].headers;
    assert_eq!(
        headers.get("authorization").map(String::as_str),
        Some("Bearer token")
    );
    assert!(!headers.contains_key("cookie"));
    assert_eq!(
        headers.get("content-type").map(String::as_str),
        Some(CONTENT_TYPE_TEXT_XML)
    );
}

#[test]
fn keep_alive_is_negotiated_from_response_header() {
    let server = MockServer::start(vec![
        MockAction::Respond(MockResponse::new(
            200,
            vec![("Keep-Alive", "timeout=5, max=100")],
            b"ok".to_vec(),
        )),
        respond(200, "ok"),
    ]);
    let client = HttpClient::builder()
        .pool(PoolHandle::new())
        .keep_alive_timeout(Duration::from_millis(30))
        .build()
        .expect("client should build");

    let negotiated = client
        .execute(Request::get(server.url("/a")))
        .expect("request should succeed")
        .expect("response");
    assert_eq!(negotiated.keep_alive(), Duration::from_secs(5));

    let fallback = client
        .execute(Request::get(server.url("/b")))
        .expect("request should succeed")
        .expect("response");
    assert_eq!(fallback.keep_alive(), Duration::from_millis(60_000));
}

#[test]
fn user_agent_precedence() {
    let server = MockServer::start(vec![
        MockAction::Echo,
        MockAction::Echo,
        MockAction::Echo,
    ]);
    let handle = PoolHandle::new();
    let configured = HttpClient::builder()
        .pool(handle.clone())
        .user_agent("poolhttp-test/1.0")
        .build()
        .expect("client should build");
    let rotating = HttpClient::builder()
        .pool(handle)
        .build()
        .expect("client should build");

    configured
        .get(&server.url("/configured"))
        .expect("get should succeed");
    configured
        .execute(Request::get(server.url("/override")).user_agent("override/2.0"))
        .expect("get should succeed");
    rotating
        .get(&server.url("/rotating"))
        .expect("get should succeed");

    let requests = server.finish();
    let agent_of = |path: &str| {
        requests
            .iter()
            .find(|request| request.path == path)
            .and_then(|request| request.headers.get("user-agent").cloned())
            .expect("user agent header")
    };
    assert_eq!(agent_of("/configured"), "poolhttp-test/1.0");
    assert_eq!(agent_of("/override"), "override/2.0");
    assert!(USER_AGENTS.contains(&agent_of("/rotating").as_str()));
}

#[test]
fn response_text_uses_declared_or_requested_charset() {
    let server = MockServer::start(vec![
        MockAction::Respond(MockResponse::new(
            200,
            vec![("Content-Type", "text/plain; charset=GBK")],
            vec![0xD6, 0xD0, 0xCE, 0xC4],
        )),
        MockAction::Respond(MockResponse::new(
            200,
            Vec::<(String, String)>::new(),
            vec![0x63, 0x61, 0x66, 0xE9],
        )),
    ]);
    let client = client();

    assert_eq!(
        client.get(&server.url("/gbk")).expect("gbk body"),
        "中文"
    );
    let latin1 = client
        .execute_text(Request::get(server.url("/latin1")).encoding("ISO-8859-1"))
        .expect("latin1 body");
    assert_eq!(latin1.as_deref(), Some("café"));
}

#[test]
fn json_bodies_deserialize() {
    let server = MockServer::start(vec![MockAction::Respond(MockResponse::new(
        200,
        vec![("Content-Type", "application/json")],
        br#"{"ok":true}"#.to_vec(),
    ))]);

    let response = client()
        .execute(Request::get(server.url("/json")))
        .expect("request should succeed")
        .expect("response");
    let body: Value = response.json().expect("json body");
    assert_eq!(body["ok"], true);
}

#[test]
fn oversized_response_body_is_rejected() {
    let server = MockServer::start(vec![respond(200, "0123456789")]);
    let client = HttpClient::builder()
        .pool(PoolHandle::new())
        .max_response_body_bytes(4)
        .build()
        .expect("client should build");

    let error = client
        .get(&server.url("/large"))
        .expect_err("body exceeds limit");
    assert!(matches!(
        error,
        Error::ResponseBodyTooLarge {
            limit_bytes: 4,
            ..
        }
    ));
}

#[test]
fn failure_after_send_is_not_retried() {
    let server = MockServer::start(vec![MockAction::Hangup, respond(200, "late")]);
    let client = HttpClient::builder()
        .pool(PoolHandle::new())
        .retry_count(3)
        .socket_timeout(Duration::from_millis(500))
        .build()
        .expect("client should build");

    let error = client
        .execute(Request::post_body(server.url("/hangup"), "payload"))
        .expect_err("hang-up must surface");

    assert!(!error.is_pre_send());
    assert_eq!(server.served_count(), 1);
    assert_eq!(client.pool().stats().total_in_use, 0);
}

#[test]
fn refused_connection_is_a_pre_send_transport_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
        listener.local_addr().expect("probe address").port()
    };
    let client = HttpClient::builder()
        .pool(PoolHandle::new())
        .retry_count(2)
        .connect_timeout(Duration::from_millis(500))
        .build()
        .expect("client should build");

    let error = client
        .get(&format!("http://127.0.0.1:{port}/closed"))
        .expect_err("nothing listens on the port");

    assert!(error.is_pre_send());
    assert!(matches!(
        error,
        Error::Transport {
            kind: TransportErrorKind::Connect,
            ..
        }
    ));
    assert_eq!(client.pool().stats().total_in_use, 0);
}

#[test]
fn unsupported_scheme_is_rejected_before_checkout() {
    let error = client()
        .get("ftp://127.0.0.1/file")
        .expect_err("ftp is not supported");
    assert!(matches!(error, Error::InvalidUri { .. }));
}
