//! Request and response values exchanged with the transports.

use std::fmt;

use bytes::Bytes;

use crate::http::HeaderBag;

/// An HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const SWITCHING_PROTOCOLS: Self = Self(101);
    pub const OK: Self = Self(200);
    pub const NO_CONTENT: Self = Self(204);
    pub const BAD_REQUEST: Self = Self(400);
    pub const NOT_FOUND: Self = Self(404);
    pub const METHOD_NOT_ALLOWED: Self = Self(405);
    pub const PAYLOAD_TOO_LARGE: Self = Self(413);
    pub const UPGRADE_REQUIRED: Self = Self(426);
    pub const REQUEST_HEADER_FIELDS_TOO_LARGE: Self = Self(431);
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
    pub const SERVICE_UNAVAILABLE: Self = Self(503);
    pub const HTTP_VERSION_NOT_SUPPORTED: Self = Self(505);

    /// Any three-digit code.
    pub fn from_u16(code: u16) -> Option<Self> {
        (100..=999).contains(&code).then_some(Self(code))
    }

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Standard reason phrase, or an empty string for unregistered codes.
    pub fn reason(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            301 => "Moved Permanently",
            302 => "Found",
            304 => "Not Modified",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            411 => "Length Required",
            413 => "Payload Too Large",
            414 => "URI Too Long",
            426 => "Upgrade Required",
            429 => "Too Many Requests",
            431 => "Request Header Fields Too Large",
            500 => "Internal Server Error",
            501 => "Not Implemented",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            505 => "HTTP Version Not Supported",
            _ => "",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.reason())
    }
}

/// A message body read in pieces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Body {
    data: Bytes,
    position: usize,
}

impl Body {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Take up to `n` unread bytes.
    pub fn read(&mut self, n: usize) -> Bytes {
        let end = self.data.len().min(self.position + n);
        let chunk = self.data.slice(self.position..end);
        self.position = end;
        chunk
    }

    pub fn eof(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Total length, read or not.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The whole body, regardless of how much was read.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl From<Bytes> for Body {
    fn from(data: Bytes) -> Self {
        Self { data, position: 0 }
    }
}

impl From<Vec<u8>> for Body {
    fn from(data: Vec<u8>) -> Self {
        Bytes::from(data).into()
    }
}

impl From<String> for Body {
    fn from(data: String) -> Self {
        Bytes::from(data).into()
    }
}

impl From<&'static str> for Body {
    fn from(data: &'static str) -> Self {
        Bytes::from_static(data.as_bytes()).into()
    }
}

/// Effective request target, resolved from the request path and `Host`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub query: String,
}

impl Uri {
    /// Origin-form target: path plus query.
    pub fn path_and_query(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        f.write_str(&self.path_and_query())
    }
}

/// A parsed HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    method: String,
    uri: Uri,
    version: String,
    pub headers: HeaderBag,
    body: Body,
    content_length: Option<usize>,
}

impl Request {
    pub fn new(
        method: impl Into<String>,
        uri: Uri,
        headers: HeaderBag,
        body: Body,
        content_length: Option<usize>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            uri,
            version: version.into(),
            headers,
            body,
            content_length,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Protocol version without the `HTTP/` prefix, e.g. `1.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Declared `Content-Length`, if the request carried a usable one.
    pub fn content_length(&self) -> Option<usize> {
        self.content_length
    }
}

/// Invoked once the response that carries it has been fully written.
pub type UpgradeHandler = Box<dyn FnOnce() + Send>;

/// An HTTP response, optionally carrying an upgrade hand-off.
pub struct Response {
    status: StatusCode,
    version: String,
    pub headers: HeaderBag,
    body: Body,
    upgrade: Option<UpgradeHandler>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: "1.1".to_string(),
            headers: HeaderBag::new(),
            body: Body::empty(),
            upgrade: None,
        }
    }

    /// A `text/plain` response.
    pub fn text(status: StatusCode, text: impl Into<String>) -> Self {
        let mut response = Self::new(status).with_body(text.into());
        response
            .headers
            .set("Content-Type", "text/plain; charset=utf-8");
        response
    }

    /// An `application/json` response.
    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        let mut response = Self::new(status).with_body(value.to_string());
        response.headers.set("Content-Type", "application/json");
        response
    }

    /// Replace the body and set `Content-Length` to match.
    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        let body = body.into();
        self.headers.set("Content-Length", body.len().to_string());
        self.body = body;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    /// Attach the hand-off run after this response is flushed.
    pub fn upgrade<F>(&mut self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.upgrade = Some(Box::new(handler));
    }

    pub fn take_upgrade_handler(&mut self) -> Option<UpgradeHandler> {
        self.upgrade.take()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("upgrade", &self.upgrade.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_reads_in_chunks() {
        let mut body = Body::from(vec![7u8; 2500]);
        assert_eq!(body.read(1024).len(), 1024);
        assert_eq!(body.read(1024).len(), 1024);
        assert!(!body.eof());
        assert_eq!(body.read(1024).len(), 452);
        assert!(body.eof());
        assert!(body.read(1024).is_empty());
    }

    #[test]
    fn json_response_sets_length_and_type() {
        let response = Response::json(
            StatusCode::BAD_REQUEST,
            &serde_json::json!({ "status": "nope" }),
        );
        assert_eq!(response.headers.get("content-type"), Some("application/json"));
        assert_eq!(
            response.headers.get("content-length"),
            Some(response.body().len().to_string().as_str())
        );
    }

    #[test]
    fn uri_display() {
        let uri = Uri {
            scheme: "http".into(),
            host: "[::1]".into(),
            port: Some(9000),
            path: "/chat".into(),
            query: "room=1".into(),
        };
        assert_eq!(uri.to_string(), "http://[::1]:9000/chat?room=1");
        assert_eq!(uri.path_and_query(), "/chat?room=1");
    }

    #[test]
    fn status_reason_phrases() {
        assert_eq!(StatusCode::SWITCHING_PROTOCOLS.reason(), "Switching Protocols");
        assert_eq!(StatusCode::from_u16(299).map(|s| s.reason()), Some(""));
        assert!(StatusCode::from_u16(42).is_none());
    }
}
