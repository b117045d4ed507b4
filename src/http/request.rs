//! Request-side HTTP transport.

use crate::http::transport::{self, MessageHead, UnknownLength};
use crate::http::{HttpError, HttpLimits, Request};
use crate::net::Socket;

/// Reads requests off a socket and writes them back out.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpRequestTransport {
    limits: HttpLimits,
}

impl HttpRequestTransport {
    pub fn new(limits: HttpLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &HttpLimits {
        &self.limits
    }

    /// Parse one request from the socket.
    ///
    /// Bytes that arrive after the request body are left on the socket.
    pub async fn receive(&self, socket: &Socket) -> Result<Request, HttpError> {
        let MessageHead {
            start_line,
            headers,
            remainder,
        } = transport::read_head(socket, &self.limits).await?;
        let (method, path, version) = parse_start_line(&start_line)
            .ok_or_else(|| HttpError::bad_request("Invalid start line in request"))?;

        let uri =
            transport::parse_host_header(headers.get("host"), path, socket.local_addr().port())?;

        let (body, content_length) = transport::read_body(
            socket,
            &headers,
            remainder,
            &self.limits,
            UnknownLength::Empty,
        )
        .await?;

        Ok(Request::new(
            method,
            uri,
            headers,
            body,
            content_length,
            version,
        ))
    }

    /// Write a request in wire form.
    pub async fn send(&self, mut request: Request, socket: &Socket) -> Result<(), HttpError> {
        let start_line = format!(
            "{} {} HTTP/{}",
            request.method(),
            request.uri().path_and_query(),
            request.version()
        );
        let headers = request.headers.clone();
        transport::write_message(socket, &start_line, &headers, request.body_mut()).await
    }
}

/// `METHOD SP PATH SP HTTP/VERSION`
fn parse_start_line(line: &str) -> Option<(&str, &str, &str)> {
    let mut parts = line.split(' ');
    let method = parts.next()?;
    let path = parts.next()?;
    let version = parts.next()?.strip_prefix("HTTP/")?;
    if parts.next().is_some() {
        return None;
    }

    let valid_method = !method.is_empty() && method.bytes().all(|b| b.is_ascii_alphabetic());
    let valid_path = !path.is_empty() && !path.bytes().any(|b| b.is_ascii_control());
    (valid_method && valid_path && transport::is_version(version)).then_some((method, path, version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Body, HeaderBag, StatusCode, Uri};
    use crate::net::socket::tests::pair;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn transport() -> HttpRequestTransport {
        HttpRequestTransport::default()
    }

    #[tokio::test]
    async fn parses_method_target_and_host() {
        let (socket, mut peer) = pair(8192);
        peer.write_all(b"\r\nGET /chat?room=7 HTTP/1.1\r\nHost: example.com:8080\r\nUpgrade: websocket\r\n\r\n")
            .await
            .unwrap();

        let request = transport().receive(&socket).await.unwrap();
        assert_eq!(request.method(), "GET");
        assert_eq!(request.version(), "1.1");
        assert_eq!(request.uri().host, "example.com");
        assert_eq!(request.uri().port, Some(8080));
        assert_eq!(request.uri().path, "/chat");
        assert_eq!(request.uri().query, "room=7");
        assert_eq!(request.headers.get("upgrade"), Some("websocket"));
        assert!(request.body().is_empty());
    }

    #[tokio::test]
    async fn port_defaults_to_local_port() {
        let (socket, mut peer) = pair(8192);
        peer.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let request = transport().receive(&socket).await.unwrap();
        assert_eq!(request.uri().port, Some(9000));
    }

    #[tokio::test]
    async fn reads_declared_body_and_keeps_pipelined_bytes() {
        let (socket, mut peer) = pair(8192);
        peer.write_all(b"POST /submit HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhelloNEXT")
            .await
            .unwrap();

        let request = transport().receive(&socket).await.unwrap();
        assert_eq!(request.body().as_bytes(), b"hello");
        assert_eq!(request.content_length(), Some(5));

        let rest = socket.read().await.unwrap().unwrap();
        assert_eq!(&rest[..], b"NEXT");
    }

    #[tokio::test]
    async fn body_split_across_reads() {
        let (socket, mut peer) = pair(8192);
        let writer = tokio::spawn(async move {
            peer.write_all(b"POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 10\r\n\r\n01234")
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            peer.write_all(b"56789").await.unwrap();
            peer
        });

        let request = transport().receive(&socket).await.unwrap();
        assert_eq!(request.body().as_bytes(), b"0123456789");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_duplicate_content_length() {
        let (socket, mut peer) = pair(8192);
        peer.write_all(b"POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 1\r\nContent-Length: 1\r\n\r\nx")
            .await
            .unwrap();

        let err = transport().receive(&socket).await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
        assert_eq!(err.to_string(), "Multiple `Content-Length` headers given.");
    }

    #[tokio::test]
    async fn rejects_malformed_start_line() {
        for line in ["GET /\r\n", "GET / FTP/1.1\r\n", "GET  / HTTP/1.1\r\n", "GET / HTTP/1.1 extra\r\n"] {
            let (socket, mut peer) = pair(8192);
            peer.write_all(format!("{line}Host: h\r\n\r\n").as_bytes())
                .await
                .unwrap();
            let err = transport().receive(&socket).await.unwrap_err();
            assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST), "line {line:?}");
        }
    }

    #[tokio::test]
    async fn missing_host_is_bad_request() {
        let (socket, mut peer) = pair(8192);
        peer.write_all(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n")
            .await
            .unwrap();

        let err = transport().receive(&socket).await.unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn oversized_header_block_rejected_before_body() {
        let (socket, mut peer) = pair(16 * 1024);
        let limits = HttpLimits {
            header_size_limit: 64,
            ..HttpLimits::default()
        };
        let mut raw = b"GET / HTTP/1.1\r\nHost: h\r\nX-Filler: ".to_vec();
        raw.extend(std::iter::repeat(b'a').take(200));
        peer.write_all(&raw).await.unwrap();

        let err = HttpRequestTransport::new(limits)
            .receive(&socket)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE));
    }

    #[tokio::test]
    async fn declared_body_over_cap_is_rejected() {
        let (socket, mut peer) = pair(16 * 1024);
        let limits = HttpLimits {
            body_size_limit: 8,
            ..HttpLimits::default()
        };
        peer.write_all(b"POST / HTTP/1.1\r\nHost: h\r\nContent-Length: 100\r\n\r\n0123456789")
            .await
            .unwrap();

        let err = HttpRequestTransport::new(limits)
            .receive(&socket)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::PAYLOAD_TOO_LARGE));
    }

    #[tokio::test]
    async fn empty_stream_is_bad_request() {
        let (socket, peer) = pair(64);
        drop(peer);

        let err = transport().receive(&socket).await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot read message: socket stream is empty.");
    }

    #[tokio::test]
    async fn send_writes_wire_form() {
        let (socket, mut peer) = pair(8192);
        let mut headers = HeaderBag::new();
        headers.set("Host", "example.com");
        headers.set("Content-Length", "2");
        let uri = Uri {
            scheme: "http".into(),
            host: "example.com".into(),
            port: Some(80),
            path: "/a".into(),
            query: "b=1".into(),
        };
        let request = Request::new("PUT", uri, headers, Body::from("hi"), Some(2), "1.1");

        transport().send(request, &socket).await.unwrap();
        socket.close().await;

        let mut wire = String::new();
        peer.read_to_string(&mut wire).await.unwrap();
        assert_eq!(
            wire,
            "PUT /a?b=1 HTTP/1.1\r\nHost: example.com\r\nContent-Length: 2\r\n\r\nhi"
        );
    }
}
