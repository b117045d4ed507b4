//! Wire routines shared by the request and response transports.
//!
//! # Responsibilities
//! - Buffer the header block up to `\r\n\r\n`, bounded by the header limit
//! - Split header lines into a `HeaderBag`
//! - Resolve the request target from `Host`
//! - Read a body bounded by `Content-Length` and the body limit
//! - Write a start line, headers and a chunked-out body
//!
//! # Design Decisions
//! - Limits are checked while reading, never after buffering everything
//! - Bytes read past the end of a message go back to the socket

use bytes::{Buf, BytesMut};

use crate::config::LimitsConfig;
use crate::http::{Body, HeaderBag, HttpError, StatusCode, Uri};
use crate::net::Socket;

pub const HEADER_SIZE_LIMIT: usize = 4096;
pub const DEFAULT_BODY_SIZE_LIMIT: usize = 131_072;

/// Bodies are written in pieces of this size.
pub const WRITE_CHUNK_SIZE: usize = 1024;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Size limits applied while reading a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpLimits {
    pub header_size_limit: usize,
    pub body_size_limit: usize,
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            header_size_limit: HEADER_SIZE_LIMIT,
            body_size_limit: DEFAULT_BODY_SIZE_LIMIT,
        }
    }
}

impl From<&LimitsConfig> for HttpLimits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            header_size_limit: config.header_size_limit,
            body_size_limit: config.body_size_limit,
        }
    }
}

/// What to do when a message has no `Content-Length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnknownLength {
    /// The message has no body.
    Empty,
    /// The body runs until the peer closes the stream.
    UntilClose,
}

/// A header block split off the stream.
#[derive(Debug)]
pub(crate) struct MessageHead {
    pub start_line: String,
    pub headers: HeaderBag,
    pub remainder: BytesMut,
}

/// Read until `\r\n\r\n` and split the block into start line and headers.
pub(crate) async fn read_head(
    socket: &Socket,
    limits: &HttpLimits,
) -> Result<MessageHead, HttpError> {
    let first = socket
        .read()
        .await?
        .ok_or_else(|| HttpError::bad_request("Cannot read message: socket stream is empty."))?;

    let mut buffer = BytesMut::from(&first[..]);
    let mut searched = 0;

    loop {
        // Leading CRLFs left over from earlier traffic.
        let blank = buffer
            .iter()
            .take_while(|b| **b == b'\r' || **b == b'\n')
            .count();
        if blank > 0 {
            buffer.advance(blank);
            searched = 0;
        }

        if let Some(end) = find(&buffer[searched..], HEAD_TERMINATOR).map(|at| at + searched) {
            let head = buffer.split_to(end + 2);
            buffer.advance(2);
            return split_head(&head, buffer);
        }
        searched = buffer.len().saturating_sub(HEAD_TERMINATOR.len() - 1);

        let length = buffer.len();
        let limit = limits.header_size_limit;
        if length > limit {
            return Err(HttpError::client(
                StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
                format!("Header size exceeded ({length} > {limit})"),
            ));
        }

        match socket.read().await? {
            Some(chunk) => buffer.extend_from_slice(&chunk),
            None => {
                return Err(HttpError::bad_request(
                    "Socket stream closed before the header block was complete.",
                ))
            }
        }
    }
}

fn split_head(head: &[u8], remainder: BytesMut) -> Result<MessageHead, HttpError> {
    let head = std::str::from_utf8(head)
        .map_err(|_| HttpError::bad_request("Header block is not valid UTF-8."))?;
    let (start_line, rest) = head
        .split_once("\r\n")
        .ok_or_else(|| HttpError::bad_request("Missing start line."))?;

    let headers = HeaderBag::parse(rest.split("\r\n"))
        .map_err(|e| HttpError::bad_request(format!("Invalid header line: {}", e.0)))?;

    Ok(MessageHead {
        start_line: start_line.to_string(),
        headers,
        remainder,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Resolve the effective request target from `Host` and the request path.
///
/// A missing port falls back to `local_port`. The path is split into path
/// and query on the first `?` when it is in origin form.
pub(crate) fn parse_host_header(
    host_value: Option<&str>,
    path: &str,
    local_port: u16,
) -> Result<Uri, HttpError> {
    let value = host_value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| HttpError::bad_request("Missing `Host` header"))?;
    let (host, port) =
        split_host(value).ok_or_else(|| HttpError::bad_request("Invalid `Host` header"))?;

    let (path, query) = match path.split_once('?') {
        Some((path, query)) if path.starts_with('/') => (path, query),
        _ => (path, ""),
    };

    Ok(Uri {
        scheme: "http".to_string(),
        host: host.to_string(),
        port: Some(port.unwrap_or(local_port)),
        path: path.to_string(),
        query: query.to_string(),
    })
}

/// `host[:port]` where host is a name/IPv4 literal or a bracketed IPv6 literal.
fn split_host(value: &str) -> Option<(&str, Option<u16>)> {
    let (host, port) = if value.starts_with('[') {
        let close = value.find(']')?;
        let (host, rest) = value.split_at(close + 1);
        let inner = &host[1..host.len() - 1];
        if inner.is_empty() || !inner.chars().all(|c| c.is_ascii_hexdigit() || c == ':') {
            return None;
        }
        match rest {
            "" => (host, None),
            rest => (host, Some(rest.strip_prefix(':')?)),
        }
    } else {
        let (host, port) = match value.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (value, None),
        };
        let valid_name = host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if host.is_empty() || !valid_name {
            return None;
        }
        (host, port)
    };

    let port = match port {
        None => None,
        Some(port) => {
            if port.starts_with('0') || port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit())
            {
                return None;
            }
            Some(port.parse::<u16>().ok()?)
        }
    };
    Some((host, port))
}

/// Read the message body that follows the header block.
///
/// `remainder` holds bytes already read past the header block. Returns the
/// body and the declared `Content-Length`, if usable.
pub(crate) async fn read_body(
    socket: &Socket,
    headers: &HeaderBag,
    remainder: BytesMut,
    limits: &HttpLimits,
    unknown: UnknownLength,
) -> Result<(Body, Option<usize>), HttpError> {
    let values = headers.get_all("content-length");
    if values.len() > 1 {
        return Err(HttpError::bad_request(
            "Multiple `Content-Length` headers given.",
        ));
    }

    let content_length = match values.first() {
        Some(value) if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => {
            Some(value.parse::<usize>().map_err(|_| {
                HttpError::client(StatusCode::PAYLOAD_TOO_LARGE, "Message body too large")
            })?)
        }
        _ => None,
    };

    let cap = limits.body_size_limit;
    let wanted = match (content_length, unknown) {
        (Some(length), _) => length.min(cap),
        (None, UnknownLength::Empty) => 0,
        // One byte past the cap tells "exactly at the limit" from "over it".
        (None, UnknownLength::UntilClose) => cap.saturating_add(1),
    };

    let mut buffer = remainder;
    let mut body = BytesMut::with_capacity(wanted.min(buffer.len().max(WRITE_CHUNK_SIZE)));
    let mut ended = false;

    while body.len() < wanted {
        if !buffer.is_empty() {
            let take = buffer.len().min(wanted - body.len());
            body.extend_from_slice(&buffer.split_to(take));
            continue;
        }
        match socket.read().await? {
            Some(chunk) => buffer.extend_from_slice(&chunk),
            None => {
                ended = true;
                break;
            }
        }
    }

    let too_large = match content_length {
        Some(length) => length > cap,
        None => body.len() > cap,
    };
    if too_large {
        return Err(HttpError::client(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Message body too large",
        ));
    }
    if ended && content_length.is_some_and(|length| body.len() < length) {
        return Err(HttpError::bad_request(
            "Socket stream closed before the message body was complete.",
        ));
    }

    socket.unread(&buffer);
    Ok((Body::from(body.freeze()), content_length))
}

/// Write a start line, the headers, a blank line and then the body.
pub(crate) async fn write_message(
    socket: &Socket,
    start_line: &str,
    headers: &HeaderBag,
    body: &mut Body,
) -> Result<(), HttpError> {
    let mut head = String::with_capacity(start_line.len() + 256);
    head.push_str(start_line);
    head.push_str("\r\n");
    head.push_str(&headers.serialize());
    head.push_str("\r\n");
    socket.write(head.as_bytes()).await?;

    while !body.eof() {
        socket.write(&body.read(WRITE_CHUNK_SIZE)).await?;
    }
    Ok(())
}

/// `\d+(\.\d+)?`
pub(crate) fn is_version(version: &str) -> bool {
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    match version.split_once('.') {
        Some((major, minor)) => digits(major) && digits(minor),
        None => digits(version),
    }
}
