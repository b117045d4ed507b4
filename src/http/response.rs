//! Response-side HTTP transport.

use crate::http::transport::{self, MessageHead, UnknownLength};
use crate::http::{HttpError, HttpLimits, Response, StatusCode};
use crate::net::Socket;

/// Writes responses to a socket and reads them back.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpResponseTransport {
    limits: HttpLimits,
}

impl HttpResponseTransport {
    pub fn new(limits: HttpLimits) -> Self {
        Self { limits }
    }

    /// Parse one response. A body without `Content-Length` runs until the
    /// peer closes the stream.
    pub async fn receive(&self, socket: &Socket) -> Result<Response, HttpError> {
        let MessageHead {
            start_line,
            headers,
            remainder,
        } = transport::read_head(socket, &self.limits).await?;
        let (version, status) = parse_status_line(&start_line)
            .ok_or_else(|| HttpError::bad_request("Invalid start line in response"))?;

        let (body, _) = transport::read_body(
            socket,
            &headers,
            remainder,
            &self.limits,
            UnknownLength::UntilClose,
        )
        .await?;

        let mut response = Response::new(status).with_version(version);
        response.headers = headers;
        *response.body_mut() = body;
        Ok(response)
    }

    /// Write a response, then run its upgrade hand-off if it carries one.
    pub async fn send(&self, mut response: Response, socket: &Socket) -> Result<(), HttpError> {
        let status = response.status();
        let start_line = format!(
            "HTTP/{} {} {}",
            response.version(),
            status.as_u16(),
            status.reason()
        );
        let headers = response.headers.clone();
        transport::write_message(socket, &start_line, &headers, response.body_mut()).await?;

        if let Some(upgrade) = response.take_upgrade_handler() {
            upgrade();
        }
        Ok(())
    }
}

/// `HTTP/VERSION SP CODE SP REASON`
fn parse_status_line(line: &str) -> Option<(&str, StatusCode)> {
    let (version, rest) = line.strip_prefix("HTTP/")?.split_once(' ')?;
    let (code, reason) = rest.split_once(' ')?;
    if !transport::is_version(version)
        || code.len() != 3
        || !code.bytes().all(|b| b.is_ascii_digit())
        || reason.is_empty()
    {
        return None;
    }
    let status = StatusCode::from_u16(code.parse().ok()?)?;
    Some((version, status))
}
