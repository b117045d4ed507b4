//! Listen endpoint parsing.
//!
//! Endpoints are `host:port` strings. `localhost` is normalised to
//! `127.0.0.1`, IPv6 hosts are written in brackets and the port must lie in
//! `1..=65535`.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use crate::net::ServerError;

/// A validated address the server can listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint(SocketAddr);

impl Endpoint {
    /// Build an endpoint from a hostname and a port number.
    ///
    /// The port is taken as a wide integer so out-of-range values coming from
    /// the command line or environment are reported rather than truncated.
    pub fn from_parts(host: &str, port: i64) -> Result<Self, ServerError> {
        if !(1..=i64::from(u16::MAX)).contains(&port) {
            return Err(ServerError::InvalidArgument(format!(
                "Invalid port number given (must be between 1-65535): {port}."
            )));
        }
        let ip = parse_host(host)?;
        Ok(Self(SocketAddr::new(ip, port as u16)))
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }
}

impl FromStr for Endpoint {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(|| {
            ServerError::InvalidArgument(format!("Endpoint must be in `host:port` form: {s}"))
        })?;
        let port = port.parse::<i64>().map_err(|_| {
            ServerError::InvalidArgument(format!("Invalid port number given: {port}."))
        })?;
        Self::from_parts(host, port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn parse_host(host: &str) -> Result<IpAddr, ServerError> {
    if host.eq_ignore_ascii_case("localhost") {
        return Ok(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    let literal = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    literal
        .parse::<IpAddr>()
        .map_err(|_| ServerError::InvalidArgument(format!("Invalid host given: {host}.")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_is_normalised() {
        let endpoint: Endpoint = "localhost:9000".parse().unwrap();
        assert_eq!(endpoint.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn ipv6_in_brackets() {
        let endpoint: Endpoint = "[::1]:8080".parse().unwrap();
        assert_eq!(endpoint.socket_addr(), "[::1]:8080".parse().unwrap());
        assert_eq!(endpoint.to_string().parse::<Endpoint>().unwrap(), endpoint);
    }

    #[test]
    fn port_out_of_range() {
        for port in [0, 65536, -1] {
            let err = Endpoint::from_parts("127.0.0.1", port).unwrap_err();
            assert!(matches!(err, ServerError::InvalidArgument(_)), "port {port}");
        }
        assert!(Endpoint::from_parts("127.0.0.1", 65535).is_ok());
        assert!(Endpoint::from_parts("127.0.0.1", 1).is_ok());
    }

    #[test]
    fn rejects_missing_port_and_bad_host() {
        assert!("127.0.0.1".parse::<Endpoint>().is_err());
        assert!("example.invalid:80".parse::<Endpoint>().is_err());
        assert!("127.0.0.1:http".parse::<Endpoint>().is_err());
    }
}
