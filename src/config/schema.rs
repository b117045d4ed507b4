//! Configuration schema definitions.
//!
//! Every section has defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::http::{DEFAULT_BODY_SIZE_LIMIT, HEADER_SIZE_LIMIT};
use crate::websocket::{DEFAULT_BROADCAST_CHUNK_SIZE, MAX_PAYLOAD_SIZE_LIMIT};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen addresses and connection limits.
    pub listener: ListenerConfig,

    /// HTTP and WebSocket size limits.
    pub limits: LimitsConfig,

    /// Broadcast tuning.
    pub gateway: GatewayConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// `host:port` endpoints, e.g. "127.0.0.1:9000" or "[::1]:9000".
    pub addresses: Vec<String>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            addresses: vec!["127.0.0.1:9000".to_string()],
            max_connections: 10_000,
        }
    }
}

/// Size limits, all in bytes.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest header block accepted before its terminating blank line.
    pub header_size_limit: usize,

    /// Largest HTTP body buffered.
    pub body_size_limit: usize,

    /// Payload bytes one WebSocket connection may receive over its lifetime.
    pub max_payload_size: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            header_size_limit: HEADER_SIZE_LIMIT,
            body_size_limit: DEFAULT_BODY_SIZE_LIMIT,
            max_payload_size: MAX_PAYLOAD_SIZE_LIMIT,
        }
    }
}

/// Broadcast configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Clients per concurrently delivered chunk.
    pub broadcast_chunk_size: usize,

    /// How long one chunk is waited on, in milliseconds.
    pub broadcast_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            broadcast_chunk_size: DEFAULT_BROADCAST_CHUNK_SIZE,
            broadcast_timeout_ms: 20_000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset (e.g. "info", "rebound=debug").
    pub log_level: String,

    pub log_format: LogFormat,

    /// Serve Prometheus metrics.
    pub metrics_enabled: bool,

    /// Metrics listener address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.listener.addresses, vec!["127.0.0.1:9000"]);
        assert_eq!(config.limits.max_payload_size, 10 * 1024 * 1024);
        assert_eq!(config.gateway.broadcast_chunk_size, 20);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [listener]
            addresses = ["0.0.0.0:8080", "[::1]:8080"]

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.addresses.len(), 2);
        assert_eq!(config.listener.max_connections, 10_000);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn unknown_log_format_is_a_parse_error() {
        let result: Result<ServerConfig, _> = toml::from_str(
            r#"
            [observability]
            log_format = "xml"
            "#,
        );
        assert!(result.is_err());
    }
}
