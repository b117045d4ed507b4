//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check every listen address parses, and none repeats after normalisation
//! - Validate value ranges (limits > 0, timeouts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before any socket is opened

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::net::Endpoint;

/// One semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.addresses must not be empty")]
    NoAddresses,

    #[error("listener address {address:?} is invalid: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("listener address {0} is listed more than once")]
    DuplicateAddress(String),

    /// A numeric setting that must be positive.
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("observability.log_level must not be empty")]
    EmptyLogLevel,
}

/// Check `config`, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.addresses.is_empty() {
        errors.push(ValidationError::NoAddresses);
    }

    let mut seen = HashSet::new();
    for address in &config.listener.addresses {
        match address.parse::<Endpoint>() {
            Ok(endpoint) => {
                if !seen.insert(endpoint) {
                    errors.push(ValidationError::DuplicateAddress(endpoint.to_string()));
                }
            }
            Err(e) => errors.push(ValidationError::InvalidAddress {
                address: address.clone(),
                reason: e.to_string(),
            }),
        }
    }

    let positive: [(&'static str, u64); 6] = [
        ("listener.max_connections", config.listener.max_connections as u64),
        ("limits.header_size_limit", config.limits.header_size_limit as u64),
        ("limits.body_size_limit", config.limits.body_size_limit as u64),
        ("limits.max_payload_size", config.limits.max_payload_size),
        ("gateway.broadcast_chunk_size", config.gateway.broadcast_chunk_size as u64),
        ("gateway.broadcast_timeout_ms", config.gateway.broadcast_timeout_ms),
    ];
    errors.extend(
        positive
            .into_iter()
            .filter(|(_, value)| *value == 0)
            .map(|(name, _)| ValidationError::ZeroValue(name)),
    );

    if config.observability.log_level.trim().is_empty() {
        errors.push(ValidationError::EmptyLogLevel);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
