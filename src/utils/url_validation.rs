//! URL validation for configured endpoints
//!
//! Endpoints come from environment variables or YAML, so they are checked
//! once at load time:
//! - credential and signaling endpoints must be `http`/`https`
//! - the socket endpoint must be `ws`/`wss`
//! - ICE servers must be `stun:`, `turn:` or `turns:` URIs
//!
//! Plain-text schemes are accepted but logged when the host is not loopback,
//! since credentials travel over these connections.

use std::net::IpAddr;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be {expected}, got: {got}")]
    UnsupportedScheme { expected: &'static str, got: String },

    #[error("URL must have a host")]
    MissingHost,
}

/// Checks whether a host names the local machine
pub fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

fn validate_with_schemes(
    raw: &str,
    secure: &'static str,
    insecure: &'static str,
    expected: &'static str,
) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw)?;

    let scheme = url.scheme();
    if scheme != secure && scheme != insecure {
        return Err(UrlValidationError::UnsupportedScheme {
            expected,
            got: scheme.to_string(),
        });
    }

    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;
    if scheme == insecure && !is_loopback_host(host) {
        warn!(url = %url, "Endpoint uses an unencrypted scheme");
    }

    Ok(url)
}

/// Validates a credential or signaling endpoint (`http`/`https`)
pub fn validate_http_url(raw: &str) -> Result<Url, UrlValidationError> {
    validate_with_schemes(raw, "https", "http", "http or https")
}

/// Validates a socket endpoint (`ws`/`wss`)
pub fn validate_socket_url(raw: &str) -> Result<Url, UrlValidationError> {
    validate_with_schemes(raw, "wss", "ws", "ws or wss")
}

/// Validates an ICE server URI such as `stun:stun.l.google.com:19302`
pub fn validate_ice_server_url(raw: &str) -> Result<(), UrlValidationError> {
    let (scheme, rest) = raw
        .split_once(':')
        .ok_or(UrlValidationError::InvalidFormat(url::ParseError::RelativeUrlWithoutBase))?;

    match scheme.to_ascii_lowercase().as_str() {
        "stun" | "turn" | "turns" => {}
        other => {
            return Err(UrlValidationError::UnsupportedScheme {
                expected: "stun, turn or turns",
                got: other.to_string(),
            });
        }
    }

    let host = rest.split(['?', ':']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(UrlValidationError::MissingHost);
    }
    Ok(())
}
