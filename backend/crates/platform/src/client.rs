//! Client identification utilities
//!
//! Common functions for identifying clients via HTTP headers.

use axum::http::{HeaderMap, header};
use std::net::IpAddr;

use crate::crypto::sha256;

/// Client fingerprint derived from request headers
///
/// Used to key per-client counters and to feed device-consistency scoring.
/// The raw User-Agent string is kept only in memory; persisted records store
/// the hash.
#[derive(Debug, Clone)]
pub struct ClientFingerprint {
    /// SHA-256 hash of the User-Agent header, if one was sent
    pub ua_hash: Option<[u8; 32]>,
    /// Client IP address (from X-Forwarded-For or direct connection)
    pub ip: Option<IpAddr>,
    /// Original User-Agent string (for in-memory analysis only)
    pub user_agent: Option<String>,
}

impl ClientFingerprint {
    /// Create a new fingerprint
    pub fn new(ua_hash: Option<[u8; 32]>, ip: Option<IpAddr>, user_agent: Option<String>) -> Self {
        Self {
            ua_hash,
            ip,
            user_agent,
        }
    }

    /// Get the User-Agent hash as Vec<u8> (for database storage)
    pub fn ua_hash_vec(&self) -> Option<Vec<u8>> {
        self.ua_hash.map(|h| h.to_vec())
    }

    /// Get IP as string (for database storage)
    pub fn ip_string(&self) -> Option<String> {
        self.ip.map(|ip| ip.to_string())
    }
}

/// Extract client fingerprint from request headers
///
/// Unlike session binding, admission control tolerates a missing User-Agent;
/// the absence itself is a signal consumed by the abuse detectors.
///
/// ## Arguments
/// * `headers` - HTTP request headers
/// * `client_ip` - Client IP address (from connection or X-Forwarded-For)
pub fn extract_fingerprint(headers: &HeaderMap, client_ip: Option<IpAddr>) -> ClientFingerprint {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let ua_hash = user_agent.as_deref().map(|ua| sha256(ua.as_bytes()));

    ClientFingerprint::new(ua_hash, client_ip, user_agent)
}

/// Extract client IP address from headers
///
/// Checks X-Forwarded-For header first (for reverse proxy setups),
/// then falls back to direct connection IP.
///
/// ## Arguments
/// * `headers` - HTTP request headers
/// * `direct_ip` - Direct connection IP address
///
/// ## Returns
/// The client IP address, or None if not determinable
pub fn extract_client_ip(headers: &HeaderMap, direct_ip: Option<IpAddr>) -> Option<IpAddr> {
    // Check X-Forwarded-For header (first IP in the list)
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first_ip) = xff.split(',').next() {
            if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }
    direct_ip
}

/// Extract a trimmed, non-empty string header value
///
/// Used for gateway-supplied identity headers (authenticated user, tier).
pub fn extract_string_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
