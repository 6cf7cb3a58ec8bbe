//! Admission Request
//!
//! The read-only input to an admission check. Validated at the boundary;
//! malformed requests are rejected before any counter is touched.

use std::net::IpAddr;

use crate::error::{AdmissionError, AdmissionResult};

pub const MAX_ENDPOINT_LEN: usize = 2_048;
pub const MAX_METHOD_LEN: usize = 16;
pub const MAX_IDENTITY_LEN: usize = 256;
pub const MAX_TIER_LEN: usize = 64;
pub const MAX_USER_AGENT_LEN: usize = 1_024;

/// Sentinel tier for requests that carry none
pub const DEFAULT_TIER: &str = "default";

/// One inbound request as seen by the admission layer
///
/// Never persisted as-is; persisted records carry the identity, the IP and
/// a hash of the User-Agent, not the raw header.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmissionRequest {
    pub user_id: Option<String>,
    pub ip: IpAddr,
    pub endpoint: String,
    pub method: String,
    pub user_agent: Option<String>,
    pub tier: Option<String>,
}

impl AdmissionRequest {
    /// Counter identity: the authenticated user when present, else the IP
    pub fn identity(&self) -> String {
        match &self.user_id {
            Some(user_id) => user_id.clone(),
            None => self.ip.to_string(),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn tier_or_default(&self) -> &str {
        self.tier.as_deref().unwrap_or(DEFAULT_TIER)
    }

    /// Reject malformed input before any state is read or written
    pub fn validate(&self) -> AdmissionResult<()> {
        if self.endpoint.is_empty() || !self.endpoint.starts_with('/') {
            return Err(AdmissionError::Validation(
                "endpoint must be a non-empty path".to_string(),
            ));
        }
        if self.endpoint.len() > MAX_ENDPOINT_LEN {
            return Err(AdmissionError::Validation("endpoint too long".to_string()));
        }
        if self.method.is_empty()
            || self.method.len() > MAX_METHOD_LEN
            || !self.method.chars().all(|c| c.is_ascii_alphabetic())
        {
            return Err(AdmissionError::Validation(
                "method must be a short alphabetic token".to_string(),
            ));
        }
        if let Some(user_id) = &self.user_id {
            if user_id.is_empty()
                || user_id.len() > MAX_IDENTITY_LEN
                || user_id.chars().any(char::is_control)
            {
                return Err(AdmissionError::Validation("invalid user id".to_string()));
            }
        }
        if let Some(tier) = &self.tier {
            if tier.is_empty() || tier.len() > MAX_TIER_LEN || tier.chars().any(char::is_control) {
                return Err(AdmissionError::Validation("invalid tier".to_string()));
            }
        }
        if let Some(user_agent) = &self.user_agent {
            if user_agent.len() > MAX_USER_AGENT_LEN {
                return Err(AdmissionError::Validation("user agent too long".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AdmissionRequest {
        AdmissionRequest {
            user_id: Some("user-1".to_string()),
            ip: "10.0.0.1".parse().unwrap(),
            endpoint: "/api/data".to_string(),
            method: "GET".to_string(),
            user_agent: Some("Mozilla/5.0".to_string()),
            tier: None,
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        let mut r = request();
        r.endpoint = "".to_string();
        assert!(r.validate().is_err());

        r.endpoint = "no-leading-slash".to_string();
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_method() {
        let mut r = request();
        r.method = "G E T".to_string();
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_identity_falls_back_to_ip() {
        let mut r = request();
        assert_eq!(r.identity(), "user-1");

        r.user_id = None;
        assert_eq!(r.identity(), "10.0.0.1");
        assert_eq!(r.tier_or_default(), DEFAULT_TIER);
    }
}
