//! API DTOs (Data Transfer Objects)

use serde::{Deserialize, Serialize};

use crate::domain::outcome::AdmissionDecision;
use crate::domain::request::AdmissionRequest;
use crate::domain::rule::RateLimitRule;
use crate::error::{AdmissionError, AdmissionResult};

/// Request for POST /api/admission/check
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    pub ip: String,
    pub endpoint: String,
    pub method: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
}

impl CheckRequest {
    pub fn into_domain(self) -> AdmissionResult<AdmissionRequest> {
        let ip = self
            .ip
            .parse()
            .map_err(|_| AdmissionError::Validation(format!("invalid ip '{}'", self.ip)))?;
        Ok(AdmissionRequest {
            user_id: self.user_id,
            ip,
            endpoint: self.endpoint,
            method: self.method,
            user_agent: self.user_agent,
            tier: self.tier,
        })
    }
}

/// Response for POST /api/admission/check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    pub current: u64,
    pub limit: u64,
    pub window_remaining_secs: u64,
    pub degraded: bool,
}

impl From<AdmissionDecision> for CheckResponse {
    fn from(decision: AdmissionDecision) -> Self {
        Self {
            allowed: decision.allowed,
            reason: decision.reason,
            retry_after_secs: decision.retry_after_secs,
            rule: decision.rule,
            current: decision.current,
            limit: decision.limit,
            window_remaining_secs: decision.window_remaining_secs,
            degraded: decision.degraded,
        }
    }
}

/// Request for POST /api/admission/reload
#[derive(Debug, Clone, Deserialize)]
pub struct ReloadRequest {
    pub rules: Vec<RateLimitRule>,
}

/// Response for POST /api/admission/reload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadResponse {
    pub version: u64,
    pub rule_count: usize,
}
