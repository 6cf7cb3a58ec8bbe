//! Geographic Impossibility Detector
//!
//! Without a geo database the network prefix stands in for location: one
//! identity hopping between unrelated networks faster than a person could
//! travel (or even re-dial) is the signal. Prefix granularity is /16 for
//! IPv4 and the leading segment for IPv6.

use std::net::IpAddr;
use std::sync::Mutex;

use admission::domain::request::AdmissionRequest;

use crate::domain::entities::DetectionResult;
use crate::error::AbuseResult;

use super::{Detector, History};

const WINDOW_MS: i64 = 600_000;
const MAX_KEYS: usize = 10_000;
const MAX_PER_KEY: usize = 64;

/// Two different networks within this gap count as an impossible jump
const IMPOSSIBLE_GAP_MS: i64 = 120_000;

fn network_of(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            format!("{}.{}", octets[0], octets[1])
        }
        IpAddr::V6(v6) => format!("{:x}", v6.segments()[0]),
    }
}

pub struct GeoImpossibilityDetector {
    history: Mutex<History<IpAddr>>,
}

impl GeoImpossibilityDetector {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(History::new(WINDOW_MS, MAX_KEYS, MAX_PER_KEY)),
        }
    }
}

impl Default for GeoImpossibilityDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector for GeoImpossibilityDetector {
    fn name(&self) -> &'static str {
        "geo_impossibility"
    }

    fn evaluate(&self, request: &AdmissionRequest, now_ms: i64) -> AbuseResult<DetectionResult> {
        // Only meaningful for authenticated identities; an anonymous key is
        // the IP itself and can never jump
        if !request.is_authenticated() {
            return Ok(DetectionResult::clean(self.name()));
        }

        let identity = request.identity();
        let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        let entries = history.observe(&identity, now_ms, request.ip);

        let mut networks: Vec<String> = Vec::new();
        let mut rapid_jumps = 0u32;
        let mut prev: Option<(i64, String)> = None;
        for (at_ms, ip) in entries.iter() {
            let network = network_of(ip);
            if let Some((prev_ms, prev_network)) = &prev {
                if *prev_network != network && at_ms - prev_ms <= IMPOSSIBLE_GAP_MS {
                    rapid_jumps += 1;
                }
            }
            if !networks.contains(&network) {
                networks.push(network.clone());
            }
            prev = Some((*at_ms, network));
        }
        drop(history);

        let distinct = networks.len();
        let mut indicators = Vec::new();
        if distinct >= 4 {
            indicators.push("ip_rotation".to_string());
        }
        let risk = if rapid_jumps > 0 {
            indicators.push("geo_jump".to_string());
            (6.0 + 2.0 * rapid_jumps as f64).min(10.0)
        } else if distinct >= 4 {
            4.0
        } else {
            0.0
        };

        let confidence = (0.7 + 0.05 * rapid_jumps as f64).min(0.9);
        Ok(DetectionResult::new(
            self.name(),
            risk,
            indicators,
            if risk > 0.0 { confidence } else { 0.0 },
            format!("{distinct} networks, {rapid_jumps} rapid jumps"),
        ))
    }
}
