//! Abuse Service
//!
//! Binds the detection engine and the response manager behind the admission
//! crate's `AbuseSink` port. The admission layer spawns `observe` after its
//! decision has been returned; nothing here can delay or fail a check.

use std::sync::Arc;

use admission::domain::repository::AbuseSink;
use admission::domain::request::AdmissionRequest;
use platform::clock::Clock;

use crate::application::engine::AbuseDetectionEngine;
use crate::application::respond::ResponseManager;
use crate::domain::entities::{AbuseAnalysis, EnforcementAction};
use crate::domain::repository::EnforcementRepository;

pub struct AbuseService<E>
where
    E: EnforcementRepository + Send + Sync,
{
    engine: Arc<AbuseDetectionEngine>,
    responder: Arc<ResponseManager<E>>,
    clock: Arc<dyn Clock>,
}

impl<E> AbuseService<E>
where
    E: EnforcementRepository + Send + Sync,
{
    pub fn new(
        engine: Arc<AbuseDetectionEngine>,
        responder: Arc<ResponseManager<E>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            responder,
            clock,
        }
    }

    /// Analyze one request and enforce the resulting action
    pub async fn analyze_and_respond(&self, request: &AdmissionRequest) -> AbuseAnalysis {
        let now_ms = self.clock.now_ms();
        let analysis = self.engine.analyze(request, now_ms).await;
        if analysis.action != EnforcementAction::Allow {
            self.responder.execute(request, &analysis, now_ms).await;
        }
        analysis
    }
}

impl<E> AbuseSink for AbuseService<E>
where
    E: EnforcementRepository + Send + Sync,
{
    async fn observe(&self, request: AdmissionRequest) {
        self.analyze_and_respond(&request).await;
    }
}
