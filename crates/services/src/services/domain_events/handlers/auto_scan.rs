use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::services::{
    collaborators::ScanPolicy,
    domain_events::{DomainEvent, EventHandler, HandlerContext, HandlerError},
};

/// Hands freshly pushed artifacts to the auto-scan policy.
pub struct AutoScanHandler {
    policy: Arc<dyn ScanPolicy>,
}

impl AutoScanHandler {
    pub fn new(policy: Arc<dyn ScanPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl EventHandler for AutoScanHandler {
    fn name(&self) -> &'static str {
        "auto_scan"
    }

    async fn handle(&self, event: &DomainEvent, _ctx: &HandlerContext) -> Result<(), HandlerError> {
        let DomainEvent::PushArtifact(event) = event else {
            debug!(event = event.kind(), "Not a push event, ignoring");
            return Ok(());
        };

        self.policy
            .auto_scan(&event.artifact, &event.tags)
            .await
            .map_err(|e| {
                HandlerError::Failed(format!(
                    "scan artifact {}@{} failed: {}",
                    event.artifact.repository_name, event.artifact.digest, e
                ))
            })
    }
}
