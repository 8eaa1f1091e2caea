use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

use crate::services::{
    collaborators::{JobKind, JobSubmission, JobSubmitter},
    domain_events::{DomainEvent, EventHandler, HandlerContext, HandlerError, HookEvent},
};

/// Job the job service runs to deliver notification mail.
pub const EMAIL_JOB: &str = "EMAIL";

/// Forwards hook events to the job service, which does the actual delivery.
pub struct WebhookJobHandler {
    submitter: Arc<dyn JobSubmitter>,
    job_name: String,
}

impl WebhookJobHandler {
    pub fn new(submitter: Arc<dyn JobSubmitter>, job_name: impl Into<String>) -> Self {
        Self {
            submitter,
            job_name: job_name.into(),
        }
    }

    fn job_for(&self, event: &HookEvent) -> Result<JobSubmission, HandlerError> {
        let payload = serde_json::to_string(&event.payload)?;

        let mut parameters = HashMap::new();
        parameters.insert("payload".to_string(), Value::String(payload));
        parameters.insert(
            "address".to_string(),
            Value::String(event.target.address.clone()),
        );
        // Sent verbatim as the Authorization header of the outbound request.
        parameters.insert(
            "auth_header".to_string(),
            Value::String(event.target.auth_header.clone().unwrap_or_default()),
        );
        parameters.insert(
            "skip_cert_verify".to_string(),
            Value::Bool(event.target.skip_cert_verify),
        );

        Ok(JobSubmission {
            name: self.job_name.clone(),
            kind: JobKind::Generic,
            parameters,
        })
    }
}

#[async_trait]
impl EventHandler for WebhookJobHandler {
    fn name(&self) -> &'static str {
        "webhook_job"
    }

    async fn handle(&self, event: &DomainEvent, _ctx: &HandlerContext) -> Result<(), HandlerError> {
        let DomainEvent::Hook(event) = event else {
            error!(event = event.kind(), "Webhook forwarder got a non-hook event");
            return Err(HandlerError::Failed(format!(
                "invalid hook event: {}",
                event.kind()
            )));
        };

        let job = self.job_for(event)?;
        debug!(job = %job.name, hook_type = %event.hook_type, "Submitting hook job");
        self.submitter.submit(job).await?;
        Ok(())
    }
}
