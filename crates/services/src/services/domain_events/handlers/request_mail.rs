use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::services::{
    collaborators::{CollaboratorError, MailMessage, MailSender, UserDirectory},
    config::Config,
    domain_events::{DomainEvent, EventHandler, HandlerContext, HandlerError, RequestEvent, topics},
};

/// SMTP session timeout for approval mail.
pub const MAIL_TIMEOUT: Duration = Duration::from_secs(5);

/// Tells a request's owner that it was approved or rejected.
pub struct RequestMailHandler {
    users: Arc<dyn UserDirectory>,
    mailer: Arc<dyn MailSender>,
    config: Arc<RwLock<Config>>,
}

impl RequestMailHandler {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        mailer: Arc<dyn MailSender>,
        config: Arc<RwLock<Config>>,
    ) -> Self {
        Self {
            users,
            mailer,
            config,
        }
    }

    async fn send_mail(&self, event: &RequestEvent) -> Result<(), HandlerError> {
        let config = self.config.read().await.clone();
        if !config.email.is_configured() {
            info!(request_id = event.request_id, "SMTP is not configured, skipping request mail");
            return Ok(());
        }

        let owner = self
            .users
            .get_by_id(event.owner_id)
            .await?
            .ok_or_else(|| {
                CollaboratorError::Failed(format!("owner {} not found", event.owner_id))
            })?;
        if owner.email.trim().is_empty() {
            info!(owner_id = owner.id, "Owner has no email address, skipping request mail");
            return Ok(());
        }

        let product = &config.product_name;
        let (subject, body) = match event.event_type.as_str() {
            topics::APPROVE_REQUEST => (
                format!("[{product}] Approved request"),
                format!(
                    "Hey {}! The project named {} has been created by request.",
                    owner.username, event.project
                ),
            ),
            topics::REJECT_REQUEST => (
                format!("[{product}] Rejected request"),
                format!(
                    "Sorry {}. Please contact admin {}.",
                    owner.username, event.operator
                ),
            ),
            other => {
                error!(event_type = other, "Undefined event type for request mail");
                return Ok(());
            }
        };

        let settings = config.email.smtp_settings(MAIL_TIMEOUT);
        debug!(
            address = %settings.address(),
            from = %settings.from,
            to = %owner.email,
            ssl = settings.use_ssl,
            "Sending request mail"
        );

        let message = MailMessage {
            to: vec![owner.email],
            subject,
            body,
        };
        self.mailer.send(&settings, &message).await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for RequestMailHandler {
    fn name(&self) -> &'static str {
        "request_mail"
    }

    async fn handle(&self, event: &DomainEvent, _ctx: &HandlerContext) -> Result<(), HandlerError> {
        match event {
            DomainEvent::ApproveRequest(event) | DomainEvent::RejectRequest(event) => {
                self.send_mail(event).await
            }
            other => {
                error!(event = other.kind(), "Request mail cannot handle this event");
                Ok(())
            }
        }
    }
}
