use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::DomainEvent;
use crate::services::collaborators::CollaboratorError;

/// Error type for event handler failures.
///
/// These never reach the publisher; the dispatcher logs them and records the
/// dropped delivery.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Handler timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error("Handler cancelled by shutdown")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Per-delivery context handed to a handler.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Topic the event was published on.
    pub topic: Arc<str>,
    pub delivery_id: Uuid,
    /// Id of the operation that published the event.
    pub request_id: Uuid,
    pub operator: String,
    /// Fires on dispatcher shutdown. Not tied to the publisher's lifetime.
    pub cancel: CancellationToken,
}

/// Trait for domain event handlers.
///
/// Handlers are registered per topic and owned by the registry for the life
/// of the process, so they carry collaborators but no per-event state.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Returns the name of this handler (for logging and debugging).
    fn name(&self) -> &'static str;

    /// Stateful handlers never run two deliveries at once.
    fn is_stateful(&self) -> bool {
        false
    }

    async fn handle(&self, event: &DomainEvent, ctx: &HandlerContext) -> Result<(), HandlerError>;
}
