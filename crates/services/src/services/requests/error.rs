use strum_macros::Display;
use thiserror::Error;

use crate::services::collaborators::CollaboratorError;

/// Collaborator call a workflow operation was making when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum WorkflowStep {
    Provision,
    Quota,
    LoadOwner,
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Request not found: {0}")]
    NotFound(String),

    /// A collaborator failed mid-operation. `project_id` is set when a
    /// project had already been provisioned and is now orphaned.
    #[error("{step} failed{}: {source}", .project_id.map(|id| format!(" (project {id} left in place)")).unwrap_or_default())]
    Dependency {
        step: WorkflowStep,
        project_id: Option<i64>,
        #[source]
        source: CollaboratorError,
    },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl RequestError {
    pub fn dependency(step: WorkflowStep, source: CollaboratorError) -> Self {
        RequestError::Dependency {
            step,
            project_id: None,
            source,
        }
    }

    /// Caller mistakes that retrying will not fix.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RequestError::Validation(_) | RequestError::Conflict(_) | RequestError::NotFound(_)
        )
    }
}
