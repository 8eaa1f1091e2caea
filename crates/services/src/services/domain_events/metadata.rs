//! Turns workflow actions into concrete events.
//!
//! Resolution is pure: it reads only its own fields and the clock.

use chrono::Utc;
use db::models::request::Request;

use super::types::{Artifact, ArtifactEvent, DomainEvent, RequestEvent, topics};

/// Something that knows which topic it belongs on and how to become an event.
pub trait EventMetadata {
    fn topic(&self) -> &'static str;

    fn resolve(&self) -> DomainEvent;
}

#[derive(Debug, Clone)]
pub struct ApproveRequestMetadata {
    pub request_id: i64,
    pub project: String,
    pub owner_id: i64,
    pub operator: String,
}

impl ApproveRequestMetadata {
    pub fn for_request(request: &Request, operator: &str) -> Self {
        Self {
            request_id: request.id,
            project: request.name.clone(),
            owner_id: request.owner_id,
            operator: operator.to_string(),
        }
    }
}

impl EventMetadata for ApproveRequestMetadata {
    fn topic(&self) -> &'static str {
        topics::APPROVE_REQUEST
    }

    fn resolve(&self) -> DomainEvent {
        DomainEvent::ApproveRequest(RequestEvent {
            event_type: self.topic().to_string(),
            request_id: self.request_id,
            project: self.project.clone(),
            owner_id: self.owner_id,
            operator: self.operator.clone(),
            occur_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RejectRequestMetadata {
    pub request_id: i64,
    pub project: String,
    pub owner_id: i64,
    pub operator: String,
}

impl RejectRequestMetadata {
    pub fn for_request(request: &Request, operator: &str) -> Self {
        Self {
            request_id: request.id,
            project: request.name.clone(),
            owner_id: request.owner_id,
            operator: operator.to_string(),
        }
    }
}

impl EventMetadata for RejectRequestMetadata {
    fn topic(&self) -> &'static str {
        topics::REJECT_REQUEST
    }

    fn resolve(&self) -> DomainEvent {
        DomainEvent::RejectRequest(RequestEvent {
            event_type: self.topic().to_string(),
            request_id: self.request_id,
            project: self.project.clone(),
            owner_id: self.owner_id,
            operator: self.operator.clone(),
            occur_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PullArtifactMetadata {
    pub artifact: Artifact,
    pub tags: Vec<String>,
    pub operator: String,
}

impl EventMetadata for PullArtifactMetadata {
    fn topic(&self) -> &'static str {
        topics::PULL_ARTIFACT
    }

    fn resolve(&self) -> DomainEvent {
        DomainEvent::PullArtifact(ArtifactEvent {
            event_type: self.topic().to_string(),
            artifact: self.artifact.clone(),
            tags: self.tags.clone(),
            operator: self.operator.clone(),
            occur_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PushArtifactMetadata {
    pub artifact: Artifact,
    pub tags: Vec<String>,
    pub operator: String,
}

impl EventMetadata for PushArtifactMetadata {
    fn topic(&self) -> &'static str {
        topics::PUSH_ARTIFACT
    }

    fn resolve(&self) -> DomainEvent {
        DomainEvent::PushArtifact(ArtifactEvent {
            event_type: self.topic().to_string(),
            artifact: self.artifact.clone(),
            tags: self.tags.clone(),
            operator: self.operator.clone(),
            occur_at: Utc::now(),
        })
    }
}
