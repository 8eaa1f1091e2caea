//! Event payloads published by the workflow and consumed by handlers.
//!
//! Events are immutable once built; handlers only ever see a shared reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known topic names.
pub mod topics {
    pub const PULL_ARTIFACT: &str = "PULL_ARTIFACT";
    pub const PUSH_ARTIFACT: &str = "PUSH_ARTIFACT";
    pub const APPROVE_REQUEST: &str = "APPROVE_REQUEST";
    pub const REJECT_REQUEST: &str = "REJECT_REQUEST";
    pub const WEBHOOK: &str = "WEBHOOK";
}

/// Identity of an artifact inside a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: i64,
    pub repository_id: i64,
    pub repository_name: String,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEvent {
    pub event_type: String,
    pub artifact: Artifact,
    /// Tags the client addressed the artifact by, first one wins.
    pub tags: Vec<String>,
    pub operator: String,
    pub occur_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEvent {
    pub event_type: String,
    pub request_id: i64,
    /// Name of the project the request asked for.
    pub project: String,
    pub owner_id: i64,
    pub operator: String,
    pub occur_at: DateTime<Utc>,
}

/// Where a webhook payload should be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookTarget {
    pub address: String,
    pub auth_header: Option<String>,
    pub skip_cert_verify: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookEvent {
    pub hook_type: String,
    pub target: HookTarget,
    pub payload: serde_json::Value,
    pub occur_at: DateTime<Utc>,
}

/// Everything that can be published to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum DomainEvent {
    PullArtifact(ArtifactEvent),
    PushArtifact(ArtifactEvent),
    ApproveRequest(RequestEvent),
    RejectRequest(RequestEvent),
    Hook(HookEvent),
}

impl DomainEvent {
    /// Short variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::PullArtifact(_) => "pull_artifact",
            DomainEvent::PushArtifact(_) => "push_artifact",
            DomainEvent::ApproveRequest(_) => "approve_request",
            DomainEvent::RejectRequest(_) => "reject_request",
            DomainEvent::Hook(_) => "hook",
        }
    }

    /// Topic this kind of event is normally published on.
    pub fn default_topic(&self) -> &'static str {
        match self {
            DomainEvent::PullArtifact(_) => topics::PULL_ARTIFACT,
            DomainEvent::PushArtifact(_) => topics::PUSH_ARTIFACT,
            DomainEvent::ApproveRequest(_) => topics::APPROVE_REQUEST,
            DomainEvent::RejectRequest(_) => topics::REJECT_REQUEST,
            DomainEvent::Hook(_) => topics::WEBHOOK,
        }
    }

    pub fn occur_at(&self) -> DateTime<Utc> {
        match self {
            DomainEvent::PullArtifact(e) | DomainEvent::PushArtifact(e) => e.occur_at,
            DomainEvent::ApproveRequest(e) | DomainEvent::RejectRequest(e) => e.occur_at,
            DomainEvent::Hook(e) => e.occur_at,
        }
    }
}
