//! Interfaces to the subsystems the request workflow and the event handlers
//! call out to. Only the mail and job-submission sides have in-repo
//! implementations (`email`, `job_service`); the rest are supplied by the
//! embedding registry.

use std::{collections::BTreeMap, collections::HashMap, fmt, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::services::domain_events::Artifact;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{0}")]
    Failed(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Creates the project an approved request asks for.
#[async_trait]
pub trait ProjectProvisioner: Send + Sync {
    /// Returns the id of the new project.
    async fn create_project(&self, name: &str, owner_id: i64) -> CollaboratorResult<i64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Project,
}

/// The object a quota is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaReference {
    pub kind: ReferenceKind,
    pub id: i64,
}

impl QuotaReference {
    pub fn project(project_id: i64) -> Self {
        Self {
            kind: ReferenceKind::Project,
            id: project_id,
        }
    }
}

impl fmt::Display for QuotaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResourceName {
    Storage,
}

/// Hard limits keyed by resource; -1 means unlimited.
pub type ResourceList = BTreeMap<ResourceName, i64>;

#[async_trait]
pub trait QuotaManager: Send + Sync {
    async fn create_quota(
        &self,
        reference: &QuotaReference,
        hard_limits: &ResourceList,
    ) -> CollaboratorResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: i64,
    pub username: String,
    pub email: String,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_by_id(&self, id: i64) -> CollaboratorResult<Option<DirectoryUser>>;
}

/// Everything needed to open one SMTP session.
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub identity: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub use_ssl: bool,
    pub insecure_skip_verify: bool,
    pub from: String,
}

impl SmtpSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("address", &self.address())
            .field("username", &self.username)
            .field("timeout", &self.timeout)
            .field("use_ssl", &self.use_ssl)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, settings: &SmtpSettings, message: &MailMessage) -> CollaboratorResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "PascalCase")]
pub enum JobKind {
    Generic,
    Periodic,
}

/// A job handed to the durable job service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSubmission {
    pub name: String,
    pub kind: JobKind,
    pub parameters: HashMap<String, serde_json::Value>,
}

#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit(&self, job: JobSubmission) -> CollaboratorResult<()>;
}

#[async_trait]
pub trait TagStore: Send + Sync {
    /// Id of the tag called `name` on the artifact, if there is one.
    async fn find_tag(&self, artifact_id: i64, name: &str) -> CollaboratorResult<Option<i64>>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn update_pull_time(
        &self,
        artifact_id: i64,
        tag_id: Option<i64>,
        pulled_at: DateTime<Utc>,
    ) -> CollaboratorResult<()>;
}

#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn add_pull_count(&self, repository_id: i64) -> CollaboratorResult<()>;
}

#[async_trait]
pub trait ScanPolicy: Send + Sync {
    /// Starts a scan when the artifact's project has auto-scan enabled.
    async fn auto_scan(&self, artifact: &Artifact, tags: &[String]) -> CollaboratorResult<()>;
}
