//! Lifecycle of project-creation requests.
//!
//! Approve is a forward-only sequence: check the stored status, provision
//! the project, optionally attach a storage quota, persist the new status,
//! then publish. A failure stops the sequence where it is; earlier steps are
//! not undone.

mod error;
mod validation;

use std::{collections::HashMap, sync::Arc};

use db::{
    DBService, is_unique_violation,
    models::request::{ApprovalStatus, CreateRequest, Request, RequestQuery},
};
pub use error::{RequestError, WorkflowStep};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
pub use validation::{validate_name, validate_owner};

use crate::services::{
    collaborators::{
        ProjectProvisioner, QuotaManager, QuotaReference, ResourceList, ResourceName,
        UserDirectory,
    },
    config::Config,
    context::OperationContext,
    domain_events::{ApproveRequestMetadata, EventDispatcher, RejectRequestMetadata},
};

/// A request addressed either by id or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestRef {
    Id(i64),
    Name(String),
}

impl RequestRef {
    /// Interprets a path segment. When the caller says it is a resource name
    /// it is always a name; otherwise digits mean an id.
    pub fn parse(raw: &str, is_resource_name: bool) -> Self {
        if is_resource_name {
            return RequestRef::Name(raw.to_string());
        }
        match raw.parse::<i64>() {
            Ok(id) => RequestRef::Id(id),
            Err(_) => RequestRef::Name(raw.to_string()),
        }
    }
}

impl From<i64> for RequestRef {
    fn from(id: i64) -> Self {
        RequestRef::Id(id)
    }
}

impl From<&str> for RequestRef {
    fn from(name: &str) -> Self {
        RequestRef::Name(name.to_string())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Refresh the owner display name from the user directory.
    pub with_owner: bool,
}

impl GetOptions {
    pub fn with_owner() -> Self {
        Self { with_owner: true }
    }
}

#[derive(Clone)]
pub struct RequestController {
    db: DBService,
    dispatcher: Arc<EventDispatcher>,
    provisioner: Arc<dyn ProjectProvisioner>,
    quotas: Arc<dyn QuotaManager>,
    users: Arc<dyn UserDirectory>,
    config: Arc<RwLock<Config>>,
}

impl RequestController {
    pub fn new(
        db: DBService,
        dispatcher: Arc<EventDispatcher>,
        provisioner: Arc<dyn ProjectProvisioner>,
        quotas: Arc<dyn QuotaManager>,
        users: Arc<dyn UserDirectory>,
        config: Arc<RwLock<Config>>,
    ) -> Self {
        Self {
            db,
            dispatcher,
            provisioner,
            quotas,
            users,
            config,
        }
    }

    /// Validates and stores a new request; returns its id.
    pub async fn create(
        &self,
        owner_id: i64,
        owner_name: &str,
        name: &str,
    ) -> Result<i64, RequestError> {
        validate_owner(owner_id)?;
        validate_name(name)?;

        let data = CreateRequest {
            owner_id,
            owner_name: owner_name.to_string(),
            name: name.to_string(),
        };
        match Request::create(&self.db.pool, &data).await {
            Ok(request) => {
                info!(request_id = request.id, name = %request.name, owner_id, "Request created");
                Ok(request.id)
            }
            Err(e) if is_unique_violation(&e) => Err(RequestError::Conflict(format!(
                "a request named {name:?} already exists"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn count(&self, query: &RequestQuery) -> Result<i64, RequestError> {
        Ok(Request::count(&self.db.pool, query).await?)
    }

    pub async fn list(
        &self,
        query: &RequestQuery,
        options: GetOptions,
    ) -> Result<Vec<Request>, RequestError> {
        let mut requests = Request::list(&self.db.pool, query).await?;
        if options.with_owner && !requests.is_empty() {
            self.load_owners(&mut requests).await?;
        }
        Ok(requests)
    }

    pub async fn get(
        &self,
        reference: &RequestRef,
        options: GetOptions,
    ) -> Result<Request, RequestError> {
        let mut request = self.find(reference).await?;
        if options.with_owner {
            self.load_owners(std::slice::from_mut(&mut request)).await?;
        }
        Ok(request)
    }

    pub async fn get_by_name(
        &self,
        name: &str,
        options: GetOptions,
    ) -> Result<Request, RequestError> {
        if name.is_empty() {
            return Err(RequestError::Validation("request name required".to_string()));
        }
        self.get(&RequestRef::Name(name.to_string()), options).await
    }

    pub async fn exists(&self, reference: &RequestRef) -> Result<bool, RequestError> {
        match self.find(reference).await {
            Ok(_) => Ok(true),
            Err(RequestError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Tombstones the request and frees its name.
    pub async fn delete(&self, id: i64) -> Result<(), RequestError> {
        match Request::soft_delete(&self.db.pool, id).await? {
            Some(tombstone) => {
                info!(request_id = id, tombstone = %tombstone.name, "Request deleted");
                Ok(())
            }
            None => Err(RequestError::NotFound(format!("request {id}"))),
        }
    }

    pub async fn approve(
        &self,
        ctx: &OperationContext,
        request: &Request,
    ) -> Result<(), RequestError> {
        self.ensure_live_undecided(request).await?;

        let project_id = self
            .provisioner
            .create_project(&request.name, request.owner_id)
            .await
            .map_err(|e| RequestError::dependency(WorkflowStep::Provision, e))?;
        debug!(request_id = request.id, project_id, "Project provisioned");

        let quota = self.config.read().await.quota.clone();
        if quota.quota_per_project_enabled {
            let hard_limits = ResourceList::from([(ResourceName::Storage, quota.storage_per_project)]);
            let reference = QuotaReference::project(project_id);
            if let Err(e) = self.quotas.create_quota(&reference, &hard_limits).await {
                error!(
                    request_id = request.id,
                    project_id,
                    error = %e,
                    "Quota creation failed after provisioning, project left without quota"
                );
                return Err(RequestError::Dependency {
                    step: WorkflowStep::Quota,
                    project_id: Some(project_id),
                    source: e,
                });
            }
        }

        self.persist_decision(request, ApprovalStatus::Approved).await?;
        info!(request_id = request.id, project_id, operator = %ctx.operator, "Request approved");

        self.dispatcher
            .publish_metadata(ctx, &ApproveRequestMetadata::for_request(request, &ctx.operator));
        Ok(())
    }

    pub async fn reject(
        &self,
        ctx: &OperationContext,
        request: &Request,
    ) -> Result<(), RequestError> {
        self.ensure_live_undecided(request).await?;

        self.persist_decision(request, ApprovalStatus::Rejected).await?;
        info!(request_id = request.id, operator = %ctx.operator, "Request rejected");

        self.dispatcher
            .publish_metadata(ctx, &RejectRequestMetadata::for_request(request, &ctx.operator));
        Ok(())
    }

    /// Checks both the caller's copy and the stored record, so a stale copy
    /// cannot trigger provisioning for a decided or deleted request.
    async fn ensure_live_undecided(&self, request: &Request) -> Result<(), RequestError> {
        Self::ensure_undecided(request)?;
        match Request::find_by_id(&self.db.pool, request.id).await? {
            Some(current) => Self::ensure_undecided(&current),
            None => Err(RequestError::NotFound(format!("request {}", request.id))),
        }
    }

    fn ensure_undecided(request: &Request) -> Result<(), RequestError> {
        if request.approval_status != ApprovalStatus::NotDetermined {
            return Err(RequestError::Conflict(format!(
                "request {} is already {}",
                request.id, request.approval_status
            )));
        }
        Ok(())
    }

    /// Writes the decision only if the record is still live and undecided.
    async fn persist_decision(
        &self,
        request: &Request,
        decision: ApprovalStatus,
    ) -> Result<(), RequestError> {
        let changed = Request::transition_status(
            &self.db.pool,
            request.id,
            ApprovalStatus::NotDetermined,
            decision,
        )
        .await?;
        if changed > 0 {
            return Ok(());
        }

        match Request::find_by_id(&self.db.pool, request.id).await? {
            Some(current) => Err(RequestError::Conflict(format!(
                "request {} was concurrently set to {}",
                request.id, current.approval_status
            ))),
            None => Err(RequestError::NotFound(format!("request {}", request.id))),
        }
    }

    async fn find(&self, reference: &RequestRef) -> Result<Request, RequestError> {
        let found = match reference {
            RequestRef::Id(id) => Request::find_by_id(&self.db.pool, *id).await?,
            RequestRef::Name(name) => Request::find_by_name(&self.db.pool, name).await?,
        };
        found.ok_or_else(|| RequestError::NotFound(describe(reference)))
    }

    /// Fills in current owner names on the returned records only.
    async fn load_owners(&self, requests: &mut [Request]) -> Result<(), RequestError> {
        let mut names: HashMap<i64, Option<String>> = HashMap::new();
        for request in requests.iter() {
            if names.contains_key(&request.owner_id) {
                continue;
            }
            let user = self
                .users
                .get_by_id(request.owner_id)
                .await
                .map_err(|e| RequestError::dependency(WorkflowStep::LoadOwner, e))?;
            names.insert(request.owner_id, user.map(|u| u.username));
        }

        for request in requests.iter_mut() {
            match names.get(&request.owner_id).cloned().flatten() {
                Some(username) => request.owner_name = username,
                None => warn!(
                    name = %request.name,
                    owner_id = request.owner_id,
                    "Owner of request not found"
                ),
            }
        }
        Ok(())
    }
}

fn describe(reference: &RequestRef) -> String {
    match reference {
        RequestRef::Id(id) => format!("request {id}"),
        RequestRef::Name(name) => format!("request {name:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ref_parse() {
        assert_eq!(RequestRef::parse("42", false), RequestRef::Id(42));
        assert_eq!(RequestRef::parse("42", true), RequestRef::Name("42".to_string()));
        assert_eq!(
            RequestRef::parse("library", false),
            RequestRef::Name("library".to_string())
        );
        assert_eq!(RequestRef::from(7), RequestRef::Id(7));
    }
}
