//! Startup wiring: the default handler set and the process-wide dispatcher.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use super::{
    collaborators::{
        ArtifactStore, JobSubmitter, MailSender, RepositoryStore, ScanPolicy, TagStore,
        UserDirectory,
    },
    config::Config,
    domain_events::{
        ArtifactPullHandler, AutoScanHandler, DispatchError, DispatcherBuilder, EventDispatcher,
        EventHandler, RequestMailHandler, WebhookJobHandler, handlers::EMAIL_JOB, install_global,
        topics,
    },
    email::SmtpMailSender,
    job_service::HttpJobSubmitter,
};

/// Collaborators the default handlers need.
#[derive(Clone)]
pub struct HandlerDeps {
    pub tags: Arc<dyn TagStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub repositories: Arc<dyn RepositoryStore>,
    pub scan_policy: Arc<dyn ScanPolicy>,
    pub users: Arc<dyn UserDirectory>,
    /// Defaults to `SmtpMailSender`.
    pub mailer: Option<Arc<dyn MailSender>>,
    /// Defaults to `HttpJobSubmitter` when `job_service.url` is set; without
    /// either, nothing subscribes to `WEBHOOK`.
    pub jobs: Option<Arc<dyn JobSubmitter>>,
}

/// Registers the default handlers:
///
/// | topic | handler |
/// |---|---|
/// | `PULL_ARTIFACT` | `artifact_pull` |
/// | `PUSH_ARTIFACT` | `auto_scan` |
/// | `APPROVE_REQUEST`, `REJECT_REQUEST` | `request_mail` (one instance) |
/// | `WEBHOOK` | `webhook_job` |
pub async fn default_dispatcher(
    config: Arc<RwLock<Config>>,
    deps: HandlerDeps,
) -> EventDispatcher {
    let snapshot = config.read().await.clone();

    let mailer = deps
        .mailer
        .unwrap_or_else(|| Arc::new(SmtpMailSender::new()) as Arc<dyn MailSender>);
    let request_mail: Arc<dyn EventHandler> = Arc::new(RequestMailHandler::new(
        Arc::clone(&deps.users),
        mailer,
        Arc::clone(&config),
    ));

    let mut builder = DispatcherBuilder::from_config(&snapshot.dispatcher)
        .register(
            topics::PULL_ARTIFACT,
            ArtifactPullHandler::new(
                deps.tags,
                deps.artifacts,
                deps.repositories,
                Arc::clone(&config),
            ),
        )
        .register(topics::PUSH_ARTIFACT, AutoScanHandler::new(deps.scan_policy))
        .register_shared(topics::APPROVE_REQUEST, Arc::clone(&request_mail))
        .register_shared(topics::REJECT_REQUEST, request_mail);

    let jobs = deps.jobs.or_else(|| {
        snapshot.job_service.url.as_ref().map(|url| {
            Arc::new(HttpJobSubmitter::new(
                url.clone(),
                snapshot.job_service.secret.clone(),
            )) as Arc<dyn JobSubmitter>
        })
    });
    match jobs {
        Some(jobs) => {
            builder = builder.register(topics::WEBHOOK, WebhookJobHandler::new(jobs, EMAIL_JOB));
        }
        None => info!("No job service configured, webhook events will not be forwarded"),
    }

    let dispatcher = builder.build();
    info!(
        topics = dispatcher.registry().topics().count(),
        max_concurrent = snapshot.dispatcher.max_concurrent_handlers,
        "Event dispatcher ready"
    );
    dispatcher
}

/// Builds the default dispatcher and installs it process-wide.
pub async fn init_global_dispatcher(
    config: Arc<RwLock<Config>>,
    deps: HandlerDeps,
) -> Result<Arc<EventDispatcher>, DispatchError> {
    let dispatcher = Arc::new(default_dispatcher(config, deps).await);
    install_global(Arc::clone(&dispatcher))?;
    Ok(dispatcher)
}
