use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::services::{
    collaborators::{ArtifactStore, RepositoryStore, TagStore},
    config::Config,
    domain_events::{ArtifactEvent, DomainEvent, EventHandler, HandlerContext, HandlerError},
};

/// Records pulls: stamps the artifact's pull time and bumps the repository's
/// pull counter. Both updates are best-effort and independent.
pub struct ArtifactPullHandler {
    tags: Arc<dyn TagStore>,
    artifacts: Arc<dyn ArtifactStore>,
    repositories: Arc<dyn RepositoryStore>,
    config: Arc<RwLock<Config>>,
}

impl ArtifactPullHandler {
    pub fn new(
        tags: Arc<dyn TagStore>,
        artifacts: Arc<dyn ArtifactStore>,
        repositories: Arc<dyn RepositoryStore>,
        config: Arc<RwLock<Config>>,
    ) -> Self {
        Self {
            tags,
            artifacts,
            repositories,
            config,
        }
    }

    async fn update_pull_time(&self, event: &ArtifactEvent) {
        let artifact_id = event.artifact.id;
        let tag_id = match event.tags.first() {
            Some(tag) => match self.tags.find_tag(artifact_id, tag).await {
                Ok(tag_id) => tag_id,
                Err(e) => {
                    warn!(artifact_id, tag = %tag, error = %e, "Tag lookup failed, updating pull time without tag");
                    None
                }
            },
            None => None,
        };

        if let Err(e) = self
            .artifacts
            .update_pull_time(artifact_id, tag_id, event.occur_at)
            .await
        {
            warn!(artifact_id, error = %e, "Failed to update pull time");
        }
    }

    async fn add_pull_count(&self, event: &ArtifactEvent) {
        let repository_id = event.artifact.repository_id;
        if let Err(e) = self.repositories.add_pull_count(repository_id).await {
            warn!(repository_id, error = %e, "Failed to add pull count");
        }
    }
}

#[async_trait]
impl EventHandler for ArtifactPullHandler {
    fn name(&self) -> &'static str {
        "artifact_pull"
    }

    async fn handle(&self, event: &DomainEvent, _ctx: &HandlerContext) -> Result<(), HandlerError> {
        let DomainEvent::PullArtifact(event) = event else {
            debug!(event = event.kind(), "Not a pull event, ignoring");
            return Ok(());
        };

        let (time_disabled, count_disabled) = {
            let config = self.config.read().await;
            (
                config.artifact_events.pull_time_update_disabled,
                config.artifact_events.pull_count_update_disabled,
            )
        };

        let update_time = async {
            if !time_disabled {
                self.update_pull_time(event).await;
            }
        };
        let add_count = async {
            if !count_disabled {
                self.add_pull_count(event).await;
            }
        };
        tokio::join!(update_time, add_count);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use super::*;
    use crate::services::{
        collaborators::{CollaboratorError, CollaboratorResult},
        domain_events::{Artifact, topics},
    };

    #[derive(Default)]
    struct Recorder {
        pull_times: Mutex<Vec<(i64, Option<i64>)>>,
        pull_counts: Mutex<Vec<i64>>,
        fail_time: bool,
        fail_count: bool,
    }

    #[async_trait]
    impl TagStore for Recorder {
        async fn find_tag(&self, _artifact_id: i64, name: &str) -> CollaboratorResult<Option<i64>> {
            Ok((name == "latest").then_some(77))
        }
    }

    #[async_trait]
    impl ArtifactStore for Recorder {
        async fn update_pull_time(
            &self,
            artifact_id: i64,
            tag_id: Option<i64>,
            _pulled_at: DateTime<Utc>,
        ) -> CollaboratorResult<()> {
            self.pull_times.lock().unwrap().push((artifact_id, tag_id));
            if self.fail_time {
                return Err(CollaboratorError::Failed("db down".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RepositoryStore for Recorder {
        async fn add_pull_count(&self, repository_id: i64) -> CollaboratorResult<()> {
            self.pull_counts.lock().unwrap().push(repository_id);
            if self.fail_count {
                return Err(CollaboratorError::Failed("db down".to_string()));
            }
            Ok(())
        }
    }

    fn handler(recorder: Arc<Recorder>, config: Config) -> ArtifactPullHandler {
        ArtifactPullHandler::new(
            recorder.clone(),
            recorder.clone(),
            recorder,
            Arc::new(RwLock::new(config)),
        )
    }

    fn pull(tags: &[&str]) -> DomainEvent {
        DomainEvent::PullArtifact(ArtifactEvent {
            event_type: topics::PULL_ARTIFACT.to_string(),
            artifact: Artifact {
                id: 5,
                repository_id: 42,
                repository_name: "library/nginx".to_string(),
                digest: "sha256:abc".to_string(),
            },
            tags: tags.iter().map(|t| t.to_string()).collect(),
            operator: "robot".to_string(),
            occur_at: Utc::now(),
        })
    }

    fn ctx() -> HandlerContext {
        HandlerContext {
            topic: Arc::from(topics::PULL_ARTIFACT),
            delivery_id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            operator: "robot".to_string(),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_updates_pull_time_with_tag_and_count() {
        let recorder = Arc::new(Recorder::default());
        handler(recorder.clone(), Config::default())
            .handle(&pull(&["latest"]), &ctx())
            .await
            .unwrap();

        assert_eq!(*recorder.pull_times.lock().unwrap(), vec![(5, Some(77))]);
        assert_eq!(*recorder.pull_counts.lock().unwrap(), vec![42]);
    }

    #[tokio::test]
    async fn test_untagged_pull_has_no_tag_id() {
        let recorder = Arc::new(Recorder::default());
        handler(recorder.clone(), Config::default())
            .handle(&pull(&[]), &ctx())
            .await
            .unwrap();

        assert_eq!(*recorder.pull_times.lock().unwrap(), vec![(5, None)]);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_the_other() {
        let recorder = Arc::new(Recorder {
            fail_time: true,
            ..Default::default()
        });
        handler(recorder.clone(), Config::default())
            .handle(&pull(&["latest"]), &ctx())
            .await
            .unwrap();

        assert_eq!(recorder.pull_times.lock().unwrap().len(), 1);
        assert_eq!(*recorder.pull_counts.lock().unwrap(), vec![42]);
    }

    #[tokio::test]
    async fn test_updates_can_be_disabled() {
        let recorder = Arc::new(Recorder::default());
        let mut config = Config::default();
        config.artifact_events.pull_count_update_disabled = true;

        handler(recorder.clone(), config)
            .handle(&pull(&["latest"]), &ctx())
            .await
            .unwrap();

        assert_eq!(recorder.pull_times.lock().unwrap().len(), 1);
        assert!(recorder.pull_counts.lock().unwrap().is_empty());
    }
}
