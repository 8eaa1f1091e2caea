use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::collaborators::{CollaboratorResult, JobKind, JobSubmission, JobSubmitter};

const JOBS_PATH: &str = "/api/v1/jobs";

#[derive(Debug, Serialize)]
struct JobRequest<'a> {
    job: JobData<'a>,
}

#[derive(Debug, Serialize)]
struct JobData<'a> {
    name: &'a str,
    parameters: &'a HashMap<String, serde_json::Value>,
    metadata: JobMetadata,
}

#[derive(Debug, Serialize)]
struct JobMetadata {
    kind: JobKind,
}

/// Submits jobs to the job service over its HTTP API.
#[derive(Clone)]
pub struct HttpJobSubmitter {
    client: reqwest::Client,
    base_url: String,
    secret: Option<String>,
}

impl HttpJobSubmitter {
    pub fn new(base_url: impl Into<String>, secret: Option<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, secret)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        secret: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret,
        }
    }

    fn jobs_url(&self) -> String {
        format!("{}{}", self.base_url, JOBS_PATH)
    }
}

#[async_trait]
impl JobSubmitter for HttpJobSubmitter {
    async fn submit(&self, job: JobSubmission) -> CollaboratorResult<()> {
        let body = JobRequest {
            job: JobData {
                name: &job.name,
                parameters: &job.parameters,
                metadata: JobMetadata { kind: job.kind },
            },
        };

        let mut request = self.client.post(self.jobs_url()).json(&body);
        if let Some(secret) = &self.secret {
            request = request.header("Authorization", format!("Harbor-Secret {secret}"));
        }

        let response = request.send().await?.error_for_status()?;
        debug!(job = %job.name, status = %response.status(), "Job submitted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_jobs_url_ignores_trailing_slash() {
        let submitter = HttpJobSubmitter::new("http://jobservice:8080/", None);
        assert_eq!(submitter.jobs_url(), "http://jobservice:8080/api/v1/jobs");
    }

    #[test]
    fn test_request_body_shape() {
        let mut parameters = HashMap::new();
        parameters.insert("address".to_string(), json!("ops@example.com"));
        let body = JobRequest {
            job: JobData {
                name: "EMAIL",
                parameters: &parameters,
                metadata: JobMetadata {
                    kind: JobKind::Generic,
                },
            },
        };

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "job": {
                    "name": "EMAIL",
                    "parameters": {"address": "ops@example.com"},
                    "metadata": {"kind": "Generic"}
                }
            })
        );
    }

    #[tokio::test]
    async fn test_unreachable_service_is_http_error() {
        let submitter = HttpJobSubmitter::new("http://127.0.0.1:1", None);
        let result = submitter
            .submit(JobSubmission {
                name: "EMAIL".to_string(),
                kind: JobKind::Generic,
                parameters: HashMap::new(),
            })
            .await;
        assert!(matches!(
            result,
            Err(crate::services::collaborators::CollaboratorError::Http(_))
        ));
    }
}
