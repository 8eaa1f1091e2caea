//! Domain event handlers.
//!
//! Each handler is registered on the topics it serves by `bootstrap`.

mod artifact_pull;
mod auto_scan;
mod request_mail;
mod webhook_job;

pub use artifact_pull::ArtifactPullHandler;
pub use auto_scan::AutoScanHandler;
pub use request_mail::{MAIL_TIMEOUT, RequestMailHandler};
pub use webhook_job::{EMAIL_JOB, WebhookJobHandler};
