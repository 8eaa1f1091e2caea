use std::{fmt, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::collaborators::SmtpSettings;

pub const CONFIG_VERSION: &str = "v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

fn default_config_version() -> String {
    CONFIG_VERSION.to_string()
}

fn default_product_name() -> String {
    "HyperRegistry".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_quota_per_project_enabled() -> bool {
    true
}

fn default_storage_per_project() -> i64 {
    -1
}

fn default_handler_timeout_secs() -> u64 {
    60
}

fn default_max_concurrent_handlers() -> usize {
    32
}

fn default_failure_history() -> usize {
    1000
}

/// SMTP settings used by the request mailer.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub insecure: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            identity: String::new(),
            username: String::new(),
            password: String::new(),
            from: String::new(),
            ssl: false,
            insecure: false,
        }
    }
}

impl fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("identity", &self.identity)
            .field("username", &self.username)
            .field("password", &"*****")
            .field("from", &self.from)
            .field("ssl", &self.ssl)
            .field("insecure", &self.insecure)
            .finish()
    }
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty() && !self.from.trim().is_empty()
    }

    pub fn smtp_settings(&self, timeout: Duration) -> SmtpSettings {
        SmtpSettings {
            host: self.host.trim().to_string(),
            port: self.port,
            identity: self.identity.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            timeout,
            use_ssl: self.ssl,
            insecure_skip_verify: self.insecure,
            from: self.from.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QuotaConfig {
    #[serde(default = "default_quota_per_project_enabled")]
    pub quota_per_project_enabled: bool,
    /// Storage hard limit in bytes for each new project; -1 means unlimited.
    #[serde(default = "default_storage_per_project")]
    pub storage_per_project: i64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            quota_per_project_enabled: default_quota_per_project_enabled(),
            storage_per_project: default_storage_per_project(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct ArtifactEventConfig {
    #[serde(default)]
    pub pull_time_update_disabled: bool,
    #[serde(default)]
    pub pull_count_update_disabled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DispatcherConfig {
    /// Upper bound on a single handler delivery.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_handlers")]
    pub max_concurrent_handlers: usize,
    /// How many dropped deliveries are kept for inspection.
    #[serde(default = "default_failure_history")]
    pub failure_history: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            handler_timeout_secs: default_handler_timeout_secs(),
            max_concurrent_handlers: default_max_concurrent_handlers(),
            failure_history: default_failure_history(),
        }
    }
}

impl DispatcherConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct JobServiceConfig {
    /// Base URL of the job service; webhook forwarding is off when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: String,
    #[serde(default = "default_product_name")]
    pub product_name: String,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub artifact_events: ArtifactEventConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub job_service: JobServiceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            product_name: default_product_name(),
            email: EmailConfig::default(),
            quota: QuotaConfig::default(),
            artifact_events: ArtifactEventConfig::default(),
            dispatcher: DispatcherConfig::default(),
            job_service: JobServiceConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatcher.max_concurrent_handlers == 0 {
            return Err(ConfigError::ValidationError(
                "dispatcher.max_concurrent_handlers must be at least 1".to_string(),
            ));
        }
        if self.dispatcher.handler_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "dispatcher.handler_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.email.is_configured() && self.email.port == 0 {
            return Err(ConfigError::ValidationError(
                "email.port must be set when SMTP is configured".to_string(),
            ));
        }
        if self.quota.storage_per_project < -1 {
            return Err(ConfigError::ValidationError(format!(
                "quota.storage_per_project must be -1 or a byte count, got {}",
                self.quota.storage_per_project
            )));
        }
        Ok(())
    }
}

impl From<String> for Config {
    fn from(raw_config: String) -> Self {
        match serde_json::from_str::<Config>(&raw_config) {
            Ok(config) => match config.validate() {
                Ok(()) => config,
                Err(e) => {
                    tracing::warn!("Config rejected: {}, using default", e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Config could not be parsed: {}, using default", e);
                Self::default()
            }
        }
    }
}

/// Will always return config, falling back to defaults when the file is missing or broken
pub async fn load_config_from_file(config_path: &Path) -> Config {
    match tokio::fs::read_to_string(config_path).await {
        Ok(raw_config) => Config::from(raw_config),
        Err(_) => {
            tracing::info!("No config file found, using defaults");
            Config::default()
        }
    }
}

/// Saves the config to the given path
pub async fn save_config_to_file(config: &Config, config_path: &Path) -> Result<(), ConfigError> {
    config.validate()?;
    let raw_config = serde_json::to_string_pretty(config)?;
    tokio::fs::write(config_path, raw_config).await?;
    Ok(())
}
