// Pub/Sub connector - builds topic-bound REST clients (no network I/O)

use reqwest::Client;
use std::sync::Arc;
use tracing::info;

use crate::auth::{NoAuth, ServiceAccountTokenSource, TokenSource};
use crate::client::{RestTopicClient, RestTransport};
use crate::constants::{DEFAULT_BASE_URL, EMULATOR_HOST_ENV};
use topiq_core::domain::subscription::{is_qualified, PROJECTS_PREFIX};
use topiq_core::error::{QueueError, Result};
use topiq_core::port::{BrokerConnector, TopicClient};
use topiq_core::{Credentials, QueueConfig};

/// Connector for Google Cloud Pub/Sub (or its emulator)
pub struct PubSubConnector {
    http: Client,
    base_url: String,
    emulator: bool,
}

impl PubSubConnector {
    /// Connector for the public endpoint, authenticated with service-account keys
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            emulator: false,
        }
    }

    /// Connector for an emulator at `host` (`host:port`), unauthenticated
    pub fn emulator(host: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: format!("http://{}", host.trim()),
            emulator: true,
        }
    }

    /// Emulator when `PUBSUB_EMULATOR_HOST` is set, public endpoint otherwise
    pub fn from_env() -> Self {
        match std::env::var(EMULATOR_HOST_ENV) {
            Ok(host) if !host.trim().is_empty() => {
                info!(host = %host, "Using Pub/Sub emulator");
                Self::emulator(&host)
            }
            _ => Self::new(),
        }
    }

    pub fn with_http_client(mut self, http: Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn is_emulator(&self) -> bool {
        self.emulator
    }
}

impl Default for PubSubConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerConnector for PubSubConnector {
    fn connect(&self, config: &QueueConfig) -> Result<Arc<dyn TopicClient>> {
        config.validate()?;
        let credentials = config
            .credentials
            .as_ref()
            .ok_or_else(|| QueueError::Credentials("Invalid or missing credentials".to_string()))?;
        let topic = topic_path(&config.topic, config.project_id.as_deref(), credentials)?;

        let auth: Arc<dyn TokenSource> = if self.emulator {
            Arc::new(NoAuth)
        } else {
            Arc::new(ServiceAccountTokenSource::from_credentials(
                self.http.clone(),
                credentials,
            )?)
        };
        let transport = RestTransport::new(self.http.clone(), self.base_url.clone(), auth);

        Ok(Arc::new(RestTopicClient::new(Arc::new(transport), topic)))
    }
}

/// Fully-qualified topic path
///
/// A `projects/...` topic is kept as-is; a bare one is qualified with the
/// configured project, then the credentials' project.
///
/// # Errors
/// - QueueError::Config if no project can be determined
pub fn topic_path(topic: &str, project_id: Option<&str>, credentials: &Credentials) -> Result<String> {
    let topic = topic.trim();
    if is_qualified(topic) {
        return Ok(topic.to_string());
    }
    let project = project_id
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .or_else(|| credentials.project_id())
        .ok_or_else(|| {
            QueueError::Config(format!("A project id is required to address topic {}", topic))
        })?;
    Ok(format!("{PROJECTS_PREFIX}{project}/topics/{topic}"))
}
