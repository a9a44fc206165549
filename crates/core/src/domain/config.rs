// Queue Configuration Model

use crate::domain::Credentials;
use crate::error::{QueueError, Result};
use serde_json::{Map, Value};

/// Opaque pass-through options (publisher / subscription settings)
pub type OptionsMap = Map<String, Value>;

/// Default diagnostic label for a queue
pub const DEFAULT_QUEUE_NAME: &str = "queue";

/// Default logical subscription name
pub const DEFAULT_SUBSCRIPTION: &str = "default";

/// Default max in-flight messages per subscription handle
pub const DEFAULT_MAX_MESSAGES: usize = 1;

/// Upper bound for `max_messages` and `max_concurrent_publishes`
pub const MAX_LIMIT: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Immutable configuration for one queue instance
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Diagnostic label used in log records
    pub name: String,
    /// Topic id or fully-qualified `projects/{p}/topics/{t}` path
    pub topic: String,
    pub project_id: Option<String>,
    pub credentials: Option<Credentials>,
    /// Subscription used by `pull` when none is given per call
    pub subscription: String,
    pub publisher_options: OptionsMap,
    pub subscription_options: OptionsMap,
    /// Flow control: max unsettled messages per subscription handle
    pub max_messages: usize,
    /// Cap on concurrent publishes during a batch push (None = unbounded)
    pub max_concurrent_publishes: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_QUEUE_NAME.to_string(),
            topic: String::new(),
            project_id: None,
            credentials: None,
            subscription: DEFAULT_SUBSCRIPTION.to_string(),
            publisher_options: OptionsMap::new(),
            subscription_options: OptionsMap::new(),
            max_messages: DEFAULT_MAX_MESSAGES,
            max_concurrent_publishes: None,
        }
    }
}

impl QueueConfig {
    pub fn new(topic: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            topic: topic.into(),
            credentials: Some(credentials),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscription = subscription.into();
        self
    }

    pub fn with_max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_publisher_options(mut self, options: OptionsMap) -> Self {
        self.publisher_options = options;
        self
    }

    pub fn with_subscription_options(mut self, options: OptionsMap) -> Self {
        self.subscription_options = options;
        self
    }

    pub fn with_max_concurrent_publishes(mut self, limit: usize) -> Self {
        self.max_concurrent_publishes = Some(limit);
        self
    }

    /// Validate before a queue instance is built
    ///
    /// Credentials are checked first, then the topic.
    pub fn validate(&self) -> Result<()> {
        if self.credentials.is_none() {
            return Err(QueueError::Credentials(
                "Invalid or missing credentials".to_string(),
            ));
        }
        if self.topic.trim().is_empty() {
            return Err(QueueError::Config("The topic name is required".to_string()));
        }
        if !(1..=MAX_LIMIT).contains(&self.max_messages) {
            return Err(QueueError::Config(format!(
                "messages must be a positive integer no greater than {}",
                MAX_LIMIT
            )));
        }
        if let Some(limit) = self.max_concurrent_publishes {
            if !(1..=MAX_LIMIT).contains(&limit) {
                return Err(QueueError::Config(format!(
                    "max_concurrent_publishes must be a positive integer no greater than {}",
                    MAX_LIMIT
                )));
            }
        }
        Ok(())
    }

    /// Derive a new configuration with the given overrides applied
    pub fn apply(&self, overrides: QueueOverrides) -> QueueConfig {
        let mut config = self.clone();
        if let Some(name) = overrides.name {
            config.name = name;
        }
        if let Some(topic) = overrides.topic {
            config.topic = topic;
        }
        if let Some(project_id) = overrides.project_id {
            config.project_id = Some(project_id);
        }
        if let Some(credentials) = overrides.credentials {
            config.credentials = Some(credentials);
        }
        if let Some(subscription) = overrides.subscription {
            config.subscription = subscription;
        }
        if let Some(options) = overrides.publisher_options {
            merge_options_into(&mut config.publisher_options, &options);
        }
        if let Some(options) = overrides.subscription_options {
            merge_options_into(&mut config.subscription_options, &options);
        }
        if let Some(max_messages) = overrides.max_messages {
            config.max_messages = max_messages;
        }
        if let Some(limit) = overrides.max_concurrent_publishes {
            config.max_concurrent_publishes = Some(limit);
        }
        config
    }
}

/// Per-field overrides used to derive named queues from a base config
#[derive(Debug, Clone, Default)]
pub struct QueueOverrides {
    pub name: Option<String>,
    pub topic: Option<String>,
    pub project_id: Option<String>,
    pub credentials: Option<Credentials>,
    pub subscription: Option<String>,
    pub publisher_options: Option<OptionsMap>,
    pub subscription_options: Option<OptionsMap>,
    pub max_messages: Option<usize>,
    pub max_concurrent_publishes: Option<usize>,
}

/// Deep-merge `overlay` into `base`; overlay values win on conflict
pub fn merge_options_into(base: &mut OptionsMap, overlay: &OptionsMap) {
    for (key, value) in overlay {
        match (base.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_options_into(existing, incoming);
            }
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Merge two option maps without mutating either
pub fn merge_options(base: &OptionsMap, overlay: &OptionsMap) -> OptionsMap {
    let mut merged = base.clone();
    merge_options_into(&mut merged, overlay);
    merged
}
