// Queue Registry - named queue instances for the life of the process

use crate::application::queue::QueueInstance;
use crate::domain::{QueueConfig, QueueOverrides};
use crate::error::{QueueError, Result};
use crate::port::BrokerConnector;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::info;

static GLOBAL: OnceLock<QueueRegistry> = OnceLock::new();

/// Name-to-instance map (append-only)
///
/// Registering a name again replaces the entry; nothing is ever removed.
pub struct QueueRegistry {
    connector: Arc<dyn BrokerConnector>,
    queues: RwLock<HashMap<String, Arc<QueueInstance>>>,
}

impl QueueRegistry {
    pub fn new(connector: Arc<dyn BrokerConnector>) -> Self {
        Self {
            connector,
            queues: RwLock::new(HashMap::new()),
        }
    }

    /// Install the process-wide registry
    ///
    /// # Errors
    /// - QueueError::Config if a global registry is already installed
    pub fn install_global(connector: Arc<dyn BrokerConnector>) -> Result<&'static QueueRegistry> {
        let mut installed = false;
        let registry = GLOBAL.get_or_init(|| {
            installed = true;
            QueueRegistry::new(connector)
        });
        if !installed {
            return Err(QueueError::Config(
                "A global queue registry is already installed".to_string(),
            ));
        }
        Ok(registry)
    }

    /// Process-wide registry, if installed
    pub fn global() -> Option<&'static QueueRegistry> {
        GLOBAL.get()
    }

    /// Build a queue from `config` and register it under `name`
    pub fn create_named(&self, config: QueueConfig, name: &str) -> Result<Arc<QueueInstance>> {
        let config = QueueConfig {
            name: name.to_string(),
            ..config
        };
        let queue = Arc::new(QueueInstance::connect(config, self.connector.as_ref())?);

        let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
        queues.insert(name.to_string(), Arc::clone(&queue));
        info!(queue = %name, queue_id = %queue.id(), "Queue registered");
        Ok(queue)
    }

    /// Build a queue registered under the config's own name
    pub fn create(&self, config: QueueConfig) -> Result<Arc<QueueInstance>> {
        let name = config.name.clone();
        self.create_named(config, &name)
    }

    /// Build a named queue from `base` with `overrides` applied
    pub fn derive(
        &self,
        base: &QueueInstance,
        overrides: QueueOverrides,
        name: &str,
    ) -> Result<Arc<QueueInstance>> {
        self.create_named(base.config().apply(overrides), name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<QueueInstance>> {
        let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
        queues.get(name).cloned()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.queues.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Credentials;
    use crate::port::broker::mocks::MockBroker;
    use serde_json::json;

    fn config(topic: &str) -> QueueConfig {
        let credentials = Credentials::from_value(json!({"project_id": "acme"})).unwrap();
        QueueConfig::new(topic, credentials)
    }

    #[test]
    fn test_create_named_and_get() {
        let broker = MockBroker::new();
        let registry = QueueRegistry::new(broker.connector());

        let queue = registry
            .create_named(config("projects/acme/topics/a"), "alpha")
            .unwrap();

        let found = registry.get("alpha").unwrap();
        assert!(Arc::ptr_eq(&queue, &found));
        assert_eq!(found.name(), "alpha");
        assert!(registry.get("beta").is_none());
        assert_eq!(registry.names(), vec!["alpha".to_string()]);
    }

    #[test]
    fn test_global_installs_once() {
        let broker = MockBroker::new();

        let global = QueueRegistry::install_global(broker.connector()).unwrap();
        global.create_named(config("projects/acme/topics/g"), "g").unwrap();

        assert!(QueueRegistry::global().unwrap().get("g").is_some());
        assert!(QueueRegistry::install_global(broker.connector()).is_err());
    }

    #[test]
    fn test_failed_create_registers_nothing() {
        let broker = MockBroker::new();
        let registry = QueueRegistry::new(broker.connector());

        let err = registry.create_named(config(""), "broken").err().unwrap();

        assert_eq!(err.code(), "QUEUE.CONFIG");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_derive_overrides_topic_and_keeps_credentials() {
        let broker = MockBroker::new();
        let registry = QueueRegistry::new(broker.connector());
        let root = registry.create(config("projects/acme/topics/root")).unwrap();

        let derived = registry
            .derive(
                &root,
                QueueOverrides {
                    topic: Some("projects/acme/topics/audit".into()),
                    max_messages: Some(5),
                    ..Default::default()
                },
                "audit",
            )
            .unwrap();

        assert_eq!(derived.topic(), "projects/acme/topics/audit");
        assert_eq!(derived.config().max_messages, 5);
        assert!(derived.config().credentials.is_some());
        assert_ne!(root.id(), derived.id());
        assert_eq!(registry.len(), 2);
    }
}
