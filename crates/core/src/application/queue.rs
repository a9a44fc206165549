// Queue Instance - one configured connection to a topic

use crate::application::dispatcher::{DeadLetterHook, Dispatcher, MessageHandler};
use crate::application::publisher::{PushOptions, Publisher};
use crate::application::subscription::{Subscription, SubscriptionResolver};
use crate::domain::{FlowControl, PushOutcome, QueueConfig};
use crate::error::{QueueError, Result};
use crate::port::id_provider::UuidProvider;
use crate::port::{BrokerConnector, IdProvider, TopicClient};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Per-call pull options
#[derive(Clone, Default)]
pub struct PullOptions {
    /// Subscription to pull from (defaults to the configured one)
    pub subscription: Option<String>,
    /// Observer for messages dropped as undecodable
    pub dead_letter: Option<Arc<dyn DeadLetterHook>>,
}

impl PullOptions {
    pub fn subscription(name: impl Into<String>) -> Self {
        Self {
            subscription: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_dead_letter(mut self, hook: Arc<dyn DeadLetterHook>) -> Self {
        self.dead_letter = Some(hook);
        self
    }
}

/// Queue bound to one configuration
///
/// Owns at most one publisher and one cached handle per subscription name.
pub struct QueueInstance {
    id: String,
    config: Arc<QueueConfig>,
    client: Arc<dyn TopicClient>,
    publisher: Arc<Publisher>,
    resolver: SubscriptionResolver,
}

impl QueueInstance {
    /// Build a queue instance (no network I/O)
    ///
    /// # Errors
    /// - QueueError::Credentials if credentials are absent
    /// - QueueError::Config if the topic is absent or the connector rejects it
    pub fn connect(config: QueueConfig, connector: &dyn BrokerConnector) -> Result<Self> {
        Self::connect_with_ids(config, connector, &UuidProvider)
    }

    /// Same as [`QueueInstance::connect`] with a custom id source
    pub fn connect_with_ids(
        config: QueueConfig,
        connector: &dyn BrokerConnector,
        ids: &dyn IdProvider,
    ) -> Result<Self> {
        config.validate()?;
        let client = connector.connect(&config)?;
        let id = ids.generate_id();

        let publisher = Arc::new(Publisher::new(
            config.name.clone(),
            Arc::clone(&client),
            config.publisher_options.clone(),
            config.max_concurrent_publishes,
        ));
        let resolver = SubscriptionResolver::new(
            config.name.clone(),
            Arc::clone(&client),
            config.subscription_options.clone(),
            FlowControl::new(config.max_messages),
        );

        info!(
            queue = %config.name,
            queue_id = %id,
            topic = %client.topic(),
            "Queue connected"
        );

        Ok(Self {
            id,
            config: Arc::new(config),
            client,
            publisher,
            resolver,
        })
    }

    /// Opaque diagnostic identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Topic as the broker addresses it
    pub fn topic(&self) -> &str {
        self.client.topic()
    }

    /// Push a payload with default options
    pub async fn push<T: Serialize + ?Sized>(&self, payload: &T) -> Result<PushOutcome> {
        self.push_with(payload, PushOptions::default()).await
    }

    /// Push a payload
    ///
    /// `null` is skipped, arrays fan out concurrently, anything else is
    /// published as one message.
    ///
    /// # Errors
    /// - QueueError::Serialization if the payload cannot become JSON
    /// - QueueError::Publish if the broker rejects a publish
    pub async fn push_with<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        options: PushOptions,
    ) -> Result<PushOutcome> {
        let value = serde_json::to_value(payload)?;
        Arc::clone(&self.publisher).push_value(value, options).await
    }

    /// Push each item as its own message, results in input order
    ///
    /// Items are serialized one at a time while publishes are spawned, so an
    /// item that fails to serialize fails the call after the items before
    /// it were already issued.
    pub async fn push_batch<T: Serialize>(
        &self,
        items: &[T],
        options: PushOptions,
    ) -> Result<Vec<PushOutcome>> {
        debug!(queue = %self.config.name, count = items.len(), "Pushing batch");
        let values = items
            .iter()
            .map(|item| serde_json::to_value(item).map_err(QueueError::Serialization));
        self.publisher.push_all(values, options).await
    }

    /// Register a handler on the configured subscription
    pub async fn pull<H>(&self, handler: H) -> Result<Arc<Subscription>>
    where
        H: MessageHandler + 'static,
    {
        self.pull_with(handler, PullOptions::default()).await
    }

    /// Register a handler, resolving (or creating) the subscription first
    ///
    /// Each call attaches one more listener to the resolved subscription.
    ///
    /// # Errors
    /// - QueueError::Config if the subscription name is empty
    /// - QueueError::Subscription if resolution or listener start fails
    pub async fn pull_with<H>(&self, handler: H, options: PullOptions) -> Result<Arc<Subscription>>
    where
        H: MessageHandler + 'static,
    {
        let name = options
            .subscription
            .as_deref()
            .unwrap_or(&self.config.subscription);
        let subscription = self.resolver.resolve(name).await?;

        let mut dispatcher = Dispatcher::new(Arc::new(handler)).with_label(self.config.name.clone());
        if let Some(hook) = options.dead_letter {
            dispatcher = dispatcher.with_dead_letter(hook);
        }
        subscription.attach(dispatcher.into_callback()).await?;

        info!(
            queue = %self.config.name,
            subscription = %subscription.name(),
            "Listening for messages"
        );
        Ok(subscription)
    }

    /// Resolve a subscription without attaching a listener
    pub async fn subscription(&self, name: &str) -> Result<Arc<Subscription>> {
        self.resolver.resolve(name).await
    }

    /// Whether the publisher has been created yet
    pub fn publisher_ready(&self) -> bool {
        self.publisher.is_initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Credentials, Message};
    use crate::port::broker::mocks::MockBroker;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use serde::ser::{Serialize, Serializer};
    use serde_json::json;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const TOPIC: &str = "projects/acme/topics/orders";

    fn credentials() -> Credentials {
        Credentials::from_value(json!({"project_id": "acme", "client_email": "svc@acme"})).unwrap()
    }

    fn connect(broker: &MockBroker) -> QueueInstance {
        let config = QueueConfig::new(TOPIC, credentials()).with_name("orders");
        QueueInstance::connect_with_ids(
            config,
            broker.connector().as_ref(),
            &SequentialIdProvider::new("q"),
        )
        .unwrap()
    }

    struct FailsOn(u32);

    impl Serialize for FailsOn {
        fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
            if self.0 == 3 {
                return Err(serde::ser::Error::custom("unserializable item"));
            }
            serializer.serialize_u32(self.0)
        }
    }

    #[test]
    fn test_connect_requires_credentials_then_topic() {
        let broker = MockBroker::new();
        let connector = broker.connector();

        let err = QueueInstance::connect(QueueConfig::default(), connector.as_ref())
            .err()
            .unwrap();
        assert_eq!(err.code(), "QUEUE.CREDENTIALS");

        let config = QueueConfig::new("", credentials());
        let err = QueueInstance::connect(config, connector.as_ref()).err().unwrap();
        assert_eq!(err.code(), "QUEUE.CONFIG");
    }

    #[test]
    fn test_connect_rejects_limits_beyond_semaphore_capacity() {
        let broker = MockBroker::new();
        let connector = broker.connector();

        let config = QueueConfig::new(TOPIC, credentials()).with_max_messages(usize::MAX);
        let err = QueueInstance::connect(config, connector.as_ref()).err().unwrap();
        assert_eq!(err.code(), "QUEUE.CONFIG");

        let config = QueueConfig::new(TOPIC, credentials()).with_max_concurrent_publishes(usize::MAX);
        let err = QueueInstance::connect(config, connector.as_ref()).err().unwrap();
        assert_eq!(err.code(), "QUEUE.CONFIG");
    }

    #[test]
    fn test_connect_assigns_id_without_broker_calls() {
        let broker = MockBroker::new();
        let queue = connect(&broker);

        assert_eq!(queue.id(), "q-1");
        assert_eq!(queue.topic(), TOPIC);
        assert!(!queue.publisher_ready());
        assert_eq!(broker.list_calls() + broker.publisher_creations(), 0);
    }

    #[tokio::test]
    async fn test_push_non_string_map_keys_is_serialization_error() {
        let broker = MockBroker::new();
        let queue = connect(&broker);

        let mut bad = HashMap::new();
        bad.insert((1, 2), "v");
        let err = queue.push(&bad).await.unwrap_err();

        assert_eq!(err.code(), "QUEUE.SERIALIZATION");
        assert_eq!(broker.publish_calls(), 0);
    }

    #[tokio::test]
    async fn test_push_batch_serialization_failure_keeps_earlier_publishes() {
        let broker = MockBroker::new();
        let queue = connect(&broker);

        let items = [FailsOn(1), FailsOn(2), FailsOn(3), FailsOn(4)];
        let err = queue
            .push_batch(&items, PushOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "QUEUE.SERIALIZATION");

        // Spawned publishes for items 1 and 2 still complete
        tokio::time::timeout(Duration::from_secs(1), async {
            while broker.published().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(broker.published().len(), 2);
    }

    #[tokio::test]
    async fn test_pull_receives_pushed_payload() {
        let broker = MockBroker::new();
        let queue = connect(&broker);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let subscription = queue
            .pull(move |message: Message| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(message.data().cloned());
                    message.ack();
                }
            })
            .await
            .unwrap();
        assert_eq!(subscription.name(), "projects/acme/subscriptions/default");

        queue.push(&json!({"order": 7, "items": ["a", "b"]})).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, Some(json!({"order": 7, "items": ["a", "b"]})));
        subscription.close().await;
    }

    #[tokio::test]
    async fn test_pull_with_named_subscription_reuses_handle() {
        let broker = MockBroker::new();
        let queue = connect(&broker);

        let first = queue
            .pull_with(|_m: Message| async {}, PullOptions::subscription("audit"))
            .await
            .unwrap();
        let second = queue
            .pull_with(|_m: Message| async {}, PullOptions::subscription("audit"))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.listener_count().await, 2);
        assert_eq!(broker.create_calls(), 1);
        first.close().await;
    }

    #[tokio::test]
    async fn test_pull_with_empty_name_is_config_error() {
        let broker = MockBroker::new();
        let queue = connect(&broker);

        let err = queue
            .pull_with(|_m: Message| async {}, PullOptions::subscription(""))
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "QUEUE.CONFIG");
    }
}
