// Broker Port (Interface)
// Topic-bound client for a managed publish/subscribe service

use crate::domain::{Attributes, Message, OptionsMap, QueueConfig, SubscriptionInfo};
use crate::error::QueueError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Broker communication errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Broker rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid broker response: {0}")]
    Decode(String),

    #[error("Connection closed: {0}")]
    Closed(String),
}

/// Callback invoked by an adapter once per inbound message
pub type DeliveryCallback = Arc<dyn Fn(Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Builds topic-bound clients from a queue configuration
///
/// Must not perform network I/O: only local handles are constructed.
pub trait BrokerConnector: Send + Sync {
    /// # Errors
    /// - QueueError::Credentials if credentials are absent or unusable
    /// - QueueError::Config if the topic (or project) cannot be determined
    fn connect(&self, config: &QueueConfig) -> Result<Arc<dyn TopicClient>, QueueError>;
}

/// Client bound to one topic
#[async_trait]
pub trait TopicClient: Send + Sync {
    /// Topic as the broker addresses it
    fn topic(&self) -> &str;

    /// Create a local publisher handle (no network I/O)
    fn publisher(&self, options: &OptionsMap) -> Arc<dyn TopicPublisher>;

    /// List subscriptions attached to the topic
    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionInfo>, BrokerError>;

    /// Create a subscription on the topic
    ///
    /// `name` may be bare or fully qualified.
    async fn create_subscription(
        &self,
        name: &str,
        options: &OptionsMap,
    ) -> Result<SubscriptionInfo, BrokerError>;

    /// Start delivering messages of `subscription` to `callback`
    ///
    /// Every delivered message holds one permit of `permits` until it is
    /// settled or dropped. Listeners of one handle share the same semaphore.
    async fn listen(
        &self,
        subscription: &SubscriptionInfo,
        permits: Arc<Semaphore>,
        callback: DeliveryCallback,
    ) -> Result<Box<dyn ListenerHandle>, BrokerError>;
}

/// Publisher bound to one topic
#[async_trait]
pub trait TopicPublisher: Send + Sync {
    /// Publish one message, returning the broker-assigned message id
    async fn publish(&self, data: Vec<u8>, attributes: Attributes) -> Result<String, BrokerError>;
}

/// Running delivery stream
pub trait ListenerHandle: Send + Sync {
    /// Stop delivering; unsettled messages are redelivered by the broker
    fn stop(&self);
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::application::shutdown_channel;
    use crate::domain::subscription::qualify_subscription_name;
    use crate::port::{Acknowledger, Settlement};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use tokio::sync::{mpsc, OwnedSemaphorePermit};

    /// A message as the mock broker recorded it
    #[derive(Debug, Clone, PartialEq)]
    pub struct PublishedMessage {
        pub topic: String,
        pub message_id: String,
        pub data: Vec<u8>,
        pub attributes: Attributes,
    }

    #[derive(Clone)]
    struct Envelope {
        message_id: String,
        data: Vec<u8>,
        attributes: Attributes,
    }

    #[derive(Default)]
    struct BrokerState {
        next_id: u64,
        list_calls: usize,
        create_calls: usize,
        publish_calls: usize,
        publisher_creations: usize,
        listen_calls: usize,
        published: Vec<PublishedMessage>,
        publisher_options: Vec<OptionsMap>,
        subscriptions: Vec<SubscriptionInfo>,
        backlog: HashMap<String, VecDeque<Envelope>>,
        listeners: HashMap<String, Vec<mpsc::UnboundedSender<Envelope>>>,
        cursor: usize,
        acked: Vec<String>,
        nacked: Vec<String>,
        fail_list: Option<BrokerError>,
        fail_create: Option<BrokerError>,
        fail_publish_containing: Option<String>,
    }

    impl BrokerState {
        fn next_message_id(&mut self) -> String {
            self.next_id += 1;
            self.next_id.to_string()
        }

        /// Hand an envelope to one live listener (round-robin) or park it
        fn route(&mut self, subscription: &str, envelope: Envelope) {
            if let Some(senders) = self.listeners.get_mut(subscription) {
                senders.retain(|tx| !tx.is_closed());
                if !senders.is_empty() {
                    let idx = self.cursor % senders.len();
                    self.cursor = self.cursor.wrapping_add(1);
                    if senders[idx].send(envelope.clone()).is_ok() {
                        return;
                    }
                }
            }
            self.backlog
                .entry(subscription.to_string())
                .or_default()
                .push_back(envelope);
        }

        fn fan_out(&mut self, topic: &str, envelope: Envelope) {
            let targets: Vec<String> = self
                .subscriptions
                .iter()
                .filter(|info| info.topic.as_deref() == Some(topic))
                .map(|info| info.name.clone())
                .collect();
            for name in targets {
                self.route(&name, envelope.clone());
            }
        }
    }

    /// In-memory broker
    ///
    /// Records every call, delivers published messages to listeners of the
    /// topic's subscriptions, and supports failure injection.
    #[derive(Clone, Default)]
    pub struct MockBroker {
        state: Arc<Mutex<BrokerState>>,
    }

    impl MockBroker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn connector(&self) -> Arc<dyn BrokerConnector> {
            Arc::new(MockConnector {
                broker: self.clone(),
            })
        }

        pub fn client(&self, topic: impl Into<String>) -> Arc<dyn TopicClient> {
            Arc::new(MockTopicClient {
                broker: self.clone(),
                topic: topic.into(),
            })
        }

        /// Pre-provision a subscription (as if created by a previous run)
        pub fn add_subscription(&self, topic: &str, name: &str) -> SubscriptionInfo {
            let info = SubscriptionInfo::new(qualify_subscription_name(topic, name))
                .with_topic(topic);
            self.state.lock().unwrap().subscriptions.push(info.clone());
            info
        }

        /// Deliver raw bytes straight to a subscription
        pub fn inject(&self, subscription: &str, data: Vec<u8>) -> String {
            let mut state = self.state.lock().unwrap();
            let message_id = state.next_message_id();
            let envelope = Envelope {
                message_id: message_id.clone(),
                data,
                attributes: Attributes::new(),
            };
            state.route(subscription, envelope);
            message_id
        }

        pub fn fail_list(&self, error: BrokerError) {
            self.state.lock().unwrap().fail_list = Some(error);
        }

        pub fn fail_create(&self, error: BrokerError) {
            self.state.lock().unwrap().fail_create = Some(error);
        }

        /// Reject publishes whose body contains `needle`
        pub fn fail_publish_containing(&self, needle: impl Into<String>) {
            self.state.lock().unwrap().fail_publish_containing = Some(needle.into());
        }

        pub fn clear_failures(&self) {
            let mut state = self.state.lock().unwrap();
            state.fail_list = None;
            state.fail_create = None;
            state.fail_publish_containing = None;
        }

        pub fn list_calls(&self) -> usize {
            self.state.lock().unwrap().list_calls
        }

        pub fn create_calls(&self) -> usize {
            self.state.lock().unwrap().create_calls
        }

        pub fn publish_calls(&self) -> usize {
            self.state.lock().unwrap().publish_calls
        }

        pub fn publisher_creations(&self) -> usize {
            self.state.lock().unwrap().publisher_creations
        }

        pub fn listen_calls(&self) -> usize {
            self.state.lock().unwrap().listen_calls
        }

        pub fn published(&self) -> Vec<PublishedMessage> {
            self.state.lock().unwrap().published.clone()
        }

        pub fn publisher_options(&self) -> Vec<OptionsMap> {
            self.state.lock().unwrap().publisher_options.clone()
        }

        pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
            self.state.lock().unwrap().subscriptions.clone()
        }

        pub fn acked(&self) -> Vec<String> {
            self.state.lock().unwrap().acked.clone()
        }

        pub fn nacked(&self) -> Vec<String> {
            self.state.lock().unwrap().nacked.clone()
        }

        pub fn backlog_len(&self, subscription: &str) -> usize {
            self.state
                .lock()
                .unwrap()
                .backlog
                .get(subscription)
                .map_or(0, VecDeque::len)
        }

        fn spawn_listener(
            &self,
            subscription: String,
            permits: Arc<Semaphore>,
            callback: DeliveryCallback,
            mut rx: mpsc::UnboundedReceiver<Envelope>,
        ) -> Box<dyn ListenerHandle> {
            let (stop, mut token) = shutdown_channel();
            let broker = self.clone();

            tokio::spawn(async move {
                let mut pending = None;
                loop {
                    let envelope = tokio::select! {
                        envelope = rx.recv() => match envelope {
                            Some(e) => e,
                            None => break,
                        },
                        _ = token.wait() => break,
                    };
                    let permit = tokio::select! {
                        permit = Arc::clone(&permits).acquire_owned() => permit.ok(),
                        _ = token.wait() => None,
                    };
                    let Some(permit) = permit else {
                        pending = Some(envelope);
                        break;
                    };

                    let acknowledger = Arc::new(MockAcknowledger {
                        broker: broker.clone(),
                        subscription: subscription.clone(),
                        envelope: envelope.clone(),
                        permit: Mutex::new(Some(permit)),
                    });
                    let message = Message::new(
                        envelope.message_id,
                        envelope.data,
                        envelope.attributes,
                        acknowledger,
                    );
                    tokio::spawn(callback(message));
                }

                // Undelivered envelopes go back to the subscription
                rx.close();
                let mut state = broker.state.lock().unwrap();
                if let Some(envelope) = pending {
                    state.route(&subscription, envelope);
                }
                while let Ok(envelope) = rx.try_recv() {
                    state.route(&subscription, envelope);
                }
            });

            Box::new(stop)
        }
    }

    struct MockConnector {
        broker: MockBroker,
    }

    impl BrokerConnector for MockConnector {
        fn connect(&self, config: &QueueConfig) -> Result<Arc<dyn TopicClient>, QueueError> {
            config.validate()?;
            Ok(self.broker.client(config.topic.clone()))
        }
    }

    struct MockTopicClient {
        broker: MockBroker,
        topic: String,
    }

    #[async_trait]
    impl TopicClient for MockTopicClient {
        fn topic(&self) -> &str {
            &self.topic
        }

        fn publisher(&self, options: &OptionsMap) -> Arc<dyn TopicPublisher> {
            let mut state = self.broker.state.lock().unwrap();
            state.publisher_creations += 1;
            state.publisher_options.push(options.clone());
            Arc::new(MockPublisher {
                broker: self.broker.clone(),
                topic: self.topic.clone(),
            })
        }

        async fn list_subscriptions(&self) -> Result<Vec<SubscriptionInfo>, BrokerError> {
            // Suspend like a real RPC so concurrent callers interleave
            tokio::task::yield_now().await;

            let mut state = self.broker.state.lock().unwrap();
            state.list_calls += 1;
            if let Some(error) = state.fail_list.clone() {
                return Err(error);
            }
            Ok(state
                .subscriptions
                .iter()
                .filter(|info| info.topic.as_deref() == Some(self.topic.as_str()))
                .cloned()
                .collect())
        }

        async fn create_subscription(
            &self,
            name: &str,
            _options: &OptionsMap,
        ) -> Result<SubscriptionInfo, BrokerError> {
            tokio::task::yield_now().await;

            let mut state = self.broker.state.lock().unwrap();
            state.create_calls += 1;
            if let Some(error) = state.fail_create.clone() {
                return Err(error);
            }
            let full_name = qualify_subscription_name(&self.topic, name);
            if state.subscriptions.iter().any(|info| info.name == full_name) {
                return Err(BrokerError::Rejected {
                    status: 409,
                    message: format!("Resource already exists: {}", full_name),
                });
            }
            let info = SubscriptionInfo::new(full_name).with_topic(self.topic.clone());
            state.subscriptions.push(info.clone());
            Ok(info)
        }

        async fn listen(
            &self,
            subscription: &SubscriptionInfo,
            permits: Arc<Semaphore>,
            callback: DeliveryCallback,
        ) -> Result<Box<dyn ListenerHandle>, BrokerError> {
            let (tx, rx) = mpsc::unbounded_channel();
            {
                let mut state = self.broker.state.lock().unwrap();
                state.listen_calls += 1;
                if let Some(parked) = state.backlog.remove(&subscription.name) {
                    for envelope in parked {
                        let _ = tx.send(envelope);
                    }
                }
                state
                    .listeners
                    .entry(subscription.name.clone())
                    .or_default()
                    .push(tx);
            }
            Ok(self
                .broker
                .spawn_listener(subscription.name.clone(), permits, callback, rx))
        }
    }

    struct MockPublisher {
        broker: MockBroker,
        topic: String,
    }

    #[async_trait]
    impl TopicPublisher for MockPublisher {
        async fn publish(
            &self,
            data: Vec<u8>,
            attributes: Attributes,
        ) -> Result<String, BrokerError> {
            tokio::task::yield_now().await;

            let mut state = self.broker.state.lock().unwrap();
            state.publish_calls += 1;
            if let Some(needle) = &state.fail_publish_containing {
                if String::from_utf8_lossy(&data).contains(needle.as_str()) {
                    return Err(BrokerError::Rejected {
                        status: 500,
                        message: "publish rejected".to_string(),
                    });
                }
            }

            let message_id = state.next_message_id();
            state.published.push(PublishedMessage {
                topic: self.topic.clone(),
                message_id: message_id.clone(),
                data: data.clone(),
                attributes: attributes.clone(),
            });
            state.fan_out(
                &self.topic,
                Envelope {
                    message_id: message_id.clone(),
                    data,
                    attributes,
                },
            );
            Ok(message_id)
        }
    }

    struct MockAcknowledger {
        broker: MockBroker,
        subscription: String,
        envelope: Envelope,
        permit: Mutex<Option<OwnedSemaphorePermit>>,
    }

    impl Acknowledger for MockAcknowledger {
        fn settle(&self, message_id: &str, settlement: Settlement) {
            self.permit.lock().unwrap().take();
            let mut state = self.broker.state.lock().unwrap();
            match settlement {
                Settlement::Ack => state.acked.push(message_id.to_string()),
                Settlement::Nack => {
                    state.nacked.push(message_id.to_string());
                    state.route(&self.subscription, self.envelope.clone());
                }
            }
        }
    }
}
