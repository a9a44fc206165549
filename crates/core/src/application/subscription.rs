// Subscription Resolver - reuse-if-exists, create-if-absent, cached per name

use crate::domain::subscription::{find_subscription, qualify_subscription_name};
use crate::domain::{FlowControl, OptionsMap, SubscriptionInfo};
use crate::error::{QueueError, Result};
use crate::port::{DeliveryCallback, ListenerHandle, TopicClient};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tracing::{debug, info, warn};

const PREPARE_FAILED: &str = "An error occurred while preparing subscription connection";

/// Resolved subscription handle
///
/// The durable broker resource plus the local flow-control setting. Every
/// `pull` attaches one more listener to the same handle; all of them draw
/// from one pool of `max_messages` permits.
pub struct Subscription {
    info: SubscriptionInfo,
    requested_name: String,
    flow: FlowControl,
    permits: Arc<Semaphore>,
    client: Arc<dyn TopicClient>,
    listeners: Mutex<Vec<Box<dyn ListenerHandle>>>,
}

impl Subscription {
    fn new(
        info: SubscriptionInfo,
        requested_name: impl Into<String>,
        flow: FlowControl,
        client: Arc<dyn TopicClient>,
    ) -> Self {
        Self {
            info,
            requested_name: requested_name.into(),
            flow,
            permits: Arc::new(Semaphore::new(flow.max_messages)),
            client,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Resource name as reported by the broker
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Name the caller asked for (the cache key)
    pub fn requested_name(&self) -> &str {
        &self.requested_name
    }

    pub fn info(&self) -> &SubscriptionInfo {
        &self.info
    }

    pub fn flow_control(&self) -> FlowControl {
        self.flow
    }

    /// Flow-control slots not held by an unsettled message
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Start delivering messages to `callback`
    pub async fn attach(&self, callback: DeliveryCallback) -> Result<()> {
        let listener = self
            .client
            .listen(&self.info, Arc::clone(&self.permits), callback)
            .await
            .map_err(|e| {
                warn!(subscription = %self.info.name, "Could not start message delivery");
                debug!(error = %e, "Listen failure cause");
                QueueError::subscription(PREPARE_FAILED, e)
            })?;
        self.listeners.lock().await.push(listener);
        Ok(())
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.lock().await.len()
    }

    /// Stop every attached listener
    pub async fn close(&self) {
        let mut listeners = self.listeners.lock().await;
        for listener in listeners.drain(..) {
            listener.stop();
        }
        info!(subscription = %self.info.name, "Subscription listeners stopped");
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("info", &self.info)
            .field("requested_name", &self.requested_name)
            .field("flow", &self.flow)
            .finish()
    }
}

type Slot = Arc<OnceCell<Arc<Subscription>>>;

/// Maps logical subscription names to resolved handles
///
/// Resolution is single-flight per name: concurrent first calls share one
/// list/create sequence. Failures are not cached.
pub struct SubscriptionResolver {
    label: String,
    client: Arc<dyn TopicClient>,
    options: OptionsMap,
    flow: FlowControl,
    slots: Mutex<HashMap<String, Slot>>,
}

impl SubscriptionResolver {
    pub fn new(
        label: impl Into<String>,
        client: Arc<dyn TopicClient>,
        options: OptionsMap,
        flow: FlowControl,
    ) -> Self {
        Self {
            label: label.into(),
            client,
            options,
            flow,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `name` to a subscription handle
    ///
    /// # Errors
    /// - QueueError::Config if `name` is empty
    /// - QueueError::Subscription if listing or creation fails
    pub async fn resolve(&self, name: &str) -> Result<Arc<Subscription>> {
        if name.trim().is_empty() {
            return Err(QueueError::Config(
                "A valid subscription name is required".to_string(),
            ));
        }

        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(name.to_string()).or_default())
        };

        slot.get_or_try_init(|| self.reconcile(name))
            .await
            .map(Arc::clone)
    }

    /// Handle already resolved for `name`, if any
    pub async fn cached(&self, name: &str) -> Option<Arc<Subscription>> {
        let slots = self.slots.lock().await;
        slots.get(name).and_then(|slot| slot.get().cloned())
    }

    async fn reconcile(&self, name: &str) -> Result<Arc<Subscription>> {
        let topic = self.client.topic();
        let qualified = qualify_subscription_name(topic, name);

        let existing = self.client.list_subscriptions().await.map_err(|e| {
            warn!(
                queue = %self.label,
                topic = %topic,
                "Could not fetch existing subscriptions"
            );
            debug!(error = %e, "List failure cause");
            QueueError::subscription(PREPARE_FAILED, e)
        })?;

        let info = match find_subscription(&existing, &qualified, name) {
            Some(found) => {
                info!(
                    queue = %self.label,
                    subscription = %found.name,
                    "Reusing existing subscription"
                );
                found.clone()
            }
            None => {
                let created = self
                    .client
                    .create_subscription(name, &self.options)
                    .await
                    .map_err(|e| {
                        warn!(
                            queue = %self.label,
                            topic = %topic,
                            subscription = %name,
                            "Could not create subscription"
                        );
                        debug!(error = %e, "Create failure cause");
                        QueueError::subscription(PREPARE_FAILED, e)
                    })?;
                info!(
                    queue = %self.label,
                    subscription = %created.name,
                    "Created subscription"
                );
                created
            }
        };

        Ok(Arc::new(Subscription::new(
            info,
            name,
            self.flow,
            Arc::clone(&self.client),
        )))
    }
}
