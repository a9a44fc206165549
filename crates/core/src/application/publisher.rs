// Publisher - JSON push with a lazy publisher handle and batch fan-out

use crate::domain::config::{merge_options, MAX_LIMIT};
use crate::domain::{Attributes, OptionsMap, PublishReceipt, PushOutcome};
use crate::error::{QueueError, Result};
use crate::port::{BrokerError, TopicClient, TopicPublisher};
use futures::future::{try_join_all, BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Reserved payload key routed as message attributes
pub const ATTRIBUTES_KEY: &str = "attributes";

/// Per-call push options
#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    /// Publisher settings overlaid on the queue defaults
    ///
    /// Only consulted when the publisher is first created.
    pub publisher: OptionsMap,
}

/// Topic publisher owned by one queue instance
///
/// The broker-side publisher handle is created on first publish and reused
/// for the lifetime of the instance.
pub struct Publisher {
    label: String,
    client: Arc<dyn TopicClient>,
    defaults: OptionsMap,
    handle: OnceLock<Arc<dyn TopicPublisher>>,
    limiter: Option<Arc<Semaphore>>,
}

impl Publisher {
    /// Create a publisher
    ///
    /// # Arguments
    /// * `label` - Queue label for log records
    /// * `client` - Topic-bound broker client
    /// * `defaults` - Instance-level publisher options
    /// * `max_concurrent` - Cap on in-flight publishes (None = unbounded)
    pub fn new(
        label: impl Into<String>,
        client: Arc<dyn TopicClient>,
        defaults: OptionsMap,
        max_concurrent: Option<usize>,
    ) -> Self {
        Self {
            label: label.into(),
            client,
            defaults,
            handle: OnceLock::new(),
            limiter: max_concurrent.map(|n| Arc::new(Semaphore::new(n.clamp(1, MAX_LIMIT)))),
        }
    }

    /// Whether the broker-side publisher handle exists yet
    pub fn is_initialized(&self) -> bool {
        self.handle.get().is_some()
    }

    fn handle(&self, overrides: &OptionsMap) -> Arc<dyn TopicPublisher> {
        Arc::clone(self.handle.get_or_init(|| {
            let options = merge_options(&self.defaults, overrides);
            debug!(queue = %self.label, topic = %self.client.topic(), "Creating publisher");
            self.client.publisher(&options)
        }))
    }

    /// Push one JSON value
    ///
    /// - `null` is skipped without touching the broker
    /// - arrays fan out element by element (see [`Publisher::push_all`])
    /// - anything else is published as one message
    pub fn push_value(
        self: Arc<Self>,
        payload: Value,
        options: PushOptions,
    ) -> BoxFuture<'static, Result<PushOutcome>> {
        async move {
            match payload {
                Value::Null => Ok(PushOutcome::Skipped),
                Value::Array(items) => self
                    .push_all(items.into_iter().map(Ok), options)
                    .await
                    .map(PushOutcome::Batch),
                other => self
                    .publish_one(other, &options)
                    .await
                    .map(PushOutcome::Published),
            }
        }
        .boxed()
    }

    /// Push every item concurrently, results in input order
    ///
    /// Each item runs as its own task. The first failure observed fails the
    /// whole call; publishes already spawned are not cancelled. An item that
    /// failed to serialize stops the spawning of the items after it.
    pub async fn push_all<I>(self: &Arc<Self>, items: I, options: PushOptions) -> Result<Vec<PushOutcome>>
    where
        I: IntoIterator<Item = Result<Value>>,
    {
        let mut tasks = Vec::new();
        for item in items {
            let value = item?;
            let publisher = Arc::clone(self);
            tasks.push(tokio::spawn(publisher.push_value(value, options.clone())));
        }

        try_join_all(tasks.into_iter().map(|task| async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(QueueError::publish(
                    "Publish task did not complete",
                    BrokerError::Closed(e.to_string()),
                )),
            }
        }))
        .await
    }

    async fn publish_one(&self, payload: Value, options: &PushOptions) -> Result<PublishReceipt> {
        let (body, attributes) = split_attributes(payload);
        let data = serde_json::to_vec(&body).map_err(|e| {
            warn!(queue = %self.label, "Could not serialize push payload");
            QueueError::Serialization(e)
        })?;

        let _permit = match &self.limiter {
            Some(limiter) => Some(limiter.acquire().await.map_err(|e| {
                QueueError::publish("Publisher is closed", BrokerError::Closed(e.to_string()))
            })?),
            None => None,
        };

        let handle = self.handle(&options.publisher);
        match handle.publish(data, attributes).await {
            Ok(message_id) => {
                debug!(queue = %self.label, message_id = %message_id, "Message published");
                Ok(PublishReceipt { message_id })
            }
            Err(e) => {
                warn!(
                    queue = %self.label,
                    topic = %self.client.topic(),
                    "Could not publish message"
                );
                debug!(error = %e, "Publish failure cause");
                Err(QueueError::publish(
                    format!("Message could not be published to {}", self.client.topic()),
                    e,
                ))
            }
        }
    }
}

/// Split the reserved `attributes` object off an object payload
///
/// Only an object-valued `attributes` key is moved; string values are kept
/// as-is and other values become their JSON text.
pub fn split_attributes(mut payload: Value) -> (Value, Attributes) {
    let mut attributes = Attributes::new();
    if let Value::Object(map) = &mut payload {
        if matches!(map.get(ATTRIBUTES_KEY), Some(Value::Object(_))) {
            if let Some(Value::Object(raw)) = map.remove(ATTRIBUTES_KEY) {
                attributes = raw
                    .into_iter()
                    .map(|(key, value)| (key, attribute_text(value)))
                    .collect();
            }
        }
    }
    (payload, attributes)
}

fn attribute_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
