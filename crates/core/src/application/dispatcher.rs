// Message Dispatcher - decode inbound payloads and hand them to the handler
// Poison messages (bad UTF-8, bad JSON) are acknowledged and dropped.

use crate::domain::{Attributes, Message, Payload};
use crate::port::DeliveryCallback;
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Caller-supplied message handler
///
/// Receives the decoded message and owns its ack/nack.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message);
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, message: Message) {
        (self)(message).await
    }
}

/// Why a message never reached the handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    InvalidUtf8(String),
    InvalidJson(String),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::InvalidUtf8(e) => write!(f, "payload is not valid UTF-8: {}", e),
            DropReason::InvalidJson(e) => write!(f, "payload is not valid JSON: {}", e),
        }
    }
}

/// A poison message as seen by a dead-letter hook
#[derive(Debug, Clone)]
pub struct DroppedMessage {
    pub id: String,
    pub data: Vec<u8>,
    pub attributes: Attributes,
    pub reason: DropReason,
}

/// Observer for messages that are dropped
///
/// Called before the message is acknowledged.
pub trait DeadLetterHook: Send + Sync {
    fn on_drop(&self, dropped: &DroppedMessage);
}

impl<F> DeadLetterHook for F
where
    F: Fn(&DroppedMessage) + Send + Sync,
{
    fn on_drop(&self, dropped: &DroppedMessage) {
        (self)(dropped)
    }
}

/// What happened to one delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Decoded and passed to the handler
    Handled,
    /// Acknowledged without calling the handler (empty body)
    Empty,
    /// Acknowledged and dropped
    Dropped(DropReason),
}

/// Decode raw bytes into a JSON value
///
/// `Ok(None)` means the payload was empty.
pub fn decode_payload(data: &[u8]) -> Result<Option<Value>, DropReason> {
    let text =
        std::str::from_utf8(data).map_err(|e| DropReason::InvalidUtf8(e.to_string()))?;
    if text.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| DropReason::InvalidJson(e.to_string()))
}

/// Wraps a handler with payload decoding
pub struct Dispatcher {
    label: String,
    handler: Arc<dyn MessageHandler>,
    dead_letter: Option<Arc<dyn DeadLetterHook>>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            label: String::new(),
            handler,
            dead_letter: None,
        }
    }

    /// Queue label for log records
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_dead_letter(mut self, hook: Arc<dyn DeadLetterHook>) -> Self {
        self.dead_letter = Some(hook);
        self
    }

    /// Decode one message and invoke the handler
    pub async fn dispatch(&self, mut message: Message) -> Delivery {
        let decoded = match &message.payload {
            Payload::Json(_) => Ok(None),
            Payload::Raw(bytes) => decode_payload(bytes).map(|value| value.map(Payload::Json)),
        };

        match decoded {
            Ok(Some(payload)) => message.payload = payload,
            Ok(None) if message.data().is_some() => {}
            Ok(None) => {
                debug!(queue = %self.label, message_id = %message.id, "Empty message acknowledged");
                message.ack();
                return Delivery::Empty;
            }
            Err(reason) => {
                warn!(
                    queue = %self.label,
                    message_id = %message.id,
                    reason = %reason,
                    "Dropping undecodable message"
                );
                if let Some(hook) = &self.dead_letter {
                    let dropped = DroppedMessage {
                        id: message.id.clone(),
                        data: message.raw().map(<[u8]>::to_vec).unwrap_or_default(),
                        attributes: message.attributes.clone(),
                        reason: reason.clone(),
                    };
                    hook.on_drop(&dropped);
                }
                message.ack();
                return Delivery::Dropped(reason);
            }
        }

        self.handler.handle(message).await;
        Delivery::Handled
    }

    /// Adapter-facing callback
    pub fn into_callback(self) -> DeliveryCallback {
        let dispatcher = Arc::new(self);
        Arc::new(move |message: Message| {
            let dispatcher = Arc::clone(&dispatcher);
            async move {
                dispatcher.dispatch(message).await;
            }
            .boxed()
        })
    }
}
