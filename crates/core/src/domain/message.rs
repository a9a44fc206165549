// Message Envelope

use crate::port::{Acknowledger, Settlement};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Message metadata routed alongside the body
pub type Attributes = HashMap<String, String>;

/// Message body: raw bytes from the broker, or the decoded JSON value
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Raw(Vec<u8>),
    Json(Value),
}

/// Shared settlement state; clones of a message settle at most once
struct AckState {
    settled: AtomicBool,
    acknowledger: Arc<dyn Acknowledger>,
}

/// Inbound message delivered to a handler
///
/// The dispatcher replaces `payload` with [`Payload::Json`] before the
/// handler runs. Identity and ack/nack are never touched by decoding.
#[derive(Clone)]
pub struct Message {
    pub id: String,
    pub payload: Payload,
    pub attributes: Attributes,
    pub publish_time: Option<DateTime<Utc>>,
    ack: Arc<AckState>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        data: Vec<u8>,
        attributes: Attributes,
        acknowledger: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            id: id.into(),
            payload: Payload::Raw(data),
            attributes,
            publish_time: None,
            ack: Arc::new(AckState {
                settled: AtomicBool::new(false),
                acknowledger,
            }),
        }
    }

    pub fn with_publish_time(mut self, publish_time: Option<DateTime<Utc>>) -> Self {
        self.publish_time = publish_time;
        self
    }

    /// Decoded JSON body (None until the dispatcher decoded it)
    pub fn data(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Json(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }

    /// Raw body bytes (None once decoded)
    pub fn raw(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Raw(bytes) => Some(bytes),
            Payload::Json(_) => None,
        }
    }

    /// Acknowledge: the broker will not redeliver
    pub fn ack(&self) {
        self.settle(Settlement::Ack);
    }

    /// Reject: the broker redelivers later
    pub fn nack(&self) {
        self.settle(Settlement::Nack);
    }

    pub fn is_settled(&self) -> bool {
        self.ack.settled.load(Ordering::Acquire)
    }

    fn settle(&self, settlement: Settlement) {
        if self.ack.settled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.ack.acknowledger.settle(&self.id, settlement);
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .field("attributes", &self.attributes)
            .field("publish_time", &self.publish_time)
            .field("settled", &self.is_settled())
            .finish()
    }
}
