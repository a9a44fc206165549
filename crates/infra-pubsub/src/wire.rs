// Pub/Sub REST v1 wire types (camelCase JSON)

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use topiq_core::port::BrokerError;

/// Message body sent to `topics/*:publish`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Base64 payload
    pub data: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordering_key: Option<String>,
}

impl OutboundMessage {
    pub fn new(data: &[u8], attributes: HashMap<String, String>, ordering_key: Option<String>) -> Self {
        Self {
            data: STANDARD.encode(data),
            attributes,
            ordering_key,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishRequest {
    pub messages: Vec<OutboundMessage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    #[serde(default)]
    pub message_ids: Vec<String>,
}

/// Page of `topics/*/subscriptions` (names only)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTopicSubscriptionsResponse {
    #[serde(default)]
    pub subscriptions: Vec<String>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Subscription resource returned by `PUT subscriptions/*`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResource {
    pub name: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub ack_deadline_seconds: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub max_messages: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    #[serde(default)]
    pub received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message: InboundMessage,
    #[serde(default)]
    pub delivery_attempt: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    pub message_id: String,
    #[serde(default)]
    pub publish_time: Option<DateTime<Utc>>,
}

impl InboundMessage {
    /// Decoded payload bytes
    pub fn payload(&self) -> Result<Vec<u8>, BrokerError> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| BrokerError::Decode(format!("message {} data: {}", self.message_id, e)))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    pub ack_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyAckDeadlineRequest {
    pub ack_ids: Vec<String>,
    pub ack_deadline_seconds: i32,
}

/// Google API error envelope (`{"error": {...}}`)
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// OAuth2 token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}
