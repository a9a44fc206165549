// Pub/Sub REST client (TopicClient / TopicPublisher implementations)

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::auth::TokenSource;
use crate::constants::{API_VERSION, LIST_PAGE_SIZE, ORDERING_KEY_OPTION};
use crate::listener::spawn_pull_loop;
use crate::wire::{
    ErrorEnvelope, ListTopicSubscriptionsResponse, OutboundMessage, PublishRequest,
    PublishResponse, SubscriptionResource,
};
use topiq_core::domain::subscription::qualify_subscription_name;
use topiq_core::domain::{Attributes, OptionsMap, SubscriptionInfo};
use topiq_core::port::{
    BrokerError, DeliveryCallback, ListenerHandle, TopicClient, TopicPublisher,
};

/// Authenticated JSON-over-HTTP transport
pub struct RestTransport {
    http: Client,
    base_url: String,
    auth: Arc<dyn TokenSource>,
}

impl RestTransport {
    pub fn new(http: Client, base_url: impl Into<String>, auth: Arc<dyn TokenSource>) -> Self {
        let mut base_url = base_url.into();
        let trimmed_len = base_url.trim_end_matches('/').len();
        base_url.truncate(trimmed_len);
        Self {
            http,
            base_url,
            auth,
        }
    }

    /// Absolute URL of a resource path (`projects/...`)
    pub fn url(&self, resource: &str) -> String {
        format!("{}/{}/{}", self.base_url, API_VERSION, resource)
    }

    pub async fn get<R: DeserializeOwned>(
        &self,
        resource: &str,
        query: &[(&str, String)],
    ) -> Result<R, BrokerError> {
        let request = self.http.request(Method::GET, self.url(resource)).query(query);
        self.execute(request).await
    }

    pub async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        resource: &str,
        body: &B,
    ) -> Result<R, BrokerError> {
        let request = self.http.request(Method::POST, self.url(resource)).json(body);
        self.execute(request).await
    }

    pub async fn put<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        resource: &str,
        body: &B,
    ) -> Result<R, BrokerError> {
        let request = self.http.request(Method::PUT, self.url(resource)).json(body);
        self.execute(request).await
    }

    async fn execute<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, BrokerError> {
        let request = match self.auth.token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|e| BrokerError::Decode(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => envelope.error.message,
            Err(_) => body,
        };
        Err(BrokerError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

/// Topic-bound REST client
pub struct RestTopicClient {
    transport: Arc<RestTransport>,
    topic: String,
}

impl RestTopicClient {
    /// `topic` must be a full `projects/{p}/topics/{t}` path
    pub fn new(transport: Arc<RestTransport>, topic: impl Into<String>) -> Self {
        Self {
            transport,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl TopicClient for RestTopicClient {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publisher(&self, options: &OptionsMap) -> Arc<dyn TopicPublisher> {
        let ordering_key = options
            .get(ORDERING_KEY_OPTION)
            .and_then(Value::as_str)
            .map(str::to_string);
        Arc::new(RestPublisher {
            transport: Arc::clone(&self.transport),
            topic: self.topic.clone(),
            ordering_key,
        })
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionInfo>, BrokerError> {
        let resource = format!("{}/subscriptions", self.topic);
        let mut subscriptions = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("pageSize", LIST_PAGE_SIZE.to_string())];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }
            let page: ListTopicSubscriptionsResponse =
                self.transport.get(&resource, &query).await?;

            subscriptions.extend(
                page.subscriptions
                    .into_iter()
                    .map(|name| SubscriptionInfo::new(name).with_topic(self.topic.clone())),
            );
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(topic = %self.topic, count = subscriptions.len(), "Listed subscriptions");
        Ok(subscriptions)
    }

    async fn create_subscription(
        &self,
        name: &str,
        options: &OptionsMap,
    ) -> Result<SubscriptionInfo, BrokerError> {
        let full_name = qualify_subscription_name(&self.topic, name);
        let mut body = options.clone();
        body.insert("topic".to_string(), Value::String(self.topic.clone()));

        let created: SubscriptionResource = self.transport.put(&full_name, &body).await?;
        info!(
            topic = %self.topic,
            subscription = %created.name,
            ack_deadline_seconds = ?created.ack_deadline_seconds,
            "Subscription created"
        );
        let topic = created.topic.unwrap_or_else(|| self.topic.clone());
        Ok(SubscriptionInfo::new(created.name).with_topic(topic))
    }

    async fn listen(
        &self,
        subscription: &SubscriptionInfo,
        permits: Arc<Semaphore>,
        callback: DeliveryCallback,
    ) -> Result<Box<dyn ListenerHandle>, BrokerError> {
        Ok(spawn_pull_loop(
            Arc::clone(&self.transport),
            subscription.name.clone(),
            permits,
            callback,
        ))
    }
}

/// Publisher bound to one topic
pub struct RestPublisher {
    transport: Arc<RestTransport>,
    topic: String,
    ordering_key: Option<String>,
}

#[async_trait]
impl TopicPublisher for RestPublisher {
    async fn publish(&self, data: Vec<u8>, attributes: Attributes) -> Result<String, BrokerError> {
        let request = PublishRequest {
            messages: vec![OutboundMessage::new(
                &data,
                attributes,
                self.ordering_key.clone(),
            )],
        };
        let resource = format!("{}:publish", self.topic);
        let response: PublishResponse = self.transport.post(&resource, &request).await?;

        response.message_ids.into_iter().next().ok_or_else(|| {
            BrokerError::Decode("publish response carried no message id".to_string())
        })
    }
}
