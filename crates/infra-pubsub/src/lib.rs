// Topiq Infrastructure - Pub/Sub REST Adapter
// Implements: BrokerConnector, TopicClient, TopicPublisher, Acknowledger

pub mod auth;
pub mod client;
pub mod connector;
pub mod constants;
mod listener;
pub mod wire;

#[cfg(test)]
mod test_server;

pub use auth::{NoAuth, ServiceAccountTokenSource, TokenSource};
pub use client::{RestPublisher, RestTopicClient, RestTransport};
pub use connector::{topic_path, PubSubConnector};
