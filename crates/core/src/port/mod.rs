// Port Layer - Interfaces for the external broker

pub mod acknowledger;
pub mod broker;
pub mod id_provider; // For deterministic testing

// Re-exports
pub use acknowledger::{Acknowledger, Settlement};
pub use broker::{
    BrokerConnector, BrokerError, DeliveryCallback, ListenerHandle, TopicClient, TopicPublisher,
};
pub use id_provider::IdProvider;
