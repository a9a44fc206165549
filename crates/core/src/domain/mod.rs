// Domain Layer - Queue configuration, messages and naming rules

pub mod config;
pub mod credentials;
pub mod message;
pub mod receipt;
pub mod subscription;

// Re-exports
pub use config::{OptionsMap, QueueConfig, QueueOverrides};
pub use credentials::Credentials;
pub use message::{Attributes, Message, Payload};
pub use receipt::{PublishReceipt, PushOutcome};
pub use subscription::{FlowControl, SubscriptionInfo};
