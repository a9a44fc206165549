// Application Layer - Queue use cases

pub mod dispatcher;
pub mod publisher;
pub mod queue;
pub mod registry;
mod shutdown;
pub mod subscription;

// Re-exports
pub use dispatcher::{DeadLetterHook, Dispatcher, DropReason, DroppedMessage, MessageHandler};
pub use publisher::{PushOptions, Publisher};
pub use queue::{PullOptions, QueueInstance};
pub use registry::QueueRegistry;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use subscription::{Subscription, SubscriptionResolver};
