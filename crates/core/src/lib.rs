// Topiq Core - Queue Logic & Broker Ports
// NO transport dependencies: brokers are reached through the port layer

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use application::{
    Dispatcher, PullOptions, PushOptions, QueueInstance, QueueRegistry, Subscription,
};
pub use domain::{Credentials, Message, Payload, PushOutcome, QueueConfig, QueueOverrides};
pub use error::{QueueError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
