// Pull loop - delivers subscription messages with bounded in-flight count

use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::client::RestTransport;
use crate::constants::{NACK_DEADLINE_SECS, PULL_ERROR_DELAY, PULL_IDLE_DELAY};
use crate::wire::{AcknowledgeRequest, ModifyAckDeadlineRequest, PullRequest, PullResponse, ReceivedMessage};
use serde::de::IgnoredAny;
use topiq_core::application::{shutdown_channel, ShutdownToken};
use topiq_core::domain::Message;
use topiq_core::port::{Acknowledger, DeliveryCallback, ListenerHandle, Settlement};

/// Start a pull loop for `subscription`
///
/// Each unsettled message holds one of `permits`; loops sharing the
/// semaphore share the bound. The returned handle stops the loop; messages
/// already handed out stay settleable.
pub(crate) fn spawn_pull_loop(
    transport: Arc<RestTransport>,
    subscription: String,
    permits: Arc<Semaphore>,
    callback: DeliveryCallback,
) -> Box<dyn ListenerHandle> {
    let (stop, token) = shutdown_channel();
    let pull_loop = PullLoop {
        transport,
        subscription,
        permits,
        callback,
    };
    tokio::spawn(pull_loop.run(token));
    Box::new(stop)
}

struct PullLoop {
    transport: Arc<RestTransport>,
    subscription: String,
    permits: Arc<Semaphore>,
    callback: DeliveryCallback,
}

impl PullLoop {
    async fn run(self, mut token: ShutdownToken) {
        info!(subscription = %self.subscription, "Pull loop started");
        let resource = format!("{}:pull", self.subscription);

        while !token.is_shutdown() {
            // Wait for one free slot, then take whatever else is free
            let first = tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
                _ = token.wait() => break,
            };
            let mut slots = vec![first];
            while let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() {
                slots.push(permit);
            }

            let request = PullRequest {
                max_messages: i32::try_from(slots.len()).unwrap_or(i32::MAX),
            };
            let response = tokio::select! {
                response = self.transport.post::<_, PullResponse>(&resource, &request) => response,
                _ = token.wait() => break,
            };

            match response {
                Ok(response) if response.received_messages.is_empty() => {
                    drop(slots);
                    if pause(&mut token, PULL_IDLE_DELAY).await {
                        break;
                    }
                }
                Ok(response) => {
                    debug!(
                        subscription = %self.subscription,
                        count = response.received_messages.len(),
                        "Pulled messages"
                    );
                    for received in response.received_messages {
                        self.deliver(received, slots.pop());
                    }
                }
                Err(e) => {
                    warn!(subscription = %self.subscription, error = %e, "Pull failed");
                    drop(slots);
                    if pause(&mut token, PULL_ERROR_DELAY).await {
                        break;
                    }
                }
            }
        }

        info!(subscription = %self.subscription, "Pull loop stopped");
    }

    fn deliver(&self, received: ReceivedMessage, permit: Option<OwnedSemaphorePermit>) {
        let acknowledger = Arc::new(RestAcknowledger {
            transport: Arc::clone(&self.transport),
            subscription: self.subscription.clone(),
            ack_id: received.ack_id,
            permit: Mutex::new(permit),
        });

        let data = match received.message.payload() {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    subscription = %self.subscription,
                    message_id = %received.message.message_id,
                    error = %e,
                    "Dropping message with undecodable data"
                );
                acknowledger.settle(&received.message.message_id, Settlement::Ack);
                return;
            }
        };

        let message = Message::new(
            received.message.message_id,
            data,
            received.message.attributes,
            acknowledger,
        )
        .with_publish_time(received.message.publish_time);
        tokio::spawn((self.callback)(message));
    }
}

/// Sleep unless stopped first; true means stop
async fn pause(token: &mut ShutdownToken, delay: std::time::Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = token.wait() => true,
    }
}

/// Settles one pulled message through the REST API
struct RestAcknowledger {
    transport: Arc<RestTransport>,
    subscription: String,
    ack_id: String,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl Acknowledger for RestAcknowledger {
    fn settle(&self, message_id: &str, settlement: Settlement) {
        // Free the flow-control slot before the RPC completes
        self.permit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let transport = Arc::clone(&self.transport);
        let subscription = self.subscription.clone();
        let ack_ids = vec![self.ack_id.clone()];
        let message_id = message_id.to_string();

        tokio::spawn(async move {
            let result = match settlement {
                Settlement::Ack => {
                    let resource = format!("{}:acknowledge", subscription);
                    transport
                        .post::<_, IgnoredAny>(&resource, &AcknowledgeRequest { ack_ids })
                        .await
                }
                Settlement::Nack => {
                    let resource = format!("{}:modifyAckDeadline", subscription);
                    let request = ModifyAckDeadlineRequest {
                        ack_ids,
                        ack_deadline_seconds: NACK_DEADLINE_SECS,
                    };
                    transport.post::<_, IgnoredAny>(&resource, &request).await
                }
            };
            match result {
                Ok(_) => debug!(message_id = %message_id, ?settlement, "Message settled"),
                Err(e) => warn!(
                    subscription = %subscription,
                    message_id = %message_id,
                    error = %e,
                    "Could not settle message"
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoAuth;
    use crate::test_server::StubServer;
    use futures::FutureExt;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const SUBSCRIPTION: &str = "projects/acme/subscriptions/workers";

    fn received(ack_id: &str, id: &str, data: &str) -> serde_json::Value {
        json!({"ackId": ack_id, "message": {"data": data, "messageId": id}})
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_pull_delivers_and_acks() {
        let served = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&served);
        let server = StubServer::start(move |request| {
            if request.path.ends_with(":pull") {
                let mut served = flag.lock().unwrap();
                if !*served {
                    *served = true;
                    let body = json!({"receivedMessages": [received("a-1", "m-1", "eyJ4IjoxfQ==")]});
                    return (200, body.to_string());
                }
                return (200, "{}".to_string());
            }
            (200, "{}".to_string())
        })
        .await;
        let transport = Arc::new(RestTransport::new(
            reqwest::Client::new(),
            &server.base_url,
            Arc::new(NoAuth),
        ));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let callback: DeliveryCallback = Arc::new(move |message: Message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((message.id.clone(), message.raw().map(<[u8]>::to_vec)));
                message.ack();
            }
            .boxed()
        });
        let handle = spawn_pull_loop(transport, SUBSCRIPTION.into(), Arc::new(Semaphore::new(2)), callback);

        let (id, raw) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(id, "m-1");
        assert_eq!(raw, Some(br#"{"x":1}"#.to_vec()));

        wait_for(|| {
            server
                .requests()
                .iter()
                .any(|r| r.path.ends_with(":acknowledge") && r.body.contains("a-1"))
        })
        .await;
        handle.stop();

        let first_pull = server
            .requests()
            .into_iter()
            .find(|r| r.path.ends_with(":pull"))
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&first_pull.body).unwrap();
        assert_eq!(body, json!({"maxMessages": 2}));
    }

    #[tokio::test]
    async fn test_nack_resets_deadline() {
        let served = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&served);
        let server = StubServer::start(move |request| {
            if request.path.ends_with(":pull") && !std::mem::replace(&mut *flag.lock().unwrap(), true) {
                let body = json!({"receivedMessages": [received("a-9", "m-9", "e30=")]});
                return (200, body.to_string());
            }
            (200, "{}".to_string())
        })
        .await;
        let transport = Arc::new(RestTransport::new(
            reqwest::Client::new(),
            &server.base_url,
            Arc::new(NoAuth),
        ));

        let callback: DeliveryCallback =
            Arc::new(|message: Message| async move { message.nack() }.boxed());
        let handle = spawn_pull_loop(transport, SUBSCRIPTION.into(), Arc::new(Semaphore::new(1)), callback);

        wait_for(|| {
            server
                .requests()
                .iter()
                .any(|r| r.path.ends_with(":modifyAckDeadline"))
        })
        .await;
        handle.stop();

        let nack = server
            .requests()
            .into_iter()
            .find(|r| r.path.ends_with(":modifyAckDeadline"))
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&nack.body).unwrap();
        assert_eq!(body, json!({"ackIds": ["a-9"], "ackDeadlineSeconds": 0}));
    }

    #[tokio::test]
    async fn test_undecodable_data_is_acked_without_callback() {
        let served = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&served);
        let server = StubServer::start(move |request| {
            if request.path.ends_with(":pull") && !std::mem::replace(&mut *flag.lock().unwrap(), true) {
                let body = json!({"receivedMessages": [received("a-5", "m-5", "***")]});
                return (200, body.to_string());
            }
            (200, "{}".to_string())
        })
        .await;
        let transport = Arc::new(RestTransport::new(
            reqwest::Client::new(),
            &server.base_url,
            Arc::new(NoAuth),
        ));
        let calls = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&calls);
        let callback: DeliveryCallback = Arc::new(move |_message: Message| {
            *counter.lock().unwrap() += 1;
            async {}.boxed()
        });

        let handle = spawn_pull_loop(transport, SUBSCRIPTION.into(), Arc::new(Semaphore::new(1)), callback);
        wait_for(|| {
            server
                .requests()
                .iter()
                .any(|r| r.path.ends_with(":acknowledge") && r.body.contains("a-5"))
        })
        .await;
        handle.stop();

        assert_eq!(*calls.lock().unwrap(), 0);
    }
}
