// Acknowledger Port
// Per-message settlement, implemented by each broker adapter

/// How a delivered message is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Processed; do not redeliver
    Ack,
    /// Rejected; redeliver later
    Nack,
}

/// Settles one delivered message with the broker
///
/// Called at most once per message (the envelope guards repeats). Must not
/// block: adapters hand the RPC off to a background task. Dropping the
/// acknowledger without settling releases any flow-control slot it holds.
pub trait Acknowledger: Send + Sync {
    fn settle(&self, message_id: &str, settlement: Settlement);
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every settlement it receives
    #[derive(Default, Clone)]
    pub struct RecordingAcknowledger {
        settlements: Arc<Mutex<Vec<(String, Settlement)>>>,
    }

    impl RecordingAcknowledger {
        pub fn settlements(&self) -> Vec<(String, Settlement)> {
            self.settlements.lock().unwrap().clone()
        }

        pub fn acked(&self) -> Vec<String> {
            self.filtered(Settlement::Ack)
        }

        pub fn nacked(&self) -> Vec<String> {
            self.filtered(Settlement::Nack)
        }

        fn filtered(&self, wanted: Settlement) -> Vec<String> {
            self.settlements
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, s)| *s == wanted)
                .map(|(id, _)| id.clone())
                .collect()
        }
    }

    impl Acknowledger for RecordingAcknowledger {
        fn settle(&self, message_id: &str, settlement: Settlement) {
            self.settlements
                .lock()
                .unwrap()
                .push((message_id.to_string(), settlement));
        }
    }
}
