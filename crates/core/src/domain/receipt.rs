// Publish Results

use serde::Serialize;

/// Broker acknowledgement of one published message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    pub message_id: String,
}

/// Result of a push
///
/// Arrays fan out into [`PushOutcome::Batch`] in input order; a null payload
/// is [`PushOutcome::Skipped`] and never reaches the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    Skipped,
    Published(PublishReceipt),
    Batch(Vec<PushOutcome>),
}

impl PushOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, PushOutcome::Skipped)
    }

    pub fn receipt(&self) -> Option<&PublishReceipt> {
        match self {
            PushOutcome::Published(receipt) => Some(receipt),
            _ => None,
        }
    }

    pub fn batch(&self) -> Option<&[PushOutcome]> {
        match self {
            PushOutcome::Batch(outcomes) => Some(outcomes),
            _ => None,
        }
    }

    /// All broker message ids, depth-first in input order
    pub fn message_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids);
        ids
    }

    fn collect_ids<'a>(&'a self, ids: &mut Vec<&'a str>) {
        match self {
            PushOutcome::Skipped => {}
            PushOutcome::Published(receipt) => ids.push(&receipt.message_id),
            PushOutcome::Batch(outcomes) => {
                for outcome in outcomes {
                    outcome.collect_ids(ids);
                }
            }
        }
    }
}
