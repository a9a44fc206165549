// ID Provider Port (for deterministic testing)

/// ID provider interface (allows deterministic queue ids in tests)
pub trait IdProvider: Send + Sync {
    /// Generate a new opaque identifier
    fn generate_id(&self) -> String;
}

/// Short random ids from UUID v4 (production)
pub struct UuidProvider;

/// Length of the diagnostic id handed to queue instances
const SHORT_ID_LEN: usize = 8;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(SHORT_ID_LEN);
        id
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Yields `{prefix}-1`, `{prefix}-2`, ...
    pub struct SequentialIdProvider {
        prefix: String,
        next: AtomicUsize,
    }

    impl SequentialIdProvider {
        pub fn new(prefix: impl Into<String>) -> Self {
            Self {
                prefix: prefix.into(),
                next: AtomicUsize::new(1),
            }
        }
    }

    impl IdProvider for SequentialIdProvider {
        fn generate_id(&self) -> String {
            let n = self.next.fetch_add(1, Ordering::Relaxed);
            format!("{}-{}", self.prefix, n)
        }
    }
}
