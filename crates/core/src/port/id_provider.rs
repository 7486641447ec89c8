// ID Provider Port (for deterministic testing)

use rand::Rng;

/// Length of the numeric trigger word embedded in generation prompts
pub const TRIGGER_WORD_LEN: usize = 9;

/// ID provider interface (allows deterministic IDs in tests)
pub trait IdProvider: Send + Sync {
    /// Generate a new unique job ID
    fn generate_id(&self) -> String;

    /// Generate a numeric trigger word the trained model is keyed on
    fn generate_trigger_word(&self) -> String;
}

/// UUID v4 + random digits (production)
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn generate_trigger_word(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..TRIGGER_WORD_LEN)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }
}

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Sequential IDs: `{prefix}-1`, `{prefix}-2`, ...
    pub struct SequentialIdProvider {
        prefix: String,
        counter: AtomicU64,
    }

    impl SequentialIdProvider {
        pub fn new(prefix: impl Into<String>) -> Self {
            Self {
                prefix: prefix.into(),
                counter: AtomicU64::new(1),
            }
        }
    }

    impl IdProvider for SequentialIdProvider {
        fn generate_id(&self) -> String {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            format!("{}-{}", self.prefix, n)
        }

        fn generate_trigger_word(&self) -> String {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            format!("{:0width$}", n, width = TRIGGER_WORD_LEN)
        }
    }
}
