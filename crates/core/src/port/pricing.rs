// Pricing Port (read-only)

use crate::domain::Pricing;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait PricingRepository: Send + Sync {
    /// Current pricing record, `None` if none has been configured
    async fn current(&self) -> Result<Option<Pricing>>;
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Pricing fixed in memory (mutable to simulate external edits)
    pub struct FixedPricing {
        pricing: Mutex<Option<Pricing>>,
    }

    impl FixedPricing {
        pub fn new(training_cost: i64, generation_cost: i64) -> Self {
            Self {
                pricing: Mutex::new(Some(Pricing {
                    training_cost,
                    generation_cost,
                })),
            }
        }

        pub fn missing() -> Self {
            Self {
                pricing: Mutex::new(None),
            }
        }

        pub fn set(&self, pricing: Option<Pricing>) {
            *self.pricing.lock().unwrap() = pricing;
        }
    }

    #[async_trait]
    impl PricingRepository for FixedPricing {
        async fn current(&self) -> Result<Option<Pricing>> {
            Ok(*self.pricing.lock().unwrap())
        }
    }
}
