// Credit & Pricing Domain Model

use serde::{Deserialize, Serialize};

/// Credits charged when no pricing record exists
pub const DEFAULT_TRAINING_COST: i64 = 300;
pub const DEFAULT_GENERATION_COST: i64 = 7;

/// Pricing record (read-only from the core's perspective)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub training_cost: i64,
    pub generation_cost: i64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            training_cost: DEFAULT_TRAINING_COST,
            generation_cost: DEFAULT_GENERATION_COST,
        }
    }
}

impl Pricing {
    /// Credits a user must hold before a training is accepted
    pub fn submission_requirement(&self) -> i64 {
        self.training_cost + self.generation_cost
    }
}

/// Result of an atomic check-and-decrement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited { balance: i64 },
    InsufficientFunds { balance: i64, required: i64 },
}

impl DebitOutcome {
    pub fn is_debited(&self) -> bool {
        matches!(self, DebitOutcome::Debited { .. })
    }
}
