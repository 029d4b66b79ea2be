//! Per-turn timeout allocation under a total wall-clock budget.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ExecutionMode;

pub const DEFAULT_TOTAL_BUDGET: Duration = Duration::from_secs(270);
pub const DEFAULT_PER_TURN_CAP: Duration = Duration::from_secs(180);
pub const DEFAULT_MIN_REMAINING: Duration = Duration::from_secs(60);
pub const DEFAULT_LEGACY_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BudgetError {
    #[error("per-turn cap ({cap:?}) exceeds total budget ({total:?})")]
    CapExceedsTotal { cap: Duration, total: Duration },
    #[error("minimum remaining ({min:?}) exceeds per-turn cap ({cap:?})")]
    MinRemainingExceedsCap { min: Duration, cap: Duration },
    #[error("legacy timeout must be non-zero")]
    ZeroLegacyTimeout,
}

/// Time policy for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetPolicy {
    /// Wall-clock allowance for all turns together.
    pub total: Duration,
    /// Upper bound for any single turn.
    pub per_turn_cap: Duration,
    /// No new turn starts with less than this left.
    pub min_remaining: Duration,
    /// Fixed timeout for single-shot requests.
    pub legacy_timeout: Duration,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            total: DEFAULT_TOTAL_BUDGET,
            per_turn_cap: DEFAULT_PER_TURN_CAP,
            min_remaining: DEFAULT_MIN_REMAINING,
            legacy_timeout: DEFAULT_LEGACY_TIMEOUT,
        }
    }
}

impl BudgetPolicy {
    /// Check `total >= per_turn_cap >= min_remaining`.
    pub fn validate(&self) -> Result<(), BudgetError> {
        if self.per_turn_cap > self.total {
            return Err(BudgetError::CapExceedsTotal {
                cap: self.per_turn_cap,
                total: self.total,
            });
        }
        if self.min_remaining > self.per_turn_cap {
            return Err(BudgetError::MinRemainingExceedsCap {
                min: self.min_remaining,
                cap: self.per_turn_cap,
            });
        }
        if self.legacy_timeout.is_zero() {
            return Err(BudgetError::ZeroLegacyTimeout);
        }
        Ok(())
    }

    /// Timeout for the next turn, or `None` when no further turn may start.
    ///
    /// Single-shot mode ignores `elapsed` and always grants the legacy timeout.
    /// A multi-turn turn still starts when exactly `min_remaining` is left.
    pub fn next_timeout(&self, mode: ExecutionMode, elapsed: Duration) -> Option<Duration> {
        match mode {
            ExecutionMode::SingleShot => Some(self.legacy_timeout),
            ExecutionMode::MultiTurn => {
                let remaining = self.total.saturating_sub(elapsed);
                if remaining < self.min_remaining {
                    return None;
                }
                Some(remaining.min(self.per_turn_cap))
            }
        }
    }
}
