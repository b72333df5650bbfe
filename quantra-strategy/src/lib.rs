//! Strategy cores that turn market state into candidate orders.
//!
//! Each strategy owns its bounded history and is driven by a single logical
//! consumer; the adverse-selection filter additionally locks its fill ring
//! because record and price-update threads may differ.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

pub mod adverse;
pub mod latency_arb;
pub mod obi;
pub mod pairs;
mod stats;
pub mod vol_regime;

pub use adverse::{
    AdverseConfig, AdverseSelectionFilter, AdverseStats, ToxicityReport, ToxicityTier,
};
pub use latency_arb::{ArbConfig, ArbOpportunity, ArbStats, LatencyArbStrategy};
pub use obi::{ObiConfig, ObiSignal, ObiStats, ObiStrategy};
pub use pairs::{PairSignal, PairsConfig, PairsStats, PairsStrategy};
pub use stats::{pearson_correlation, RunningStats};
pub use vol_regime::{VolConfig, VolRegime, VolRegimeStrategy, VolSignal, VolStats};

/// Result alias used within strategy implementations.
pub type StrategyResult<T> = Result<T, StrategyError>;

/// Failure variants surfaced by strategies.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// Raised when a strategy's configuration cannot be parsed or is invalid.
    #[error("configuration is invalid: {0}")]
    InvalidConfig(String),
}

static SIGNAL_SEQ: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique signal id.
#[must_use]
pub fn next_signal_id() -> u64 {
    SIGNAL_SEQ.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_ids_are_unique_and_increasing() {
        let first = next_signal_id();
        let second = next_signal_id();
        assert!(second > first);
    }
}
