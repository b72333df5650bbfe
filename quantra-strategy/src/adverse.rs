//! Adverse-selection filter: scores post-fill price moves against our side
//! and widens market-making quotes when flow turns toxic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use quantra_core::{BoundedRing, Price, Quantity, SharedClock, Side};

use crate::{StrategyError, StrategyResult};

/// Tuning for fill-outcome scoring.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct AdverseConfig {
    /// Fills retained for scoring.
    pub lookback_fills: usize,
    /// Score above which quotes should be widened.
    pub toxic_threshold: f64,
    pub spread_multiplier_low: f64,
    pub spread_multiplier_medium: f64,
    pub spread_multiplier_high: f64,
    /// Outcome measurement window after each fill.
    pub price_window_ms: u64,
    /// Post-fill move that counts as adverse, in bps.
    pub significant_move_bps: f64,
    /// Base market-making spread used by the quote helper, in bps.
    pub base_spread_bps: f64,
}

impl Default for AdverseConfig {
    fn default() -> Self {
        Self {
            lookback_fills: 20,
            toxic_threshold: 0.6,
            spread_multiplier_low: 1.0,
            spread_multiplier_medium: 1.5,
            spread_multiplier_high: 2.5,
            price_window_ms: 500,
            significant_move_bps: 5.0,
            base_spread_bps: 2.0,
        }
    }
}

/// One recorded fill and its (eventually measured) outcome.
#[derive(Clone, Debug)]
struct FillOutcome {
    side: Side,
    price: Price,
    quantity: Quantity,
    filled_at: Instant,
    /// Price observed once the window elapsed; 0 until measured.
    price_after_window: Price,
    adverse_move_bps: f64,
    adverse: bool,
}

/// Toxicity band with its quoting consequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ToxicityTier {
    Low,
    Medium,
    High,
}

/// Scored summary over the recent fill window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToxicityReport {
    /// Composite score in [0, 1].
    pub score: f64,
    pub tier: ToxicityTier,
    pub spread_multiplier: f64,
    /// Fraction of analyzed fills that moved against us.
    pub adverse_ratio: f64,
    pub avg_adverse_move_bps: f64,
    pub ms_since_last_adverse: f64,
}

impl Default for ToxicityReport {
    fn default() -> Self {
        Self {
            score: 0.0,
            tier: ToxicityTier::Low,
            spread_multiplier: 1.0,
            adverse_ratio: 0.0,
            avg_adverse_move_bps: 0.0,
            ms_since_last_adverse: RECENCY_HORIZON_MS,
        }
    }
}

/// Aggregate counters over the retained window.
#[derive(Clone, Copy, Debug, Default)]
pub struct AdverseStats {
    pub analyzed_fills: u64,
    pub adverse_fills: u64,
    pub adverse_fill_rate: f64,
    pub avg_adverse_move_bps: f64,
    /// Notional-weighted cost of adverse moves, in quote currency.
    pub total_adverse_cost: f64,
}

const RECENCY_HORIZON_MS: f64 = 10_000.0;
const MAGNITUDE_SCALE_BPS: f64 = 20.0;

struct FilterState {
    fills: BoundedRing<FillOutcome>,
    last_adverse_at: Option<Instant>,
}

/// Detects toxic order flow from short-horizon post-fill price moves.
///
/// Fills are recorded by the execution path while prices arrive from market
/// data, so the ring lives behind a mutex. The toxicity score is cached and
/// recomputed only when a record or a finalized outcome dirties it.
pub struct AdverseSelectionFilter {
    config: AdverseConfig,
    state: Mutex<FilterState>,
    cached: Mutex<ToxicityReport>,
    dirty: AtomicBool,
    clock: SharedClock,
}

impl AdverseSelectionFilter {
    pub fn new(config: AdverseConfig, clock: SharedClock) -> StrategyResult<Self> {
        if config.lookback_fills == 0 {
            return Err(StrategyError::InvalidConfig(
                "lookback_fills must be greater than zero".into(),
            ));
        }
        if config.price_window_ms == 0 {
            return Err(StrategyError::InvalidConfig(
                "price_window_ms must be greater than zero".into(),
            ));
        }
        let fills = BoundedRing::new(config.lookback_fills);
        Ok(Self {
            config,
            state: Mutex::new(FilterState {
                fills,
                last_adverse_at: None,
            }),
            cached: Mutex::new(ToxicityReport::default()),
            dirty: AtomicBool::new(true),
            clock,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AdverseConfig {
        &self.config
    }

    /// Record one of our fills; its outcome is measured one window later.
    pub fn record_fill(&self, side: Side, price: Price, quantity: Quantity) {
        let mut state = self.state.lock();
        state.fills.push(FillOutcome {
            side,
            price,
            quantity,
            filled_at: self.clock.now(),
            price_after_window: 0.0,
            adverse_move_bps: 0.0,
            adverse: false,
        });
        self.dirty.store(true, Ordering::Release);
    }

    /// Feed the latest price; finalizes every fill whose window has elapsed.
    pub fn update_current_price(&self, price: Price) {
        let now = self.clock.now();
        let window = Duration::from_millis(self.config.price_window_ms);
        let significant = self.config.significant_move_bps;

        let mut state = self.state.lock();
        let mut last_adverse_at = state.last_adverse_at;
        let mut any_updated = false;

        for fill in state.fills.iter_mut() {
            if fill.price_after_window > 0.0 {
                continue;
            }
            if now.duration_since(fill.filled_at) < window {
                continue;
            }
            fill.price_after_window = price;
            let move_bps = (price - fill.price) / fill.price * 10_000.0;
            fill.adverse_move_bps = move_bps;
            fill.adverse = match fill.side {
                // We bought; a drop hurts us.
                Side::Buy => move_bps < -significant,
                // We sold; a rally hurts us.
                Side::Sell => move_bps > significant,
            };
            if fill.adverse {
                last_adverse_at = Some(now);
            }
            any_updated = true;
        }

        state.last_adverse_at = last_adverse_at;
        if any_updated {
            self.dirty.store(true, Ordering::Release);
        }
    }

    /// Current toxicity, recomputed only when the window changed.
    pub fn toxicity(&self) -> ToxicityReport {
        if !self.dirty.load(Ordering::Acquire) {
            return *self.cached.lock();
        }

        let state = self.state.lock();
        let mut analyzed = 0u64;
        let mut adverse = 0u64;
        let mut total_adverse_move = 0.0;
        for fill in state.fills.iter() {
            if fill.price_after_window <= 0.0 {
                continue;
            }
            analyzed += 1;
            if fill.adverse {
                adverse += 1;
                total_adverse_move += fill.adverse_move_bps.abs();
            }
        }

        let adverse_ratio = if analyzed > 0 {
            adverse as f64 / analyzed as f64
        } else {
            0.0
        };
        let avg_adverse_move_bps = if adverse > 0 {
            total_adverse_move / adverse as f64
        } else {
            0.0
        };
        let ms_since_last_adverse = state
            .last_adverse_at
            .map(|at| self.clock.now().duration_since(at).as_millis() as f64)
            .unwrap_or(RECENCY_HORIZON_MS);
        drop(state);

        let magnitude = (avg_adverse_move_bps / MAGNITUDE_SCALE_BPS).min(1.0);
        let recency = (1.0 - ms_since_last_adverse / RECENCY_HORIZON_MS).max(0.0);
        let score = 0.5 * adverse_ratio + 0.3 * magnitude + 0.2 * recency;

        let (tier, spread_multiplier) = if score < 0.3 {
            (ToxicityTier::Low, self.config.spread_multiplier_low)
        } else if score < 0.6 {
            (ToxicityTier::Medium, self.config.spread_multiplier_medium)
        } else {
            (ToxicityTier::High, self.config.spread_multiplier_high)
        };

        let report = ToxicityReport {
            score,
            tier,
            spread_multiplier,
            adverse_ratio,
            avg_adverse_move_bps,
            ms_since_last_adverse,
        };
        *self.cached.lock() = report;
        self.dirty.store(false, Ordering::Release);
        report
    }

    /// Directive for the market-making path.
    #[must_use]
    pub fn should_widen(&self) -> bool {
        self.toxicity().score > self.config.toxic_threshold
    }

    #[must_use]
    pub fn spread_multiplier(&self) -> f64 {
        self.toxicity().spread_multiplier
    }

    /// Bid/ask quotes around `mid` with the toxicity-adjusted spread.
    #[must_use]
    pub fn quotes(&self, mid: Price) -> (Price, Price) {
        let spread_bps = self.config.base_spread_bps * self.spread_multiplier();
        let half_spread = spread_bps / 10_000.0 * mid / 2.0;
        (mid - half_spread, mid + half_spread)
    }

    /// Forget all recorded fills, e.g. at session start.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.fills.clear();
        state.last_adverse_at = None;
        drop(state);
        self.dirty.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn stats(&self) -> AdverseStats {
        let state = self.state.lock();
        let mut stats = AdverseStats::default();
        let mut total_move = 0.0;
        for fill in state.fills.iter() {
            if fill.price_after_window <= 0.0 {
                continue;
            }
            stats.analyzed_fills += 1;
            if fill.adverse {
                stats.adverse_fills += 1;
                total_move += fill.adverse_move_bps.abs();
                stats.total_adverse_cost +=
                    fill.adverse_move_bps.abs() * fill.quantity * fill.price / 10_000.0;
            }
        }
        if stats.analyzed_fills > 0 {
            stats.adverse_fill_rate = stats.adverse_fills as f64 / stats.analyzed_fills as f64;
        }
        if stats.adverse_fills > 0 {
            stats.avg_adverse_move_bps = total_move / stats.adverse_fills as f64;
        }
        stats
    }
}
