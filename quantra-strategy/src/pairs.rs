//! Statistical pairs trading on a rolling price-ratio window.

use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use quantra_core::{
    BoundedRing, Order, OrderType, Price, Quantity, SharedClock, Side, SymbolId, Venue,
};

use crate::stats::{pearson_correlation, RunningStats};
use crate::{next_signal_id, StrategyError, StrategyResult};

/// Strategy tag carried on emitted pair legs.
pub const STRATEGY_TAG: &str = "PAIRS";

/// Samples required before mean/stddev are considered defined.
const MIN_SAMPLES: u32 = 20;
const STDDEV_EPSILON: f64 = 1e-6;

/// Tuning for one traded pair.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct PairsConfig {
    pub symbol1: String,
    pub symbol2: String,
    /// Rolling window length in samples.
    pub lookback: usize,
    pub entry_z: f64,
    pub exit_z: f64,
    pub stop_z: f64,
    /// Notional per leg; legs are dollar-neutral.
    pub position_size_usd: f64,
    /// Minimum Pearson correlation callers should demand before entering.
    pub min_correlation: f64,
}

impl Default for PairsConfig {
    fn default() -> Self {
        Self {
            symbol1: "ETHUSDT".to_string(),
            symbol2: "BTCUSDT".to_string(),
            lookback: 200,
            entry_z: 2.0,
            exit_z: 0.3,
            stop_z: 3.5,
            position_size_usd: 5_000.0,
            min_correlation: 0.75,
        }
    }
}

/// Entry signal for a divergent ratio.
#[derive(Clone, Debug)]
pub struct PairSignal {
    pub id: u64,
    pub symbol1: SymbolId,
    pub symbol2: SymbolId,
    pub side1: Side,
    pub side2: Side,
    pub ratio: f64,
    pub mean_ratio: f64,
    pub stddev_ratio: f64,
    pub z_score: f64,
    pub entry_price1: Price,
    pub entry_price2: Price,
    /// Price of symbol1 implied by the ratio reverting to its mean.
    pub target_price1: Price,
    pub stop_price1: Price,
    pub expected_profit_bps: f64,
    pub generated_at: Instant,
}

/// Outcome counters for the pair.
#[derive(Clone, Copy, Debug, Default)]
pub struct PairsStats {
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub total_pnl: f64,
    pub win_rate: f64,
    pub avg_entry_z: f64,
}

/// Mean-reversion trader for one correlated pair.
pub struct PairsStrategy {
    config: PairsConfig,
    symbol1: SymbolId,
    symbol2: SymbolId,
    ratios: BoundedRing<f64>,
    welford: RunningStats,
    price1_history: VecDeque<f64>,
    price2_history: VecDeque<f64>,
    mean_ratio: f64,
    stddev_ratio: f64,
    clock: SharedClock,
    stats: PairsStats,
}

impl PairsStrategy {
    pub fn new(config: PairsConfig, clock: SharedClock) -> StrategyResult<Self> {
        if config.lookback < 2 {
            return Err(StrategyError::InvalidConfig(
                "lookback must be at least 2".into(),
            ));
        }
        if config.entry_z <= config.exit_z {
            return Err(StrategyError::InvalidConfig(
                "`entry_z` must be greater than `exit_z`".into(),
            ));
        }
        if config.stop_z <= config.entry_z {
            return Err(StrategyError::InvalidConfig(
                "`stop_z` must be greater than `entry_z`".into(),
            ));
        }
        let symbol1 = SymbolId::register(&config.symbol1);
        let symbol2 = SymbolId::register(&config.symbol2);
        let lookback = config.lookback;
        Ok(Self {
            config,
            symbol1,
            symbol2,
            ratios: BoundedRing::new(lookback),
            welford: RunningStats::new(),
            price1_history: VecDeque::with_capacity(lookback),
            price2_history: VecDeque::with_capacity(lookback),
            mean_ratio: 0.0,
            stddev_ratio: 0.0,
            clock,
            stats: PairsStats::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &PairsConfig {
        &self.config
    }

    #[must_use]
    pub fn symbols(&self) -> (SymbolId, SymbolId) {
        (self.symbol1, self.symbol2)
    }

    /// Admit a new price pair into the rolling window.
    pub fn update_prices(&mut self, price1: Price, price2: Price) {
        if price1 <= 0.0 || price2 <= 0.0 {
            return;
        }
        let ratio = price1 / price2;

        if self.ratios.is_full() {
            if let Some(oldest) = self.ratios.front().copied() {
                self.welford.pop_front(oldest);
            }
        }
        self.ratios.push(ratio);
        self.welford.push(ratio);

        if self.price1_history.len() == self.config.lookback {
            self.price1_history.pop_front();
            self.price2_history.pop_front();
        }
        self.price1_history.push_back(price1);
        self.price2_history.push_back(price2);

        if self.welford.count() >= MIN_SAMPLES {
            self.mean_ratio = self.welford.mean();
            self.stddev_ratio = self.welford.stddev();
        }
    }

    /// Emit an entry signal when the ratio diverges past `entry_z`.
    pub fn generate_signal(&mut self, price1: Price, price2: Price) -> Option<PairSignal> {
        if price2 <= 0.0 || self.ratios.len() < self.config.lookback / 2 {
            return None;
        }
        if self.stddev_ratio < STDDEV_EPSILON {
            return None;
        }

        let ratio = price1 / price2;
        let z_score = (ratio - self.mean_ratio) / self.stddev_ratio;
        if z_score.abs() < self.config.entry_z {
            return None;
        }

        // Ratio rich: short symbol1 against symbol2. Ratio cheap: the reverse.
        let (side1, side2, stop_ratio) = if z_score > 0.0 {
            (
                Side::Sell,
                Side::Buy,
                self.mean_ratio + self.config.stop_z * self.stddev_ratio,
            )
        } else {
            (
                Side::Buy,
                Side::Sell,
                self.mean_ratio - self.config.stop_z * self.stddev_ratio,
            )
        };

        let target_price1 = self.mean_ratio * price2;
        let expected_profit_bps = ((target_price1 - price1) / price1).abs() * 10_000.0;

        debug!(
            pair = %format_args!("{}/{}", self.symbol1, self.symbol2),
            z = z_score,
            "pairs entry signal"
        );
        Some(PairSignal {
            id: next_signal_id(),
            symbol1: self.symbol1,
            symbol2: self.symbol2,
            side1,
            side2,
            ratio,
            mean_ratio: self.mean_ratio,
            stddev_ratio: self.stddev_ratio,
            z_score,
            entry_price1: price1,
            entry_price2: price2,
            target_price1,
            stop_price1: stop_ratio * price2,
            expected_profit_bps,
            generated_at: self.clock.now(),
        })
    }

    /// Whether an open pair position should be unwound at current prices.
    #[must_use]
    pub fn should_exit(&self, price1: Price, price2: Price, entry: &PairSignal) -> bool {
        if price2 <= 0.0 || self.stddev_ratio < STDDEV_EPSILON {
            return false;
        }
        let z_score = (price1 / price2 - self.mean_ratio) / self.stddev_ratio;

        // Reverted close enough to the mean.
        if z_score.abs() <= self.config.exit_z {
            return true;
        }
        // Stopped out in the entry direction.
        match entry.side1 {
            Side::Sell => z_score > self.config.stop_z,
            Side::Buy => z_score < -self.config.stop_z,
        }
    }

    /// Z-score of the most recent ratio sample.
    #[must_use]
    pub fn current_z_score(&self) -> f64 {
        if self.stddev_ratio < STDDEV_EPSILON {
            return 0.0;
        }
        match self.ratios.back() {
            Some(ratio) => (ratio - self.mean_ratio) / self.stddev_ratio,
            None => 0.0,
        }
    }

    /// Pearson correlation over the retained price histories.
    #[must_use]
    pub fn correlation(&self) -> f64 {
        if self.price1_history.len() < MIN_SAMPLES as usize {
            return 0.0;
        }
        let xs: Vec<f64> = self.price1_history.iter().copied().collect();
        let ys: Vec<f64> = self.price2_history.iter().copied().collect();
        pearson_correlation(&xs, &ys)
    }

    /// Whether the pair is currently correlated enough to trade.
    #[must_use]
    pub fn correlation_ok(&self) -> bool {
        self.correlation() >= self.config.min_correlation
    }

    /// Build the two dollar-neutral legs for an entry signal.
    #[must_use]
    pub fn create_orders(&self, signal: &PairSignal) -> (Order, Order) {
        let quantity1: Quantity = self.config.position_size_usd / signal.entry_price1;
        let quantity2: Quantity = self.config.position_size_usd / signal.entry_price2;

        // Venue assignment is the router's job; legs leave here unrouted.
        let mut leg1 = Order::new(
            pair_client_id(),
            signal.symbol1,
            Venue::Unknown,
            signal.side1,
            OrderType::Limit,
            signal.entry_price1,
            quantity1,
        );
        leg1.strategy = STRATEGY_TAG.to_string();
        leg1.signal_id = signal.id;

        let mut leg2 = Order::new(
            pair_client_id(),
            signal.symbol2,
            Venue::Unknown,
            signal.side2,
            OrderType::Limit,
            signal.entry_price2,
            quantity2,
        );
        leg2.strategy = STRATEGY_TAG.to_string();
        leg2.signal_id = signal.id;

        (leg1, leg2)
    }

    /// Record the outcome of a closed pair trade.
    pub fn record_trade_result(&mut self, entry: &PairSignal, pnl: f64) {
        self.stats.total_trades += 1;
        self.stats.total_pnl += pnl;
        if pnl > 0.0 {
            self.stats.winning_trades += 1;
        } else {
            self.stats.losing_trades += 1;
        }
        let n = self.stats.total_trades as f64;
        self.stats.avg_entry_z =
            (self.stats.avg_entry_z * (n - 1.0) + entry.z_score.abs()) / n;
        self.stats.win_rate = self.stats.winning_trades as f64 / n;
    }

    #[must_use]
    pub fn stats(&self) -> PairsStats {
        self.stats
    }
}

fn pair_client_id() -> String {
    format!("PAIR-{}", Uuid::new_v4().simple())
}
