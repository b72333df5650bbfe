//! Volatility-regime trading: ATR ratio classifies the regime, which picks
//! between mean-reversion and breakout bias.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use quantra_core::{BoundedRing, Price, SharedClock, Side, SymbolId};

use crate::{next_signal_id, StrategyError, StrategyResult};

/// Strategy tag carried on emitted orders.
pub const STRATEGY_TAG: &str = "VOL_REGIME";

const ATR_HISTORY: usize = 50;
const MIN_ATR_SAMPLES: usize = 10;
const ATR_EPSILON: f64 = 1e-6;
/// Five-sample move beyond this fraction counts as a spike.
const SPIKE_FRACTION: f64 = 0.01;

/// Tuning for the regime classifier.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct VolConfig {
    /// ATR averaging period in samples.
    pub atr_period: usize,
    /// Regime turns HIGH above this current/average ATR ratio.
    pub high_entry_ratio: f64,
    /// Regime turns LOW below this ratio.
    pub low_entry_ratio: f64,
    pub target_profit_bps: f64,
    pub stop_loss_bps: f64,
    pub position_size_usd: f64,
    /// Positions held longer than this should be exited.
    pub max_hold_minutes: u64,
}

impl Default for VolConfig {
    fn default() -> Self {
        Self {
            atr_period: 14,
            high_entry_ratio: 1.3,
            low_entry_ratio: 0.8,
            target_profit_bps: 20.0,
            stop_loss_bps: 10.0,
            position_size_usd: 5_000.0,
            max_hold_minutes: 15,
        }
    }
}

/// Volatility regime relative to the trailing average.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VolRegime {
    High,
    Normal,
    Low,
}

/// Directional signal with the regime it was generated under.
#[derive(Clone, Debug)]
pub struct VolSignal {
    pub id: u64,
    pub symbol: SymbolId,
    pub regime: VolRegime,
    pub side: Side,
    pub current_atr: f64,
    pub avg_atr: f64,
    pub atr_ratio: f64,
    pub entry_price: Price,
    pub target_price: Price,
    pub stop_price: Price,
    pub generated_at: Instant,
}

/// Outcome counters for the strategy.
#[derive(Clone, Copy, Debug, Default)]
pub struct VolStats {
    pub total_trades: u64,
    pub high_vol_trades: u64,
    pub low_vol_trades: u64,
    pub winning_trades: u64,
    pub total_pnl: f64,
    pub win_rate: f64,
}

/// Per-symbol volatility-regime signal generator.
///
/// With single-point price samples the true range collapses to
/// `|p_i - p_{i-1}|`; that proxy is deliberate and must not be replaced
/// without OHLC input.
pub struct VolRegimeStrategy {
    config: VolConfig,
    symbol: SymbolId,
    prices: BoundedRing<f64>,
    atr_history: BoundedRing<f64>,
    current_atr: f64,
    avg_atr: f64,
    clock: SharedClock,
    stats: VolStats,
}

impl VolRegimeStrategy {
    pub fn new(symbol: SymbolId, config: VolConfig, clock: SharedClock) -> StrategyResult<Self> {
        if config.atr_period == 0 {
            return Err(StrategyError::InvalidConfig(
                "atr_period must be greater than zero".into(),
            ));
        }
        if config.low_entry_ratio >= config.high_entry_ratio {
            return Err(StrategyError::InvalidConfig(
                "low_entry_ratio must be below high_entry_ratio".into(),
            ));
        }
        let price_capacity = config.atr_period * 2;
        Ok(Self {
            config,
            symbol,
            prices: BoundedRing::new(price_capacity),
            atr_history: BoundedRing::new(ATR_HISTORY),
            current_atr: 0.0,
            avg_atr: 0.0,
            clock,
            stats: VolStats::default(),
        })
    }

    #[must_use]
    pub fn symbol(&self) -> SymbolId {
        self.symbol
    }

    #[must_use]
    pub fn config(&self) -> &VolConfig {
        &self.config
    }

    /// Admit a new price sample and refresh the ATR rings.
    pub fn update_price(&mut self, price: Price) {
        self.prices.push(price);
        if self.prices.len() < self.config.atr_period + 1 {
            return;
        }

        self.current_atr = self.compute_atr();
        self.atr_history.push(self.current_atr);

        if self.atr_history.len() >= MIN_ATR_SAMPLES {
            let sum: f64 = self.atr_history.iter().sum();
            self.avg_atr = sum / self.atr_history.len() as f64;
        }
    }

    /// Classify the current regime from the ATR ratio.
    #[must_use]
    pub fn regime(&self) -> VolRegime {
        if self.avg_atr < ATR_EPSILON {
            return VolRegime::Normal;
        }
        let ratio = self.current_atr / self.avg_atr;
        if ratio > self.config.high_entry_ratio {
            VolRegime::High
        } else if ratio < self.config.low_entry_ratio {
            VolRegime::Low
        } else {
            VolRegime::Normal
        }
    }

    /// Emit a signal according to the regime policy.
    ///
    /// HIGH volatility fades 1%+ five-sample spikes; LOW volatility takes the
    /// breakout side; NORMAL stays silent.
    pub fn generate_signal(&mut self, current_price: Price) -> Option<VolSignal> {
        if self.avg_atr < ATR_EPSILON || self.prices.len() < self.config.atr_period + 1 {
            return None;
        }

        let regime = self.regime();
        let atr_ratio = self.current_atr / self.avg_atr;
        let target_offset = self.config.target_profit_bps / 10_000.0;
        let stop_offset = self.config.stop_loss_bps / 10_000.0;

        let (side, target_price, stop_price) = match regime {
            VolRegime::High => {
                if self.recent_spike_up() {
                    // Fade the spike.
                    (
                        Side::Sell,
                        current_price * (1.0 - target_offset),
                        current_price * (1.0 + stop_offset),
                    )
                } else if self.recent_spike_down() {
                    (
                        Side::Buy,
                        current_price * (1.0 + target_offset),
                        current_price * (1.0 - stop_offset),
                    )
                } else {
                    return None;
                }
            }
            VolRegime::Low => {
                // Compression resolves in a breakout; bias long.
                (
                    Side::Buy,
                    current_price * (1.0 + target_offset),
                    current_price * (1.0 - stop_offset),
                )
            }
            VolRegime::Normal => return None,
        };

        Some(VolSignal {
            id: next_signal_id(),
            symbol: self.symbol,
            regime,
            side,
            current_atr: self.current_atr,
            avg_atr: self.avg_atr,
            atr_ratio,
            entry_price: current_price,
            target_price,
            stop_price,
            generated_at: self.clock.now(),
        })
    }

    /// Exit when held past the cap or when the regime changed since entry.
    #[must_use]
    pub fn should_exit(&self, entry: &VolSignal) -> bool {
        let held = self.clock.now().duration_since(entry.generated_at);
        if held > Duration::from_secs(self.config.max_hold_minutes * 60) {
            return true;
        }
        self.regime() != entry.regime
    }

    #[must_use]
    pub fn atr(&self) -> f64 {
        self.current_atr
    }

    #[must_use]
    pub fn avg_atr(&self) -> f64 {
        self.avg_atr
    }

    #[must_use]
    pub fn atr_ratio(&self) -> f64 {
        if self.avg_atr > ATR_EPSILON {
            self.current_atr / self.avg_atr
        } else {
            1.0
        }
    }

    /// Record the outcome of a closed trade.
    pub fn record_trade_result(&mut self, entry: &VolSignal, pnl: f64) {
        self.stats.total_trades += 1;
        self.stats.total_pnl += pnl;
        match entry.regime {
            VolRegime::High => self.stats.high_vol_trades += 1,
            VolRegime::Low => self.stats.low_vol_trades += 1,
            VolRegime::Normal => {}
        }
        if pnl > 0.0 {
            self.stats.winning_trades += 1;
        }
        self.stats.win_rate = self.stats.winning_trades as f64 / self.stats.total_trades as f64;
    }

    #[must_use]
    pub fn stats(&self) -> VolStats {
        self.stats
    }

    /// Mean absolute one-step move over the trailing ATR period.
    fn compute_atr(&self) -> f64 {
        let len = self.prices.len();
        let period = self.config.atr_period;
        let start = len - period;
        let mut sum_true_range = 0.0;
        for i in start..len {
            let current = self.prices.get(i).copied().unwrap_or(0.0);
            let previous = self.prices.get(i - 1).copied().unwrap_or(current);
            sum_true_range += (current - previous).abs();
        }
        sum_true_range / period as f64
    }

    fn recent_spike_up(&self) -> bool {
        self.five_sample_move()
            .map(|m| m > SPIKE_FRACTION)
            .unwrap_or(false)
    }

    fn recent_spike_down(&self) -> bool {
        self.five_sample_move()
            .map(|m| m < -SPIKE_FRACTION)
            .unwrap_or(false)
    }

    /// Fractional move between the latest price and the one five samples back.
    fn five_sample_move(&self) -> Option<f64> {
        let len = self.prices.len();
        if len < 10 {
            return None;
        }
        let current = self.prices.get(len - 1).copied()?;
        let reference = self.prices.get(len - 6).copied()?;
        if reference == 0.0 {
            return None;
        }
        Some((current - reference) / reference)
    }
}
