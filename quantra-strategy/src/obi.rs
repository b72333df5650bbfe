//! Order-book imbalance: top-of-book pressure predicting short-term drift.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use quantra_core::{BookView, Price, SharedClock, Side, SymbolId};

use crate::{next_signal_id, StrategyError, StrategyResult};

/// Tuning for the imbalance signal.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ObiConfig {
    /// Book levels aggregated per side.
    pub num_levels: usize,
    /// Minimum |imbalance| required to signal.
    pub imbalance_threshold: f64,
    /// Minimum combined top-of-book volume; filters illiquid noise.
    pub min_volume_threshold: f64,
    pub target_profit_bps: f64,
    pub stop_loss_bps: f64,
    /// Consumers must discard signals older than this.
    pub signal_decay_ms: u64,
}

impl Default for ObiConfig {
    fn default() -> Self {
        Self {
            num_levels: 5,
            imbalance_threshold: 0.35,
            min_volume_threshold: 10.0,
            target_profit_bps: 10.0,
            stop_loss_bps: 5.0,
            signal_decay_ms: 200,
        }
    }
}

/// Directional prediction derived from book pressure.
#[derive(Clone, Debug)]
pub struct ObiSignal {
    pub id: u64,
    pub symbol: SymbolId,
    pub side: Side,
    /// Imbalance in [-1, 1]; positive means bid-heavy.
    pub imbalance: f64,
    /// Confidence in [0, 1], saturating at an imbalance of 0.7.
    pub confidence: f64,
    pub entry_price: Price,
    pub target_price: Price,
    pub stop_price: Price,
    pub generated_at: Instant,
}

/// Rolling outcome counters for the strategy.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObiStats {
    pub total_signals: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    pub total_pnl: f64,
    pub win_rate: f64,
    pub avg_hold_time_ms: f64,
}

/// Top-N order book imbalance signal generator.
pub struct ObiStrategy {
    config: ObiConfig,
    clock: SharedClock,
    stats: ObiStats,
}

impl ObiStrategy {
    pub fn new(config: ObiConfig, clock: SharedClock) -> StrategyResult<Self> {
        if config.num_levels == 0 {
            return Err(StrategyError::InvalidConfig(
                "num_levels must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&config.imbalance_threshold) {
            return Err(StrategyError::InvalidConfig(
                "imbalance_threshold must lie in [0, 1]".into(),
            ));
        }
        Ok(Self {
            config,
            clock,
            stats: ObiStats::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ObiConfig {
        &self.config
    }

    /// Inspect the book and emit a signal when pressure is one-sided enough.
    #[must_use]
    pub fn analyze(&self, symbol: SymbolId, book: &BookView) -> Option<ObiSignal> {
        let bid_volume: f64 = book
            .bids()
            .take(self.config.num_levels)
            .map(|(_, qty)| qty)
            .sum();
        let ask_volume: f64 = book
            .asks()
            .take(self.config.num_levels)
            .map(|(_, qty)| qty)
            .sum();

        let total_volume = bid_volume + ask_volume;
        if total_volume < self.config.min_volume_threshold {
            return None;
        }

        let imbalance = (bid_volume - ask_volume) / total_volume;
        if imbalance.abs() < self.config.imbalance_threshold {
            return None;
        }

        let mid = book.mid()?;
        let confidence = (imbalance.abs() / 0.7).clamp(0.0, 1.0);
        let target_offset = self.config.target_profit_bps / 10_000.0;
        let stop_offset = self.config.stop_loss_bps / 10_000.0;

        let (side, target_price, stop_price) = if imbalance > 0.0 {
            (
                Side::Buy,
                mid * (1.0 + target_offset),
                mid * (1.0 - stop_offset),
            )
        } else {
            (
                Side::Sell,
                mid * (1.0 - target_offset),
                mid * (1.0 + stop_offset),
            )
        };

        Some(ObiSignal {
            id: next_signal_id(),
            symbol,
            side,
            imbalance,
            confidence,
            entry_price: mid,
            target_price,
            stop_price,
            generated_at: self.clock.now(),
        })
    }

    /// True once the signal has outlived its decay horizon.
    #[must_use]
    pub fn is_expired(&self, signal: &ObiSignal) -> bool {
        self.clock.now().duration_since(signal.generated_at)
            > Duration::from_millis(self.config.signal_decay_ms)
    }

    /// Feed back a closed trade for the rolling stats.
    pub fn record_trade_result(&mut self, pnl: f64, hold_time_ms: u64) {
        self.stats.total_signals += 1;
        self.stats.total_pnl += pnl;
        if pnl > 0.0 {
            self.stats.winning_trades += 1;
        } else {
            self.stats.losing_trades += 1;
        }
        let n = self.stats.total_signals as f64;
        self.stats.avg_hold_time_ms =
            (self.stats.avg_hold_time_ms * (n - 1.0) + hold_time_ms as f64) / n;
        self.stats.win_rate = self.stats.winning_trades as f64 / n;
    }

    #[must_use]
    pub fn stats(&self) -> ObiStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantra_core::ManualClock;
    use std::sync::Arc;

    fn book(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> BookView {
        let mut book = BookView::new();
        book.load_snapshot(bids, asks);
        book
    }

    fn strategy(config: ObiConfig) -> (ObiStrategy, ManualClock) {
        let clock = ManualClock::new();
        let strategy = ObiStrategy::new(config, Arc::new(clock.clone())).unwrap();
        (strategy, clock)
    }

    #[test]
    fn bid_heavy_book_emits_buy_with_expected_levels() {
        let config = ObiConfig {
            num_levels: 5,
            imbalance_threshold: 0.3,
            min_volume_threshold: 10.0,
            target_profit_bps: 10.0,
            stop_loss_bps: 5.0,
            ..ObiConfig::default()
        };
        let (strategy, _clock) = strategy(config);
        let symbol = SymbolId::register("OBI-BUY");
        // Five bid levels summing 100 against five ask levels summing 40,
        // symmetric around a mid of 100.
        let book = book(
            &[
                (99.99, 20.0),
                (99.98, 20.0),
                (99.97, 20.0),
                (99.96, 20.0),
                (99.95, 20.0),
            ],
            &[
                (100.01, 8.0),
                (100.02, 8.0),
                (100.03, 8.0),
                (100.04, 8.0),
                (100.05, 8.0),
            ],
        );

        let signal = strategy.analyze(symbol, &book).expect("signal");
        assert_eq!(signal.side, Side::Buy);
        assert!((signal.imbalance - 60.0 / 140.0).abs() < 1e-9);
        assert!((signal.confidence - (60.0 / 140.0) / 0.7).abs() < 1e-9);
        assert!((signal.entry_price - 100.0).abs() < 1e-9);
        assert!((signal.target_price - 100.0 * 1.001).abs() < 1e-9);
        assert!((signal.stop_price - 100.0 * 0.9995).abs() < 1e-9);
    }

    #[test]
    fn balanced_book_is_silent() {
        let (strategy, _clock) = strategy(ObiConfig::default());
        let symbol = SymbolId::register("OBI-FLAT");
        let book = book(&[(99.0, 30.0)], &[(101.0, 30.0)]);
        assert!(strategy.analyze(symbol, &book).is_none());
    }

    #[test]
    fn thin_book_is_filtered_by_min_volume() {
        let (strategy, _clock) = strategy(ObiConfig::default());
        let symbol = SymbolId::register("OBI-THIN");
        let book = book(&[(99.0, 4.0)], &[(101.0, 1.0)]);
        assert!(strategy.analyze(symbol, &book).is_none());
    }

    #[test]
    fn ask_heavy_book_emits_sell() {
        let (strategy, _clock) = strategy(ObiConfig::default());
        let symbol = SymbolId::register("OBI-SELL");
        let book = book(&[(99.0, 5.0)], &[(101.0, 45.0)]);
        let signal = strategy.analyze(symbol, &book).expect("signal");
        assert_eq!(signal.side, Side::Sell);
        assert!(signal.imbalance < 0.0);
        assert!(signal.target_price < signal.entry_price);
        assert!(signal.stop_price > signal.entry_price);
    }

    #[test]
    fn signals_expire_after_the_decay_window() {
        let (strategy, clock) = strategy(ObiConfig {
            signal_decay_ms: 200,
            ..ObiConfig::default()
        });
        let symbol = SymbolId::register("OBI-DECAY");
        let book = book(&[(99.0, 45.0)], &[(101.0, 5.0)]);
        let signal = strategy.analyze(symbol, &book).expect("signal");

        assert!(!strategy.is_expired(&signal));
        clock.advance(Duration::from_millis(201));
        assert!(strategy.is_expired(&signal));
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let clock = Arc::new(ManualClock::new());
        let config = ObiConfig {
            num_levels: 0,
            ..ObiConfig::default()
        };
        assert!(ObiStrategy::new(config, clock).is_err());
    }
}
