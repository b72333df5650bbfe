//! Cross-venue latency arbitrage against the global best bid and ask.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use quantra_core::{
    BookView, Order, OrderType, Price, Quantity, RejectReason, SharedClock, Side, SymbolId, Venue,
};

use crate::{next_signal_id, StrategyError, StrategyResult};

/// Strategy tag carried on emitted arbitrage legs.
pub const STRATEGY_TAG: &str = "LATENCY_ARB";

const QUIET_PERIOD: Duration = Duration::from_secs(60);

/// Tuning for the cross-venue arbitrage scan.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ArbConfig {
    /// Venues eligible for the scan.
    pub venues: Vec<Venue>,
    /// Base net-profit requirement in bps.
    pub base_min_profit_bps: f64,
    /// Multiplier applied to the base threshold after a quiet minute.
    pub min_profit_decay_rate: f64,
    /// Reject when combined book-walking slippage exceeds this.
    pub max_slippage_bps: f64,
    /// Reject when either venue's book is older than this.
    pub max_orderbook_staleness_ms: u64,
    /// Target notional per arbitrage.
    pub position_size_usd: f64,
    /// Cap on simultaneously working arbitrages.
    pub max_concurrent_arbs: u32,
    /// Reject when the scan itself took longer than this.
    pub max_detection_latency_us: u64,
}

impl Default for ArbConfig {
    fn default() -> Self {
        Self {
            venues: vec![Venue::Binance, Venue::Kraken, Venue::Coinbase],
            base_min_profit_bps: 15.0,
            min_profit_decay_rate: 0.7,
            max_slippage_bps: 8.0,
            max_orderbook_staleness_ms: 50,
            position_size_usd: 2_000.0,
            max_concurrent_arbs: 3,
            max_detection_latency_us: 200,
        }
    }
}

/// A priced two-legged opportunity, valid or annotated with a reject reason.
#[derive(Clone, Debug)]
pub struct ArbOpportunity {
    pub signal_id: u64,
    pub symbol: SymbolId,
    pub buy_venue: Venue,
    pub sell_venue: Venue,
    pub buy_price: Price,
    pub sell_price: Price,
    pub gross_profit_bps: f64,
    pub fees_bps: f64,
    pub slippage_bps: f64,
    pub net_profit_bps: f64,
    pub expected_profit_usd: f64,
    pub execute_quantity: Quantity,
    pub buy_liquidity: Quantity,
    pub sell_liquidity: Quantity,
    pub detection_latency_us: u64,
    pub orderbook_age_ms: u64,
    pub is_valid: bool,
    pub reject_reason: Option<RejectReason>,
}

/// Execution outcome counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArbStats {
    pub total_opportunities: u64,
    pub executed_arbs: u64,
    pub successful_arbs: u64,
    pub failed_arbs: u64,
    pub total_profit: f64,
    pub avg_profit_bps: f64,
    pub win_rate: f64,
}

/// Global-best cross-venue arbitrage detector.
pub struct LatencyArbStrategy {
    config: ArbConfig,
    active_arbs: AtomicU32,
    last_opportunity_at: Instant,
    clock: SharedClock,
    stats: ArbStats,
}

impl LatencyArbStrategy {
    pub fn new(config: ArbConfig, clock: SharedClock) -> StrategyResult<Self> {
        if config.venues.len() < 2 {
            return Err(StrategyError::InvalidConfig(
                "latency arbitrage needs at least two venues".into(),
            ));
        }
        if config.position_size_usd <= 0.0 {
            return Err(StrategyError::InvalidConfig(
                "position_size_usd must be positive".into(),
            ));
        }
        let last_opportunity_at = clock.now();
        Ok(Self {
            config,
            active_arbs: AtomicU32::new(0),
            last_opportunity_at,
            clock,
            stats: ArbStats::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ArbConfig {
        &self.config
    }

    /// Scan all venue books for the global best buy/sell pair.
    ///
    /// Returns `None` when no candidate exists at all (missing or coincident
    /// venues, concurrency cap). A candidate that fails validation is
    /// returned with `is_valid == false` and the reject reason attached, so
    /// callers can account for near-misses.
    pub fn detect(
        &mut self,
        symbol: SymbolId,
        books: &HashMap<Venue, BookView>,
        updated_at: &HashMap<Venue, Instant>,
    ) -> Option<ArbOpportunity> {
        let started = self.clock.now();

        if self.active_arbs.load(Ordering::Relaxed) >= self.config.max_concurrent_arbs {
            return None;
        }

        // Cheapest venue to buy on (lowest ask) and richest to sell on
        // (highest bid), restricted to the configured venue set.
        let mut buy: Option<(Venue, Price, Quantity)> = None;
        let mut sell: Option<(Venue, Price, Quantity)> = None;
        for (venue, book) in books {
            if !self.config.venues.contains(venue) {
                continue;
            }
            if let Some((ask, qty)) = book.best_ask() {
                if ask > 0.0 && buy.map_or(true, |(_, best, _)| ask < best) {
                    buy = Some((*venue, ask, qty));
                }
            }
            if let Some((bid, qty)) = book.best_bid() {
                if sell.map_or(true, |(_, best, _)| bid > best) {
                    sell = Some((*venue, bid, qty));
                }
            }
        }
        let (buy_venue, buy_price, buy_liquidity) = buy?;
        let (sell_venue, sell_price, sell_liquidity) = sell?;
        if buy_venue == sell_venue {
            return None;
        }

        let mut opportunity = ArbOpportunity {
            signal_id: next_signal_id(),
            symbol,
            buy_venue,
            sell_venue,
            buy_price,
            sell_price,
            gross_profit_bps: (sell_price - buy_price) / buy_price * 10_000.0,
            fees_bps: buy_venue.taker_fee_bps() + sell_venue.taker_fee_bps(),
            slippage_bps: 0.0,
            net_profit_bps: 0.0,
            expected_profit_usd: 0.0,
            execute_quantity: 0.0,
            buy_liquidity,
            sell_liquidity,
            detection_latency_us: 0,
            orderbook_age_ms: 0,
            is_valid: false,
            reject_reason: None,
        };

        // Walk both books for the target notional to price in slippage.
        let target_quantity = self.config.position_size_usd / buy_price;
        let buy_slippage = estimate_slippage(&books[&buy_venue], target_quantity, Side::Buy);
        let sell_slippage = estimate_slippage(&books[&sell_venue], target_quantity, Side::Sell);
        opportunity.slippage_bps = (buy_slippage + sell_slippage) * 10_000.0;
        if opportunity.slippage_bps > self.config.max_slippage_bps {
            opportunity.reject_reason = Some(RejectReason::Slippage);
            return Some(opportunity);
        }

        opportunity.net_profit_bps =
            opportunity.gross_profit_bps - opportunity.fees_bps - opportunity.slippage_bps;

        // Both legs must be priced off fresh books.
        let now = self.clock.now();
        let mut max_age_ms = 0;
        for venue in [buy_venue, sell_venue] {
            if let Some(at) = updated_at.get(&venue) {
                let age = now.duration_since(*at).as_millis() as u64;
                max_age_ms = max_age_ms.max(age);
            }
        }
        opportunity.orderbook_age_ms = max_age_ms;
        if max_age_ms > self.config.max_orderbook_staleness_ms {
            opportunity.reject_reason = Some(RejectReason::Staleness);
            return Some(opportunity);
        }

        if opportunity.net_profit_bps < self.dynamic_threshold() {
            opportunity.reject_reason = Some(RejectReason::BelowThreshold);
            return Some(opportunity);
        }

        // Size to the thinner top of book, capped at the configured notional.
        let max_quantity = buy_liquidity.min(sell_liquidity);
        let max_notional = max_quantity * buy_price;
        let target_notional = self.config.position_size_usd.min(max_notional);
        opportunity.execute_quantity = target_notional / buy_price;
        opportunity.expected_profit_usd = opportunity.net_profit_bps / 10_000.0 * target_notional;

        opportunity.detection_latency_us =
            self.clock.now().duration_since(started).as_micros() as u64;
        if opportunity.detection_latency_us > self.config.max_detection_latency_us {
            opportunity.reject_reason = Some(RejectReason::DetectionLatency);
            return Some(opportunity);
        }

        opportunity.is_valid = true;
        self.last_opportunity_at = now;
        debug!(
            symbol = %symbol,
            buy = %buy_venue,
            sell = %sell_venue,
            net_bps = opportunity.net_profit_bps,
            "arbitrage opportunity"
        );
        Some(opportunity)
    }

    /// Build the two IOC legs for a validated opportunity.
    #[must_use]
    pub fn create_orders(&self, opportunity: &ArbOpportunity) -> (Order, Order) {
        let mut buy_leg = Order::new(
            arb_client_id(),
            opportunity.symbol,
            opportunity.buy_venue,
            Side::Buy,
            OrderType::LimitIoc,
            opportunity.buy_price,
            opportunity.execute_quantity,
        );
        buy_leg.strategy = STRATEGY_TAG.to_string();
        buy_leg.signal_id = opportunity.signal_id;

        let mut sell_leg = Order::new(
            arb_client_id(),
            opportunity.symbol,
            opportunity.sell_venue,
            Side::Sell,
            OrderType::LimitIoc,
            opportunity.sell_price,
            opportunity.execute_quantity,
        );
        sell_leg.strategy = STRATEGY_TAG.to_string();
        sell_leg.signal_id = opportunity.signal_id;

        (buy_leg, sell_leg)
    }

    /// Count an accepted arbitrage against the concurrency cap.
    pub fn on_arb_executed(&self) {
        self.active_arbs.fetch_add(1, Ordering::Relaxed);
    }

    /// Release a completed (or abandoned) arbitrage.
    pub fn on_arb_completed(&self) {
        let _ = self
            .active_arbs
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |count| {
                count.checked_sub(1)
            });
    }

    #[must_use]
    pub fn active_arbs(&self) -> u32 {
        self.active_arbs.load(Ordering::Relaxed)
    }

    /// Record the outcome of an executed arbitrage.
    pub fn record_arb_result(&mut self, opportunity: &ArbOpportunity, success: bool, profit: f64) {
        self.stats.total_opportunities += 1;
        self.stats.executed_arbs += 1;
        if success {
            self.stats.successful_arbs += 1;
            self.stats.total_profit += profit;
            let n = self.stats.successful_arbs as f64;
            self.stats.avg_profit_bps =
                (self.stats.avg_profit_bps * (n - 1.0) + opportunity.net_profit_bps) / n;
        } else {
            self.stats.failed_arbs += 1;
        }
        self.stats.win_rate = self.stats.successful_arbs as f64 / self.stats.executed_arbs as f64;
    }

    #[must_use]
    pub fn stats(&self) -> ArbStats {
        self.stats
    }

    /// The profit bar drops after a quiet minute so the strategy re-engages.
    fn dynamic_threshold(&self) -> f64 {
        if self.clock.now().duration_since(self.last_opportunity_at) > QUIET_PERIOD {
            self.config.base_min_profit_bps * self.config.min_profit_decay_rate
        } else {
            self.config.base_min_profit_bps
        }
    }
}

/// VWAP slippage (as a fraction) of filling `quantity` against one book side.
fn estimate_slippage(book: &BookView, quantity: Quantity, side: Side) -> f64 {
    if quantity <= 0.0 {
        return 0.0;
    }
    let mut total_value = 0.0;
    let mut remaining = quantity;

    let mut walk = |price: Price, level_qty: Quantity| {
        if remaining <= 0.0 {
            return false;
        }
        let filled = remaining.min(level_qty);
        total_value += filled * price;
        remaining -= filled;
        true
    };
    match side {
        Side::Buy => {
            for (price, qty) in book.asks() {
                if !walk(price, qty) {
                    break;
                }
            }
        }
        Side::Sell => {
            for (price, qty) in book.bids() {
                if !walk(price, qty) {
                    break;
                }
            }
        }
    }

    if total_value == 0.0 {
        return 0.0;
    }
    let vwap = total_value / quantity;
    let best = match side {
        Side::Buy => book.best_ask().map(|(p, _)| p),
        Side::Sell => book.best_bid().map(|(p, _)| p),
    };
    match best {
        Some(best) if best > 0.0 => (vwap - best).abs() / best,
        _ => 0.0,
    }
}

fn arb_client_id() -> String {
    format!("ARB-{}", Uuid::new_v4().simple())
}
