//! Per-tick coordination of the strategy fleet.
//!
//! For each market-data tick the coordinator fans out to every enabled
//! strategy, converts signals into sized candidate orders, gates each
//! candidate through the risk engine, and emits the approved list. Fills fan
//! back in to risk and to the fill-observing strategies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use quantra_config::EngineConfig;
use quantra_core::{
    fill_pool, order_pool, BookView, Fill, ObjectPool, Order, OrderAck, OrderReject, OrderStatus,
    OrderType, Price, SharedClock, SymbolId, Venue,
};
use quantra_execution::OrderTracker;
use quantra_risk::{CircuitBreaker, ErrorRateTracker, RiskEngine, RiskError, RiskStats};
use quantra_strategy::{
    AdverseSelectionFilter, AdverseStats, ArbStats, LatencyArbStrategy, ObiStats, ObiStrategy,
    PairsStats, PairsStrategy, StrategyError, ToxicityTier, VolRegimeStrategy, VolStats,
};

/// Strategy tag reserved for market-making candidates; stripped under HIGH
/// toxicity.
pub const MM_TAG: &str = "MM";

const OBI_TAG: &str = "OBI";
const VOL_TAG: &str = "VOL_REGIME";

/// Result alias for engine assembly.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures raised while assembling the coordinator.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    #[error(transparent)]
    Risk(#[from] RiskError),
}

/// Consolidated per-strategy and portfolio statistics.
#[derive(Clone, Debug, Default)]
pub struct PerformanceReport {
    pub obi: Option<ObiStats>,
    pub latency_arb: Option<ArbStats>,
    pub pairs: PairsStats,
    pub vol_regime: VolStats,
    pub adverse: Option<AdverseStats>,
    pub risk: RiskStats,
    pub strategy_pnl: f64,
    pub combined_win_rate: f64,
}

/// Sequences signal generation, risk gating, and fill distribution.
pub struct Coordinator {
    config: EngineConfig,
    risk: Arc<RiskEngine>,
    tracker: Arc<OrderTracker>,
    obi: Option<ObiStrategy>,
    latency_arb: Option<LatencyArbStrategy>,
    pairs: Vec<PairsStrategy>,
    vol_regime: HashMap<SymbolId, VolRegimeStrategy>,
    adverse: Option<AdverseSelectionFilter>,
    breaker: Option<Arc<CircuitBreaker>>,
    error_tracker: Option<Arc<ErrorRateTracker>>,
    scratch: ObjectPool<Order>,
}

impl Coordinator {
    /// Assemble the enabled strategies around shared risk and tracking state.
    pub fn new(
        config: EngineConfig,
        risk: Arc<RiskEngine>,
        tracker: Arc<OrderTracker>,
        clock: SharedClock,
    ) -> EngineResult<Self> {
        let strategies = &config.strategies;

        let obi = if strategies.enable_obi {
            info!("OBI strategy enabled");
            Some(ObiStrategy::new(strategies.obi.clone(), Arc::clone(&clock))?)
        } else {
            None
        };

        let latency_arb = if strategies.enable_latency_arb {
            info!(venues = ?strategies.latency_arb.venues, "latency arbitrage enabled");
            Some(LatencyArbStrategy::new(
                strategies.latency_arb.clone(),
                Arc::clone(&clock),
            )?)
        } else {
            None
        };

        let mut pairs = Vec::new();
        if strategies.enable_pairs {
            for pair_config in &strategies.pairs {
                info!(
                    symbol1 = %pair_config.symbol1,
                    symbol2 = %pair_config.symbol2,
                    "pairs trading enabled"
                );
                pairs.push(PairsStrategy::new(pair_config.clone(), Arc::clone(&clock))?);
            }
        }

        let mut vol_regime = HashMap::new();
        if strategies.enable_vol_regime {
            for name in &strategies.vol_symbols {
                let symbol = SymbolId::register(name);
                info!(symbol = %symbol, "volatility-regime strategy enabled");
                vol_regime.insert(
                    symbol,
                    VolRegimeStrategy::new(
                        symbol,
                        strategies.vol_regime.clone(),
                        Arc::clone(&clock),
                    )?,
                );
            }
        }

        let adverse = if strategies.enable_adverse_filter {
            info!("adverse-selection filter enabled");
            Some(AdverseSelectionFilter::new(
                strategies.adverse.clone(),
                Arc::clone(&clock),
            )?)
        } else {
            None
        };

        Ok(Self {
            config,
            risk,
            tracker,
            obi,
            latency_arb,
            pairs,
            vol_regime,
            adverse,
            breaker: None,
            error_tracker: None,
            scratch: order_pool().clone(),
        })
    }

    /// Attach the operational circuit breaker and error-rate tracker fed by
    /// [`Coordinator::on_gateway_error`]. Share the same breaker with the
    /// risk engine so tripping it short-circuits `check_order`.
    #[must_use]
    pub fn with_reliability(
        mut self,
        breaker: Arc<CircuitBreaker>,
        error_tracker: Arc<ErrorRateTracker>,
    ) -> Self {
        self.breaker = Some(breaker);
        self.error_tracker = Some(error_tracker);
        self
    }

    /// Process one market-data tick for `(symbol, venue)`.
    ///
    /// `book` is the updated venue's view, `all_books`/`books_updated_at`
    /// cover every venue trading `symbol`, and `prices` is the latest
    /// per-symbol mid map used for marks and pair ratios.
    pub fn on_market_tick(
        &mut self,
        symbol: SymbolId,
        book: &BookView,
        all_books: &HashMap<Venue, BookView>,
        books_updated_at: &HashMap<Venue, Instant>,
        prices: &HashMap<SymbolId, Price>,
    ) -> Vec<Order> {
        let mut approved: Vec<Order> = Vec::new();
        let Some(mid) = book.mid() else {
            return approved;
        };

        self.risk.update_marks(prices);

        // 1. Order-book imbalance.
        if let Some(obi) = &self.obi {
            if let Some(signal) = obi.analyze(symbol, book) {
                if !obi.is_expired(&signal) {
                    let quantity = self.config.sizing.obi_notional_usd / mid;
                    let mut draft = self.scratch.acquire();
                    init_candidate(
                        &mut draft,
                        OBI_TAG,
                        signal.id,
                        symbol,
                        Venue::Unknown,
                        signal.side,
                        OrderType::Limit,
                        signal.entry_price,
                        quantity,
                    );
                    if self.gate(&draft, mid, &mut approved) {
                        info!(
                            symbol = %symbol,
                            side = %signal.side,
                            confidence = signal.confidence,
                            "OBI candidate approved"
                        );
                    }
                }
            }
        }

        // 2. Cross-venue latency arbitrage. Both legs must clear risk.
        let arb_candidate = match self.latency_arb.as_mut() {
            Some(arb) if all_books.len() > 1 => arb
                .detect(symbol, all_books, books_updated_at)
                .filter(|opportunity| opportunity.is_valid)
                .map(|opportunity| {
                    let legs = arb.create_orders(&opportunity);
                    (opportunity, legs)
                }),
            _ => None,
        };
        if let Some((opportunity, (buy_leg, sell_leg))) = arb_candidate {
            let buy_verdict = self.risk.check_order(&buy_leg, opportunity.buy_price);
            let sell_verdict = self.risk.check_order(&sell_leg, opportunity.sell_price);
            if buy_verdict.passed && sell_verdict.passed {
                if let Some(arb) = &self.latency_arb {
                    arb.on_arb_executed();
                }
                info!(
                    symbol = %symbol,
                    buy_venue = %opportunity.buy_venue,
                    sell_venue = %opportunity.sell_venue,
                    net_bps = opportunity.net_profit_bps,
                    "arbitrage approved"
                );
                self.accept(buy_leg, &mut approved);
                self.accept(sell_leg, &mut approved);
            } else {
                warn!(
                    symbol = %symbol,
                    buy = ?buy_verdict.reason,
                    sell = ?sell_verdict.reason,
                    "arbitrage dropped: leg failed risk"
                );
            }
        }

        // 3. Pairs trading. Dollar-neutral legs are all-or-nothing too.
        let mut pair_candidates = Vec::new();
        for pair in &mut self.pairs {
            let (symbol1, symbol2) = pair.symbols();
            let (Some(&price1), Some(&price2)) = (prices.get(&symbol1), prices.get(&symbol2))
            else {
                continue;
            };
            pair.update_prices(price1, price2);
            if let Some(signal) = pair.generate_signal(price1, price2) {
                if !pair.correlation_ok() {
                    continue;
                }
                let legs = pair.create_orders(&signal);
                pair_candidates.push((signal, legs));
            }
        }
        for (signal, (leg1, leg2)) in pair_candidates {
            let verdict1 = self.risk.check_order(&leg1, signal.entry_price1);
            let verdict2 = self.risk.check_order(&leg2, signal.entry_price2);
            if verdict1.passed && verdict2.passed {
                info!(
                    symbol1 = %signal.symbol1,
                    symbol2 = %signal.symbol2,
                    z = signal.z_score,
                    "pairs entry approved"
                );
                self.accept(leg1, &mut approved);
                self.accept(leg2, &mut approved);
            }
        }

        // 4. Volatility regime.
        let vol_signal = self.vol_regime.get_mut(&symbol).and_then(|vol| {
            vol.update_price(mid);
            vol.generate_signal(mid)
        });
        if let Some(signal) = vol_signal {
            let quantity = self.config.sizing.vol_regime_notional_usd / mid;
            let mut draft = self.scratch.acquire();
            init_candidate(
                &mut draft,
                VOL_TAG,
                signal.id,
                symbol,
                Venue::Unknown,
                signal.side,
                OrderType::Limit,
                signal.entry_price,
                quantity,
            );
            if self.gate(&draft, mid, &mut approved) {
                info!(symbol = %symbol, regime = ?signal.regime, "vol-regime candidate approved");
            }
        }

        // 5. Toxic flow strips market-making candidates post-hoc.
        if let Some(adverse) = &self.adverse {
            adverse.update_current_price(mid);
            let toxicity = adverse.toxicity();
            if toxicity.tier == ToxicityTier::High {
                warn!(
                    symbol = %symbol,
                    score = toxicity.score,
                    "high toxicity: filtering market-making candidates"
                );
                approved.retain(|order| order.strategy != MM_TAG);
            }
        }

        approved
    }

    /// Route a fill to risk, order state, and fill-observing strategies.
    pub fn on_fill(&self, fill: &Fill) {
        let mut working = fill_pool().acquire();
        working.clone_from(fill);
        // Execution reports may arrive with only an exchange order id.
        if !working.symbol.is_valid() {
            if let Some(symbol) = self.tracker.symbol_of(&working.exchange_order_id) {
                working.symbol = symbol;
            }
        }

        self.risk.on_fill(&working);

        let tracked = self
            .tracker
            .get_by_exchange(&working.exchange_order_id)
            .or_else(|| self.tracker.get_by_client(&working.client_order_id));
        if let Some(mut order) = tracked {
            order.register_fill(working.quantity, working.received_at.unwrap_or_else(Utc::now));
            let client_id = order.client_order_id.clone();
            self.tracker.update(&client_id, order);
        }

        if let Some(adverse) = &self.adverse {
            adverse.record_fill(working.side, working.price, working.quantity);
        }
    }

    /// Apply a venue acknowledgement to the tracked order.
    pub fn on_ack(&self, ack: &OrderAck) {
        if let Some(mut order) = self.tracker.get_by_client(&ack.client_order_id) {
            order.exchange_order_id = Some(ack.exchange_order_id.clone());
            order.transition(OrderStatus::New, ack.timestamp);
            self.tracker.update(&ack.client_order_id, order);
        }
    }

    /// Apply a venue rejection to the tracked order.
    pub fn on_reject(&self, reject: &OrderReject) {
        if let Some(mut order) = self.tracker.get_by_client(&reject.client_order_id) {
            order.reject_reason = Some(reject.error_message.clone());
            order.transition(OrderStatus::Rejected, reject.timestamp);
            self.tracker.update(&reject.client_order_id, order);
        }
    }

    /// The adverse-selection filter, for market-making quote construction.
    #[must_use]
    pub fn adverse_filter(&self) -> Option<&AdverseSelectionFilter> {
        self.adverse.as_ref()
    }

    #[must_use]
    pub fn risk(&self) -> &RiskEngine {
        &self.risk
    }

    #[must_use]
    pub fn tracker(&self) -> &OrderTracker {
        &self.tracker
    }

    /// Release one completed arbitrage slot.
    pub fn on_arb_completed(&self) {
        if let Some(arb) = &self.latency_arb {
            arb.on_arb_completed();
        }
    }

    /// Record an execution-gateway failure reported from outside.
    ///
    /// The failure feeds both the breaker's consecutive count and the
    /// windowed error rate; breaching the rate threshold forces the breaker
    /// OPEN regardless of the consecutive count.
    pub fn on_gateway_error(&self, reason: &str) {
        if let Some(errors) = &self.error_tracker {
            errors.record_error();
            if errors.threshold_exceeded() {
                if let Some(breaker) = &self.breaker {
                    breaker.open("error rate threshold exceeded");
                }
            }
        }
        if let Some(breaker) = &self.breaker {
            breaker.record_failure(reason);
        }
    }

    /// Record a successful gateway round trip.
    pub fn on_gateway_success(&self) {
        if let Some(breaker) = &self.breaker {
            breaker.record_success();
        }
    }

    /// Consolidated statistics across strategies and the risk ledger.
    #[must_use]
    pub fn performance_report(&self) -> PerformanceReport {
        let mut report = PerformanceReport {
            obi: self.obi.as_ref().map(ObiStrategy::stats),
            latency_arb: self.latency_arb.as_ref().map(LatencyArbStrategy::stats),
            adverse: self.adverse.as_ref().map(AdverseSelectionFilter::stats),
            risk: self.risk.stats(),
            ..PerformanceReport::default()
        };

        for pair in &self.pairs {
            let stats = pair.stats();
            report.pairs.total_trades += stats.total_trades;
            report.pairs.winning_trades += stats.winning_trades;
            report.pairs.losing_trades += stats.losing_trades;
            report.pairs.total_pnl += stats.total_pnl;
        }
        for vol in self.vol_regime.values() {
            let stats = vol.stats();
            report.vol_regime.total_trades += stats.total_trades;
            report.vol_regime.high_vol_trades += stats.high_vol_trades;
            report.vol_regime.low_vol_trades += stats.low_vol_trades;
            report.vol_regime.winning_trades += stats.winning_trades;
            report.vol_regime.total_pnl += stats.total_pnl;
        }

        let wins = report.obi.map_or(0, |s| s.winning_trades)
            + report.latency_arb.map_or(0, |s| s.successful_arbs)
            + report.pairs.winning_trades
            + report.vol_regime.winning_trades;
        let trades = report.obi.map_or(0, |s| s.total_signals)
            + report.latency_arb.map_or(0, |s| s.executed_arbs)
            + report.pairs.total_trades
            + report.vol_regime.total_trades;
        if trades > 0 {
            report.combined_win_rate = wins as f64 / trades as f64;
        }
        report.strategy_pnl = report.obi.map_or(0.0, |s| s.total_pnl)
            + report.latency_arb.map_or(0.0, |s| s.total_profit)
            + report.pairs.total_pnl
            + report.vol_regime.total_pnl;
        report
    }

    /// Log the consolidated report at INFO.
    pub fn log_report(&self) {
        let report = self.performance_report();
        if let Some(obi) = &report.obi {
            info!(
                signals = obi.total_signals,
                win_rate = obi.win_rate,
                pnl = obi.total_pnl,
                "OBI performance"
            );
        }
        if let Some(arb) = &report.latency_arb {
            info!(
                executed = arb.executed_arbs,
                win_rate = arb.win_rate,
                profit = arb.total_profit,
                avg_bps = arb.avg_profit_bps,
                "latency-arb performance"
            );
        }
        info!(
            trades = report.pairs.total_trades,
            pnl = report.pairs.total_pnl,
            "pairs performance"
        );
        info!(
            trades = report.vol_regime.total_trades,
            pnl = report.vol_regime.total_pnl,
            "vol-regime performance"
        );
        info!(
            total_pnl = report.strategy_pnl,
            combined_win_rate = report.combined_win_rate,
            portfolio_pnl = report.risk.total_pnl,
            "combined performance"
        );
    }

    /// Risk-gate a single candidate; approved orders are tracked and emitted.
    fn gate(&self, draft: &Order, reference_price: Price, approved: &mut Vec<Order>) -> bool {
        let verdict = self.risk.check_order(draft, reference_price);
        if verdict.passed {
            self.accept(Order::clone(draft), approved);
            true
        } else {
            if let Some(reason) = verdict.reason {
                info!(
                    strategy = %draft.strategy,
                    symbol = %draft.symbol,
                    reason = %reason,
                    "candidate rejected"
                );
            }
            false
        }
    }

    fn accept(&self, order: Order, approved: &mut Vec<Order>) {
        self.tracker.track(order.clone());
        approved.push(order);
    }
}

/// Reset a pooled scratch order and fill in a fresh candidate.
#[allow(clippy::too_many_arguments)]
fn init_candidate(
    draft: &mut Order,
    strategy: &str,
    signal_id: u64,
    symbol: SymbolId,
    venue: Venue,
    side: quantra_core::Side,
    order_type: OrderType,
    price: Price,
    quantity: f64,
) {
    draft.client_order_id = format!("{strategy}-{}", Uuid::new_v4().simple());
    draft.exchange_order_id = None;
    draft.symbol = symbol;
    draft.venue = venue;
    draft.side = side;
    draft.order_type = order_type;
    draft.price = price;
    draft.quantity = quantity;
    draft.filled_quantity = 0.0;
    draft.remaining_quantity = quantity;
    draft.status = OrderStatus::Pending;
    draft.reject_reason = None;
    draft.strategy = strategy.to_string();
    draft.signal_id = signal_id;
    draft.risk_notional = price * quantity;
    draft.created_at = Some(Utc::now());
    draft.sent_at = None;
    draft.acked_at = None;
    draft.completed_at = None;
}
