//! Pre-trade risk gating and live position accounting.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use quantra_core::{
    AtomicF64, BoundedRing, Fill, Order, Price, RejectReason, Side, SymbolId, QTY_EPSILON,
};

pub mod breaker;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState, ErrorRateTracker, KillSwitch};

/// Result alias for risk operations.
pub type RiskResult<T> = Result<T, RiskError>;

/// Failures surfaced by the risk engine outside the hot path.
#[derive(Debug, Error)]
pub enum RiskError {
    /// Raised when configured limits are not internally consistent.
    #[error("invalid risk limits: {0}")]
    InvalidLimits(String),
}

/// Hard limits enforced before any order leaves the engine.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RiskLimits {
    /// Max notional held in a single symbol.
    pub max_position_notional: f64,
    /// Max sum of absolute position notionals.
    pub max_gross_exposure: f64,
    /// Max net (long minus short) exposure.
    pub max_net_exposure: f64,
    /// Daily loss cap; breaching it blocks all new orders.
    pub max_daily_loss: f64,
    /// Optional daily take-profit level, carried for reporting.
    pub max_daily_profit: f64,
    /// Trailing stop as a fraction of the daily loss cap.
    pub trailing_stop_fraction: f64,
    /// Max single-order notional.
    pub max_order_notional: f64,
    /// Order rate cap; enforced by the execution gateway.
    pub max_orders_per_second: u32,
    /// Max fraction of gross exposure concentrated in one symbol.
    pub max_symbol_concentration: f64,
    /// Max position hold time before the desk expects a flatten.
    pub max_position_hold_secs: u64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_notional: 50_000.0,
            max_gross_exposure: 150_000.0,
            max_net_exposure: 100_000.0,
            max_daily_loss: 5_000.0,
            max_daily_profit: 20_000.0,
            trailing_stop_fraction: 0.5,
            max_order_notional: 10_000.0,
            max_orders_per_second: 50,
            max_symbol_concentration: 0.4,
            max_position_hold_secs: 300,
        }
    }
}

impl RiskLimits {
    /// Reject configurations that would disable or invert a check.
    pub fn validate(&self) -> RiskResult<()> {
        if self.max_daily_loss <= 0.0 {
            return Err(RiskError::InvalidLimits(
                "max_daily_loss must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.trailing_stop_fraction) {
            return Err(RiskError::InvalidLimits(
                "trailing_stop_fraction must lie in [0, 1]".into(),
            ));
        }
        if self.max_order_notional <= 0.0
            || self.max_position_notional <= 0.0
            || self.max_gross_exposure <= 0.0
        {
            return Err(RiskError::InvalidLimits(
                "notional caps must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.max_symbol_concentration) {
            return Err(RiskError::InvalidLimits(
                "max_symbol_concentration must lie in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Live position for one symbol. Quantity is signed: positive long.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Position {
    pub symbol: SymbolId,
    pub quantity: f64,
    /// Volume-weighted entry price.
    pub avg_price: Price,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub fees_paid: f64,
    /// Absolute notional at the last mark.
    pub notional: f64,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    fn new(symbol: SymbolId, at: DateTime<Utc>) -> Self {
        Self {
            symbol,
            quantity: 0.0,
            avg_price: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            fees_paid: 0.0,
            notional: 0.0,
            opened_at: at,
            updated_at: at,
        }
    }

    #[must_use]
    pub fn is_flat(&self) -> bool {
        self.quantity.abs() < QTY_EPSILON
    }

    #[must_use]
    pub fn is_long(&self) -> bool {
        self.quantity > QTY_EPSILON
    }

    #[must_use]
    pub fn is_short(&self) -> bool {
        self.quantity < -QTY_EPSILON
    }

    /// Unrealized P&L this position would carry at `price`.
    #[must_use]
    pub fn unrealized_at(&self, price: Price) -> f64 {
        if self.is_flat() {
            return 0.0;
        }
        self.quantity * (price - self.avg_price)
    }

    /// Refresh unrealized P&L and notional against `price`.
    pub fn mark(&mut self, price: Price) {
        self.unrealized_pnl = self.unrealized_at(price);
        self.notional = (self.quantity * price).abs();
    }
}

/// Outcome of a pre-trade check: a value, never an error.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RiskVerdict {
    pub passed: bool,
    pub reason: Option<RejectReason>,
}

impl RiskVerdict {
    #[must_use]
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    #[must_use]
    pub fn reject(reason: RejectReason) -> Self {
        Self {
            passed: false,
            reason: Some(reason),
        }
    }
}

/// Point-in-time summary of the engine's risk state.
#[derive(Clone, Copy, Debug, Default)]
pub struct RiskStats {
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub total_pnl: f64,
    pub gross_exposure: f64,
    pub net_exposure: f64,
    pub peak_pnl_today: f64,
    pub drawdown_from_peak: f64,
    pub open_positions: usize,
    pub recent_fills: usize,
}

const RECENT_FILLS_CAPACITY: usize = 1000;

/// Pre-trade gate and position ledger shared by every strategy.
///
/// Positions live under a reader-writer lock; the daily realized and peak
/// P&L aggregates are atomic doubles so `check_order` stays on the read side.
pub struct RiskEngine {
    limits: RiskLimits,
    positions: RwLock<HashMap<SymbolId, Position>>,
    daily_realized: AtomicF64,
    peak_daily: AtomicF64,
    recent_fills: Mutex<BoundedRing<Fill>>,
    kill_switch: Option<Arc<KillSwitch>>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl RiskEngine {
    pub fn new(limits: RiskLimits) -> RiskResult<Self> {
        limits.validate()?;
        Ok(Self {
            limits,
            positions: RwLock::new(HashMap::new()),
            daily_realized: AtomicF64::new(0.0),
            peak_daily: AtomicF64::new(0.0),
            recent_fills: Mutex::new(BoundedRing::new(RECENT_FILLS_CAPACITY)),
            kill_switch: None,
            breaker: None,
        })
    }

    /// Attach the emergency latch; once activated every check is rejected.
    #[must_use]
    pub fn with_kill_switch(mut self, kill_switch: Arc<KillSwitch>) -> Self {
        self.kill_switch = Some(kill_switch);
        self
    }

    /// Attach an operational circuit breaker that short-circuits checks
    /// while OPEN.
    #[must_use]
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    #[must_use]
    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Ordered pre-trade checks; the first failure short-circuits.
    pub fn check_order(&self, order: &Order, reference_price: Price) -> RiskVerdict {
        if let Some(kill_switch) = &self.kill_switch {
            if kill_switch.is_activated() {
                return RiskVerdict::reject(RejectReason::KillSwitch);
            }
        }
        if let Some(breaker) = &self.breaker {
            if !breaker.allow_request() {
                return RiskVerdict::reject(RejectReason::CircuitOpen);
            }
        }

        let positions = self.positions.read();

        // 1. Daily loss cap.
        let unrealized: f64 = positions.values().map(|p| p.unrealized_pnl).sum();
        let current_pnl = self.daily_realized.load(Ordering::Relaxed) + unrealized;
        if current_pnl < -self.limits.max_daily_loss {
            return RiskVerdict::reject(RejectReason::DailyLoss);
        }

        // 2. Trailing stop from the intraday peak.
        let drawdown = self.peak_daily.load(Ordering::Relaxed) - current_pnl;
        if drawdown > self.limits.max_daily_loss * self.limits.trailing_stop_fraction {
            return RiskVerdict::reject(RejectReason::TrailingStop);
        }

        // 3. Single-order notional.
        let order_notional = order.quantity * order.price;
        if order_notional > self.limits.max_order_notional {
            return RiskVerdict::reject(RejectReason::OrderSize);
        }

        // 4. Per-symbol position cap on the hypothetical post-fill quantity.
        let position = positions.get(&order.symbol);
        let current_qty = position.map_or(0.0, |p| p.quantity);
        let new_qty = current_qty + order.side.signum() * order.quantity;
        let new_notional = (new_qty * reference_price).abs();
        if new_notional > self.limits.max_position_notional {
            return RiskVerdict::reject(RejectReason::SymbolLimit);
        }

        // 5. Gross exposure. Orders that reduce an existing position only
        //    contribute the notional they add beyond the current one.
        let total_gross: f64 = positions.values().map(|p| p.notional).sum();
        let mut order_impact = order_notional;
        if let Some(position) = position {
            let reduces = (position.is_long() && order.side == Side::Sell)
                || (position.is_short() && order.side == Side::Buy);
            if reduces {
                let current_notional = (position.quantity * reference_price).abs();
                order_impact = (new_notional - current_notional).max(0.0);
            }
        }
        if total_gross + order_impact > self.limits.max_gross_exposure {
            return RiskVerdict::reject(RejectReason::GrossExposure);
        }

        // 6. Concentration.
        let portfolio_value = total_gross + order_impact;
        if portfolio_value > 0.0
            && new_notional / portfolio_value > self.limits.max_symbol_concentration
        {
            return RiskVerdict::reject(RejectReason::Concentration);
        }

        RiskVerdict::pass()
    }

    /// Apply a fill to the position ledger.
    ///
    /// Malformed fills (non-positive price or quantity) are dropped with a
    /// diagnostic; the ledger is not touched.
    pub fn on_fill(&self, fill: &Fill) {
        if fill.price <= 0.0 || fill.quantity <= 0.0 {
            warn!(
                symbol = %fill.symbol,
                price = fill.price,
                quantity = fill.quantity,
                "discarding malformed fill"
            );
            return;
        }

        let at = fill.received_at.unwrap_or_else(Utc::now);
        let signed = fill.side.signum() * fill.quantity;

        let mut positions = self.positions.write();
        let position = positions
            .entry(fill.symbol)
            .or_insert_with(|| Position::new(fill.symbol, at));

        if position.is_flat() {
            position.quantity = signed;
            position.avg_price = fill.price;
            position.opened_at = at;
            position.fees_paid += fill.fee;
        } else if position.quantity.signum() == signed.signum() {
            // Adding to the position: re-average the entry.
            let total_cost = position.quantity * position.avg_price + signed * fill.price;
            position.quantity += signed;
            position.avg_price = total_cost / position.quantity;
            position.fees_paid += fill.fee;
        } else {
            // Reducing, closing, or flipping.
            let closed = signed.abs().min(position.quantity.abs());
            let direction = if position.is_long() { 1.0 } else { -1.0 };
            let realized = closed * (fill.price - position.avg_price) * direction - fill.fee;
            position.realized_pnl += realized;
            self.daily_realized.fetch_add(realized, Ordering::Relaxed);

            let previous_abs = position.quantity.abs();
            position.quantity += signed;
            position.fees_paid += fill.fee;
            if signed.abs() > previous_abs {
                // The sign flipped: the residual opens fresh at the fill price.
                position.avg_price = fill.price;
                position.unrealized_pnl = 0.0;
                position.opened_at = at;
            }
        }
        position.updated_at = Utc::now();

        self.update_peak(&positions);
        drop(positions);

        self.recent_fills.lock().push(fill.clone());
    }

    /// Refresh unrealized P&L and notionals from the latest mid prices.
    ///
    /// Symbols without a price are skipped.
    pub fn update_marks(&self, prices: &HashMap<SymbolId, Price>) {
        let mut positions = self.positions.write();
        for position in positions.values_mut() {
            if let Some(price) = prices.get(&position.symbol) {
                position.mark(*price);
            }
        }
        self.update_peak(&positions);
    }

    /// Zero the daily aggregates at session start.
    pub fn reset_daily(&self) {
        let mut positions = self.positions.write();
        self.daily_realized.store(0.0, Ordering::Relaxed);
        self.peak_daily.store(0.0, Ordering::Relaxed);
        for position in positions.values_mut() {
            position.realized_pnl = 0.0;
            position.unrealized_pnl = 0.0;
        }
        self.recent_fills.lock().clear();
    }

    #[must_use]
    pub fn position(&self, symbol: SymbolId) -> Option<Position> {
        self.positions.read().get(&symbol).cloned()
    }

    /// All non-flat positions.
    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        self.positions
            .read()
            .values()
            .filter(|p| !p.is_flat())
            .cloned()
            .collect()
    }

    /// Realized plus unrealized P&L for the session.
    #[must_use]
    pub fn total_pnl(&self) -> f64 {
        let unrealized: f64 = self.positions.read().values().map(|p| p.unrealized_pnl).sum();
        self.daily_realized.load(Ordering::Relaxed) + unrealized
    }

    #[must_use]
    pub fn daily_realized(&self) -> f64 {
        self.daily_realized.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_daily_pnl(&self) -> f64 {
        self.peak_daily.load(Ordering::Relaxed)
    }

    /// Sum of absolute position notionals at the last marks.
    #[must_use]
    pub fn gross_exposure(&self) -> f64 {
        self.positions.read().values().map(|p| p.notional).sum()
    }

    /// Signed exposure at entry prices.
    #[must_use]
    pub fn net_exposure(&self) -> f64 {
        self.positions
            .read()
            .values()
            .map(|p| p.quantity * p.avg_price)
            .sum()
    }

    #[must_use]
    pub fn stats(&self) -> RiskStats {
        let positions = self.positions.read();
        let realized = self.daily_realized.load(Ordering::Relaxed);
        let unrealized: f64 = positions.values().map(|p| p.unrealized_pnl).sum();
        let total = realized + unrealized;
        let peak = self.peak_daily.load(Ordering::Relaxed);
        RiskStats {
            realized_pnl: realized,
            unrealized_pnl: unrealized,
            total_pnl: total,
            gross_exposure: positions.values().map(|p| p.notional).sum(),
            net_exposure: positions.values().map(|p| p.quantity * p.avg_price).sum(),
            peak_pnl_today: peak,
            drawdown_from_peak: peak - total,
            open_positions: positions.values().filter(|p| !p.is_flat()).count(),
            recent_fills: self.recent_fills.lock().len(),
        }
    }

    /// Raise the intraday peak if total P&L made a new high.
    fn update_peak(&self, positions: &HashMap<SymbolId, Position>) {
        let unrealized: f64 = positions.values().map(|p| p.unrealized_pnl).sum();
        let total = self.daily_realized.load(Ordering::Relaxed) + unrealized;
        self.peak_daily.fetch_max(total, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantra_core::{OrderType, Venue};

    fn fill(symbol: SymbolId, side: Side, price: f64, quantity: f64, fee: f64) -> Fill {
        Fill {
            fill_id: format!("f-{price}-{quantity}"),
            symbol,
            side,
            price,
            quantity,
            fee,
            fee_currency: "USDT".into(),
            venue: Venue::Binance,
            received_at: Some(Utc::now()),
            ..Fill::default()
        }
    }

    fn order(symbol: SymbolId, side: Side, price: f64, quantity: f64) -> Order {
        Order::new(
            "test-order",
            symbol,
            Venue::Binance,
            side,
            OrderType::Limit,
            price,
            quantity,
        )
    }

    fn engine() -> RiskEngine {
        RiskEngine::new(RiskLimits::default()).expect("default limits are valid")
    }

    #[test]
    fn opening_fill_sets_entry() {
        let symbol = SymbolId::register("RISK-OPEN");
        let engine = engine();
        engine.on_fill(&fill(symbol, Side::Buy, 50_000.0, 0.1, 1.0));

        let position = engine.position(symbol).unwrap();
        assert_eq!(position.quantity, 0.1);
        assert_eq!(position.avg_price, 50_000.0);
        assert_eq!(position.fees_paid, 1.0);
        assert_eq!(position.realized_pnl, 0.0);
    }

    #[test]
    fn adding_fill_reaverages_entry() {
        let symbol = SymbolId::register("RISK-ADD");
        let engine = engine();
        engine.on_fill(&fill(symbol, Side::Buy, 100.0, 1.0, 0.0));
        engine.on_fill(&fill(symbol, Side::Buy, 110.0, 1.0, 0.0));

        let position = engine.position(symbol).unwrap();
        assert_eq!(position.quantity, 2.0);
        assert!((position.avg_price - 105.0).abs() < 1e-9);
    }

    #[test]
    fn sign_flip_closes_then_reopens_at_fill_price() {
        let symbol = SymbolId::register("RISK-FLIP");
        let engine = engine();
        engine.on_fill(&fill(symbol, Side::Buy, 50_000.0, 1.0, 0.0));
        engine.on_fill(&fill(symbol, Side::Sell, 60_000.0, 1.5, 10.0));

        let position = engine.position(symbol).unwrap();
        assert!((engine.daily_realized() - 9_990.0).abs() < 1e-9);
        assert!((position.quantity + 0.5).abs() < 1e-9);
        assert_eq!(position.avg_price, 60_000.0);
    }

    #[test]
    fn signed_fill_sum_matches_position_quantity() {
        let symbol = SymbolId::register("RISK-SUM");
        let engine = engine();
        let fills = [
            (Side::Buy, 100.0, 2.0),
            (Side::Sell, 101.0, 0.5),
            (Side::Buy, 99.0, 1.0),
            (Side::Sell, 100.5, 2.2),
        ];
        let mut expected = 0.0;
        for (side, price, qty) in fills {
            engine.on_fill(&fill(symbol, side, price, qty, 0.0));
            expected += side.signum() * qty;
        }
        let position = engine.position(symbol).unwrap();
        assert!((position.quantity - expected).abs() < QTY_EPSILON);
    }

    #[test]
    fn daily_loss_breach_rejects_everything() {
        let symbol = SymbolId::register("RISK-LOSS");
        let engine = engine();
        engine.daily_realized.store(-5_001.0, Ordering::Relaxed);

        let verdict = engine.check_order(&order(symbol, Side::Buy, 100.0, 1.0), 100.0);
        assert!(!verdict.passed);
        assert_eq!(verdict.reason, Some(RejectReason::DailyLoss));
        assert_eq!(
            verdict.reason.unwrap().as_str(),
            "Daily loss limit exceeded"
        );
    }

    #[test]
    fn trailing_stop_trips_after_peak_drawdown() {
        let symbol = SymbolId::register("RISK-TRAIL");
        let engine = engine();
        // Peak at +4000, now back to +1000: drawdown 3000 > 5000 * 0.5.
        engine.peak_daily.store(4_000.0, Ordering::Relaxed);
        engine.daily_realized.store(1_000.0, Ordering::Relaxed);

        let verdict = engine.check_order(&order(symbol, Side::Buy, 100.0, 1.0), 100.0);
        assert_eq!(verdict.reason, Some(RejectReason::TrailingStop));
    }

    #[test]
    fn order_size_cap_applies_to_notional() {
        let symbol = SymbolId::register("RISK-SIZE");
        let engine = engine();
        let verdict = engine.check_order(&order(symbol, Side::Buy, 50_000.0, 1.0), 50_000.0);
        assert_eq!(verdict.reason, Some(RejectReason::OrderSize));
    }

    #[test]
    fn symbol_limit_uses_hypothetical_quantity() {
        let symbol = SymbolId::register("RISK-SYMCAP");
        let limits = RiskLimits {
            max_position_notional: 10_000.0,
            max_order_notional: 100_000.0,
            ..RiskLimits::default()
        };
        let engine = RiskEngine::new(limits).unwrap();
        engine.on_fill(&fill(symbol, Side::Buy, 100.0, 90.0, 0.0));

        let verdict = engine.check_order(&order(symbol, Side::Buy, 100.0, 20.0), 100.0);
        assert_eq!(verdict.reason, Some(RejectReason::SymbolLimit));

        // Reducing the position is fine.
        let verdict = engine.check_order(&order(symbol, Side::Sell, 100.0, 20.0), 100.0);
        assert!(verdict.passed);
    }

    #[test]
    fn reducing_orders_do_not_inflate_gross_exposure() {
        let symbol = SymbolId::register("RISK-GROSS");
        let limits = RiskLimits {
            max_gross_exposure: 10_000.0,
            max_position_notional: 20_000.0,
            max_order_notional: 20_000.0,
            max_symbol_concentration: 1.0,
            ..RiskLimits::default()
        };
        let engine = RiskEngine::new(limits).unwrap();
        engine.on_fill(&fill(symbol, Side::Buy, 100.0, 95.0, 0.0));
        let mut prices = HashMap::new();
        prices.insert(symbol, 100.0);
        engine.update_marks(&prices);

        // Adding 10 more would push gross to 10_500.
        let verdict = engine.check_order(&order(symbol, Side::Buy, 100.0, 10.0), 100.0);
        assert_eq!(verdict.reason, Some(RejectReason::GrossExposure));

        // Selling 10 reduces the position and must pass.
        let verdict = engine.check_order(&order(symbol, Side::Sell, 100.0, 10.0), 100.0);
        assert!(verdict.passed);
    }

    #[test]
    fn concentration_cap_considers_order_impact() {
        let spread_symbol = SymbolId::register("RISK-CONC-A");
        let heavy_symbol = SymbolId::register("RISK-CONC-B");
        let limits = RiskLimits {
            max_symbol_concentration: 0.5,
            ..RiskLimits::default()
        };
        let engine = RiskEngine::new(limits).unwrap();
        engine.on_fill(&fill(spread_symbol, Side::Buy, 100.0, 10.0, 0.0));
        let mut prices = HashMap::new();
        prices.insert(spread_symbol, 100.0);
        engine.update_marks(&prices);

        // A 9k order against 1k existing gross lands at 90% concentration.
        let verdict = engine.check_order(&order(heavy_symbol, Side::Buy, 100.0, 90.0), 100.0);
        assert_eq!(verdict.reason, Some(RejectReason::Concentration));
    }

    #[test]
    fn marks_update_unrealized_and_peak() {
        let symbol = SymbolId::register("RISK-MARK");
        let engine = engine();
        engine.on_fill(&fill(symbol, Side::Buy, 100.0, 2.0, 0.0));

        let mut prices = HashMap::new();
        prices.insert(symbol, 110.0);
        engine.update_marks(&prices);

        let position = engine.position(symbol).unwrap();
        assert!((position.unrealized_pnl - 20.0).abs() < 1e-9);
        assert!((position.notional - 220.0).abs() < 1e-9);
        assert!(engine.peak_daily_pnl() >= engine.total_pnl());

        // Marks falling back never lower the peak.
        prices.insert(symbol, 95.0);
        engine.update_marks(&prices);
        assert!((engine.peak_daily_pnl() - 20.0).abs() < 1e-9);
        assert!(engine.peak_daily_pnl() >= engine.total_pnl());
    }

    #[test]
    fn malformed_fills_leave_the_ledger_untouched() {
        let symbol = SymbolId::register("RISK-BAD");
        let engine = engine();
        engine.on_fill(&fill(symbol, Side::Buy, -100.0, 1.0, 0.0));
        engine.on_fill(&fill(symbol, Side::Buy, 100.0, 0.0, 0.0));
        assert!(engine.position(symbol).is_none());
        assert_eq!(engine.stats().recent_fills, 0);
    }

    #[test]
    fn reset_daily_zeroes_aggregates() {
        let symbol = SymbolId::register("RISK-RESET");
        let engine = engine();
        engine.on_fill(&fill(symbol, Side::Buy, 100.0, 1.0, 0.0));
        engine.on_fill(&fill(symbol, Side::Sell, 120.0, 1.0, 0.0));
        assert!(engine.daily_realized() > 0.0);

        engine.reset_daily();
        assert_eq!(engine.daily_realized(), 0.0);
        assert_eq!(engine.peak_daily_pnl(), 0.0);
        assert_eq!(engine.stats().recent_fills, 0);
    }

    #[test]
    fn kill_switch_blocks_all_checks() {
        let symbol = SymbolId::register("RISK-KILL");
        let clock = quantra_core::clock::monotonic_clock();
        let kill_switch = Arc::new(KillSwitch::new(clock));
        let limits = RiskLimits {
            // A lone first order is 100% of gross; keep the probe tradable.
            max_symbol_concentration: 1.0,
            ..RiskLimits::default()
        };
        let engine = RiskEngine::new(limits)
            .unwrap()
            .with_kill_switch(Arc::clone(&kill_switch));

        assert!(engine.check_order(&order(symbol, Side::Buy, 10.0, 1.0), 10.0).passed);
        kill_switch.activate("test latch");
        let verdict = engine.check_order(&order(symbol, Side::Buy, 10.0, 1.0), 10.0);
        assert_eq!(verdict.reason, Some(RejectReason::KillSwitch));
    }

    #[test]
    fn open_breaker_short_circuits_checks() {
        let symbol = SymbolId::register("RISK-BRK");
        let clock = quantra_core::clock::monotonic_clock();
        let breaker = Arc::new(CircuitBreaker::new(
            "gateway",
            BreakerConfig::default(),
            clock,
        ));
        let engine = engine().with_breaker(Arc::clone(&breaker));

        breaker.open("venue down");
        let verdict = engine.check_order(&order(symbol, Side::Buy, 10.0, 1.0), 10.0);
        assert_eq!(verdict.reason, Some(RejectReason::CircuitOpen));
    }
}
