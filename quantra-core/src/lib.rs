//! Fundamental data types shared across the entire workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod atomic;
pub mod book;
pub mod clock;
pub mod identifiers;
pub mod pool;
pub mod ring;

pub use atomic::AtomicF64;
pub use book::{BookView, Px};
pub use clock::{Clock, ManualClock, MonotonicClock, SharedClock};
pub use identifiers::SymbolId;
pub use pool::{fill_pool, order_pool, ObjectPool, PoolHandle};
pub use ring::BoundedRing;

/// Alias for price values.
pub type Price = f64;
/// Alias for quantity values.
pub type Quantity = f64;

/// Positions with an absolute quantity below this are considered flat.
pub const QTY_EPSILON: f64 = 1e-7;

/// The side of an order, fill, or position delta.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the opposite side (buy <-> sell).
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Sign applied to quantities: +1 for buys, -1 for sells.
    #[must_use]
    pub fn signum(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => f.write_str("BUY"),
            Self::Sell => f.write_str("SELL"),
        }
    }
}

/// Execution venues the engine understands.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Venue {
    Binance,
    Bybit,
    Coinbase,
    Kraken,
    Unknown,
}

impl Venue {
    /// Spot taker fee charged by the venue, in basis points.
    #[must_use]
    pub fn taker_fee_bps(self) -> f64 {
        match self {
            Self::Binance => 10.0,
            Self::Bybit => 10.0,
            Self::Kraken => 16.0,
            Self::Coinbase => 40.0,
            Self::Unknown => 20.0,
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Binance => "BINANCE",
            Self::Bybit => "BYBIT",
            Self::Coinbase => "COINBASE",
            Self::Kraken => "KRAKEN",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Order execution style.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
    LimitMaker,
    /// Limit order that cancels any unfilled remainder immediately.
    LimitIoc,
    StopLoss,
    StopLimit,
}

/// Lifecycle state of an order as reported by the venue.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Terminal states never transition again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Canceled | Self::Rejected | Self::Expired
        )
    }

    /// Active states are the ones that can still receive fills.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::New | Self::PartiallyFilled)
    }
}

/// Stable identifiers for every pre-trade rejection the engine can produce.
///
/// The rendered strings are load-bearing: downstream alerting keys off them,
/// so they must never change once shipped.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    DailyLoss,
    TrailingStop,
    OrderSize,
    SymbolLimit,
    GrossExposure,
    Concentration,
    Slippage,
    Staleness,
    BelowThreshold,
    DetectionLatency,
    CircuitOpen,
    KillSwitch,
}

impl RejectReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DailyLoss => "Daily loss limit exceeded",
            Self::TrailingStop => "Trailing stop hit",
            Self::OrderSize => "Order size exceeds limit",
            Self::SymbolLimit => "Symbol position limit exceeded",
            Self::GrossExposure => "Total gross exposure limit exceeded",
            Self::Concentration => "Concentration limit exceeded",
            Self::Slippage => "Slippage too high",
            Self::Staleness => "Orderbook too stale",
            Self::BelowThreshold => "Net profit below threshold",
            Self::DetectionLatency => "Detection too slow",
            Self::CircuitOpen => "Circuit breaker open",
            Self::KillSwitch => "Kill switch active",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order as the engine tracks it, aggregating venue state over its life.
///
/// Identity is the pair `(client_order_id, exchange_order_id)`: the client id
/// exists from creation, the exchange id only after the venue acknowledges.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Order {
    pub client_order_id: String,
    pub exchange_order_id: Option<String>,
    pub symbol: SymbolId,
    pub venue: Venue,
    pub side: Side,
    pub order_type: OrderType,
    /// Limit price; 0 for market orders.
    pub price: Price,
    pub quantity: Quantity,
    pub filled_quantity: Quantity,
    pub remaining_quantity: Quantity,
    pub status: OrderStatus,
    pub reject_reason: Option<String>,
    /// Tag of the strategy that generated this order (e.g. `"OBI"`).
    pub strategy: String,
    pub signal_id: u64,
    /// Notional reserved against risk limits when the order was approved.
    pub risk_notional: f64,
    pub created_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub acked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Build a fresh order in `Pending` state with `remaining == quantity`.
    pub fn new(
        client_order_id: impl Into<String>,
        symbol: SymbolId,
        venue: Venue,
        side: Side,
        order_type: OrderType,
        price: Price,
        quantity: Quantity,
    ) -> Self {
        Self {
            client_order_id: client_order_id.into(),
            symbol,
            venue,
            side,
            order_type,
            price,
            quantity,
            remaining_quantity: quantity,
            created_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply an execution of `quantity` at time `at`, keeping
    /// `filled + remaining == original` and advancing the status.
    pub fn register_fill(&mut self, quantity: Quantity, at: DateTime<Utc>) {
        self.filled_quantity += quantity;
        self.remaining_quantity = (self.quantity - self.filled_quantity).max(0.0);
        if self.remaining_quantity <= QTY_EPSILON {
            self.status = OrderStatus::Filled;
            self.completed_at = Some(at);
        } else {
            self.status = OrderStatus::PartiallyFilled;
        }
    }

    /// Advance the status, refusing to leave a terminal state.
    ///
    /// Returns false when the transition was rejected.
    pub fn transition(&mut self, status: OrderStatus, at: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        match status {
            OrderStatus::New => self.acked_at = Some(at),
            s if s.is_terminal() => self.completed_at = Some(at),
            _ => {}
        }
        true
    }

    /// Microseconds between local creation and hand-off to the gateway.
    #[must_use]
    pub fn creation_to_send_us(&self) -> Option<i64> {
        span_us(self.created_at, self.sent_at)
    }

    /// Microseconds between gateway hand-off and venue acknowledgement.
    #[must_use]
    pub fn send_to_ack_us(&self) -> Option<i64> {
        span_us(self.sent_at, self.acked_at)
    }

    /// Microseconds from creation to the terminal state, if reached.
    #[must_use]
    pub fn total_latency_us(&self) -> Option<i64> {
        if !self.is_complete() {
            return None;
        }
        span_us(self.created_at, self.completed_at)
    }
}

fn span_us(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Option<i64> {
    match (from, to) {
        (Some(from), Some(to)) => (to - from).num_microseconds(),
        _ => None,
    }
}

impl Default for Side {
    fn default() -> Self {
        Self::Buy
    }
}

impl Default for Venue {
    fn default() -> Self {
        Self::Unknown
    }
}

impl Default for OrderType {
    fn default() -> Self {
        Self::Limit
    }
}

impl Default for OrderStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Venue acknowledgement of a previously submitted order.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrderAck {
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub symbol: SymbolId,
    pub venue: Venue,
    pub status: OrderStatus,
    pub price: Price,
    pub quantity: Quantity,
    pub side: Side,
    pub timestamp: DateTime<Utc>,
}

/// Venue rejection of a previously submitted order.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrderReject {
    pub client_order_id: String,
    pub symbol: SymbolId,
    pub venue: Venue,
    pub error_code: String,
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
    pub is_retriable: bool,
    pub retry_after_ms: u32,
}

/// A single execution reported by a venue.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Fill {
    pub fill_id: String,
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub symbol: SymbolId,
    pub side: Side,
    pub price: Price,
    pub quantity: Quantity,
    pub fee: f64,
    pub fee_currency: String,
    pub is_maker: bool,
    pub venue: Venue,
    pub exchange_time: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    /// Top of book captured when the fill arrived, for execution analysis.
    pub bid_at_fill: Price,
    pub ask_at_fill: Price,
    pub mid_at_fill: Price,
}

impl Fill {
    /// Signed slippage against the mid at fill time.
    ///
    /// Positive means the fill was worse than mid for our side.
    #[must_use]
    pub fn slippage_vs_mid(&self) -> f64 {
        if self.mid_at_fill == 0.0 {
            return 0.0;
        }
        match self.side {
            Side::Buy => (self.price - self.mid_at_fill) / self.mid_at_fill,
            Side::Sell => (self.mid_at_fill - self.price) / self.mid_at_fill,
        }
    }

    /// Signed cash flow of the fill including fees.
    #[must_use]
    pub fn net_value(&self) -> f64 {
        let gross = self.price * self.quantity;
        match self.side {
            Side::Buy => -(gross + self.fee),
            Side::Sell => gross - self.fee,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_fill_accounting_preserves_quantity_invariant() {
        let symbol = SymbolId::register("BTCUSDT");
        let mut order = Order::new(
            "c-1",
            symbol,
            Venue::Binance,
            Side::Buy,
            OrderType::Limit,
            50_000.0,
            2.0,
        );
        order.transition(OrderStatus::New, Utc::now());

        order.register_fill(0.5, Utc::now());
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert!(
            (order.filled_quantity + order.remaining_quantity - order.quantity).abs()
                < QTY_EPSILON
        );

        order.register_fill(1.5, Utc::now());
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.completed_at.is_some());
        assert!(order.remaining_quantity.abs() < QTY_EPSILON);
    }

    #[test]
    fn terminal_status_is_sticky() {
        let symbol = SymbolId::register("ETHUSDT");
        let mut order = Order::new(
            "c-2",
            symbol,
            Venue::Kraken,
            Side::Sell,
            OrderType::Market,
            0.0,
            1.0,
        );
        assert!(order.transition(OrderStatus::Canceled, Utc::now()));
        assert!(!order.transition(OrderStatus::New, Utc::now()));
        assert_eq!(order.status, OrderStatus::Canceled);
    }

    #[test]
    fn fill_net_value_includes_fees() {
        let fill = Fill {
            side: Side::Sell,
            price: 100.0,
            quantity: 2.0,
            fee: 0.5,
            ..Fill::default()
        };
        assert_eq!(fill.net_value(), 199.5);
    }

    #[test]
    fn venue_fee_table_matches_taker_schedule() {
        assert_eq!(Venue::Binance.taker_fee_bps(), 10.0);
        assert_eq!(Venue::Kraken.taker_fee_bps(), 16.0);
        assert_eq!(Venue::Coinbase.taker_fee_bps(), 40.0);
    }
}
