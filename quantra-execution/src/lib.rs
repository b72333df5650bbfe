//! Live order state tracking.
//!
//! Fill reports arrive keyed by exchange order id, risk wants client ids, and
//! strategies ask per symbol, so the tracker maintains all three views under
//! one lock. Membership in the active set is the definitive liveness signal.

use std::collections::{HashMap, HashSet};

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use quantra_core::{Order, SymbolId};

/// Retention policy for the tracker.
#[derive(Clone, Copy, Debug)]
pub struct TrackerConfig {
    /// Soft cap on stored orders; exceeding it evicts the oldest completed.
    pub max_orders: usize,
    /// How many completed orders one eviction pass removes.
    pub evict_batch: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_orders: 100_000,
            evict_batch: 1_000,
        }
    }
}

#[derive(Default)]
struct TrackerInner {
    /// Primary storage keyed by client order id.
    orders: HashMap<String, Order>,
    /// Exchange order id -> client order id.
    by_exchange: HashMap<String, String>,
    /// Symbol -> client order ids.
    by_symbol: HashMap<SymbolId, Vec<String>>,
    /// Client ids of orders in an active status.
    active: HashSet<String>,
}

impl TrackerInner {
    fn unlink(&mut self, order: &Order) {
        if let Some(exchange_id) = &order.exchange_order_id {
            self.by_exchange.remove(exchange_id);
        }
        self.active.remove(&order.client_order_id);
        if let Some(ids) = self.by_symbol.get_mut(&order.symbol) {
            ids.retain(|id| id != &order.client_order_id);
        }
    }

    fn evict_oldest_completed(&mut self, batch: usize) {
        let mut completed: Vec<(String, chrono::DateTime<Utc>)> = self
            .orders
            .values()
            .filter(|order| order.is_complete())
            .map(|order| {
                let completed_at = order
                    .completed_at
                    .or(order.created_at)
                    .unwrap_or_else(Utc::now);
                (order.client_order_id.clone(), completed_at)
            })
            .collect();
        completed.sort_by_key(|(_, at)| *at);

        for (client_id, _) in completed.into_iter().take(batch) {
            if let Some(order) = self.orders.remove(&client_id) {
                self.unlink(&order);
            }
        }
    }
}

/// Dual-indexed store for every order the engine has emitted.
pub struct OrderTracker {
    config: TrackerConfig,
    inner: RwLock<TrackerInner>,
}

impl Default for OrderTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl OrderTracker {
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(TrackerInner::default()),
        }
    }

    /// Insert a new order, evicting old completed entries at the soft cap.
    pub fn track(&self, order: Order) {
        let mut inner = self.inner.write();
        if inner.orders.len() >= self.config.max_orders {
            inner.evict_oldest_completed(self.config.evict_batch);
        }

        if let Some(exchange_id) = &order.exchange_order_id {
            inner
                .by_exchange
                .insert(exchange_id.clone(), order.client_order_id.clone());
        }
        inner
            .by_symbol
            .entry(order.symbol)
            .or_default()
            .push(order.client_order_id.clone());
        if order.is_active() {
            inner.active.insert(order.client_order_id.clone());
        }
        inner.orders.insert(order.client_order_id.clone(), order);
    }

    /// Replace the stored order, re-indexing active membership and any newly
    /// assigned exchange id. Regressions out of a terminal status are dropped.
    pub fn update(&self, client_order_id: &str, updated: Order) {
        let mut inner = self.inner.write();
        let Some(existing) = inner.orders.get(client_order_id) else {
            debug!(client_order_id, "update for unknown order");
            return;
        };
        if existing.status.is_terminal() && !updated.status.is_terminal() {
            warn!(
                client_order_id,
                from = ?existing.status,
                to = ?updated.status,
                "ignoring status regression from a terminal state"
            );
            return;
        }

        let was_active = existing.is_active();
        if was_active && !updated.is_active() {
            inner.active.remove(client_order_id);
        } else if !was_active && updated.is_active() {
            inner.active.insert(client_order_id.to_string());
        }
        if let Some(exchange_id) = &updated.exchange_order_id {
            inner
                .by_exchange
                .insert(exchange_id.clone(), client_order_id.to_string());
        }
        inner.orders.insert(client_order_id.to_string(), updated);
    }

    #[must_use]
    pub fn get_by_client(&self, client_order_id: &str) -> Option<Order> {
        self.inner.read().orders.get(client_order_id).cloned()
    }

    #[must_use]
    pub fn get_by_exchange(&self, exchange_order_id: &str) -> Option<Order> {
        let inner = self.inner.read();
        let client_id = inner.by_exchange.get(exchange_order_id)?;
        inner.orders.get(client_id).cloned()
    }

    /// Resolve the symbol of an order id of either kind.
    ///
    /// Fill handlers only receive an exchange id, so that index is consulted
    /// first, then the id is retried as a client id.
    #[must_use]
    pub fn symbol_of(&self, order_id: &str) -> Option<SymbolId> {
        let inner = self.inner.read();
        if let Some(client_id) = inner.by_exchange.get(order_id) {
            if let Some(order) = inner.orders.get(client_id) {
                return Some(order.symbol);
            }
        }
        inner.orders.get(order_id).map(|order| order.symbol)
    }

    /// Snapshot of every order in an active status.
    #[must_use]
    pub fn active_orders(&self) -> Vec<Order> {
        let inner = self.inner.read();
        inner
            .active
            .iter()
            .filter_map(|client_id| inner.orders.get(client_id))
            .cloned()
            .collect()
    }

    /// Snapshot of every tracked order for `symbol`.
    #[must_use]
    pub fn orders_for_symbol(&self, symbol: SymbolId) -> Vec<Order> {
        let inner = self.inner.read();
        inner
            .by_symbol
            .get(&symbol)
            .map(|ids| {
                ids.iter()
                    .filter_map(|client_id| inner.orders.get(client_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove terminal orders whose completion is older than `retention`.
    ///
    /// Returns how many orders were removed.
    pub fn cleanup_completed(&self, retention: Duration) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.write();
        let expired: Vec<String> = inner
            .orders
            .values()
            .filter(|order| {
                order.is_complete()
                    && order
                        .completed_at
                        .map(|at| now - at > retention)
                        .unwrap_or(false)
            })
            .map(|order| order.client_order_id.clone())
            .collect();

        for client_id in &expired {
            if let Some(order) = inner.orders.remove(client_id) {
                inner.unlink(&order);
            }
        }
        expired.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().orders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().orders.is_empty()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.read().active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantra_core::{OrderStatus, OrderType, Side, Venue};

    fn order(client_id: &str, symbol: SymbolId, status: OrderStatus) -> Order {
        let mut order = Order::new(
            client_id,
            symbol,
            Venue::Binance,
            Side::Buy,
            OrderType::Limit,
            100.0,
            1.0,
        );
        order.status = status;
        if status.is_terminal() {
            order.completed_at = Some(Utc::now());
        }
        order
    }

    #[test]
    fn lookup_by_client_works_before_ack() {
        let symbol = SymbolId::register("TRK-PREACK");
        let tracker = OrderTracker::default();
        tracker.track(order("c-1", symbol, OrderStatus::Pending));

        assert!(tracker.get_by_client("c-1").is_some());
        assert!(tracker.get_by_exchange("x-1").is_none());
        assert_eq!(tracker.symbol_of("c-1"), Some(symbol));

        // Ack assigns the exchange id; both lookups must now resolve.
        let mut acked = tracker.get_by_client("c-1").unwrap();
        acked.exchange_order_id = Some("x-1".into());
        acked.transition(OrderStatus::New, Utc::now());
        tracker.update("c-1", acked);

        assert!(tracker.get_by_exchange("x-1").is_some());
        assert_eq!(tracker.symbol_of("x-1"), Some(symbol));
    }

    #[test]
    fn active_set_tracks_status_transitions() {
        let symbol = SymbolId::register("TRK-ACTIVE");
        let tracker = OrderTracker::default();
        tracker.track(order("c-1", symbol, OrderStatus::New));
        tracker.track(order("c-2", symbol, OrderStatus::Pending));
        assert_eq!(tracker.active_count(), 1);

        let mut filled = tracker.get_by_client("c-1").unwrap();
        filled.transition(OrderStatus::Filled, Utc::now());
        tracker.update("c-1", filled);
        assert_eq!(tracker.active_count(), 0);

        let mut live = tracker.get_by_client("c-2").unwrap();
        live.transition(OrderStatus::PartiallyFilled, Utc::now());
        tracker.update("c-2", live);
        assert_eq!(tracker.active_count(), 1);

        // Invariant: active membership mirrors the stored status.
        for order in tracker.active_orders() {
            assert!(order.status.is_active());
        }
    }

    #[test]
    fn terminal_regressions_are_ignored() {
        let symbol = SymbolId::register("TRK-REGRESS");
        let tracker = OrderTracker::default();
        tracker.track(order("c-1", symbol, OrderStatus::Canceled));

        let regressed = order("c-1", symbol, OrderStatus::New);
        tracker.update("c-1", regressed);
        assert_eq!(
            tracker.get_by_client("c-1").unwrap().status,
            OrderStatus::Canceled
        );
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn cleanup_removes_only_old_terminal_orders() {
        let symbol = SymbolId::register("TRK-CLEAN");
        let tracker = OrderTracker::default();

        let mut stale = order("c-old", symbol, OrderStatus::Filled);
        stale.completed_at = Some(Utc::now() - Duration::hours(2));
        tracker.track(stale);
        tracker.track(order("c-new", symbol, OrderStatus::Filled));
        tracker.track(order("c-live", symbol, OrderStatus::New));

        let removed = tracker.cleanup_completed(Duration::hours(1));
        assert_eq!(removed, 1);
        assert!(tracker.get_by_client("c-old").is_none());
        assert!(tracker.get_by_client("c-new").is_some());
        assert!(tracker.get_by_client("c-live").is_some());
        assert!(tracker.orders_for_symbol(symbol).len() == 2);
    }

    #[test]
    fn soft_cap_evicts_oldest_completed_first() {
        let symbol = SymbolId::register("TRK-CAP");
        let tracker = OrderTracker::new(TrackerConfig {
            max_orders: 3,
            evict_batch: 2,
        });

        let mut oldest = order("c-1", symbol, OrderStatus::Filled);
        oldest.completed_at = Some(Utc::now() - Duration::minutes(30));
        tracker.track(oldest);
        tracker.track(order("c-2", symbol, OrderStatus::Filled));
        tracker.track(order("c-3", symbol, OrderStatus::New));
        tracker.track(order("c-4", symbol, OrderStatus::New));

        assert!(tracker.get_by_client("c-1").is_none(), "oldest evicted");
        assert!(tracker.get_by_client("c-3").is_some());
        assert!(tracker.get_by_client("c-4").is_some());
    }
}
