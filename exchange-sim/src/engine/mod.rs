//! The order-matching engine.
//!
//! Two resting collections (market and limit), a per-symbol trade-price
//! history, and three outbound events. Matching is driven entirely by
//! inbound market data: every tick or bar records its trade price into
//! the history and then sweeps both collections for that symbol.
//!
//! Each resting collection sits behind its own mutex; events fire after
//! the lock is released so callbacks may submit follow-up orders.

use crate::latency::LatencyProfile;
use log::{debug, info, warn};
use middleware_api::model::{Bar, Execution, LimitOrder, MarketOrder, NewOrderAck, Rejection, Side, Tick};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Rejection reason for orders that fail field validation.
pub const REASON_INVALID: &str = "Invalid Price Or Size";
/// Rejection reason for market orders whose probe window passed with no
/// matching tick.
pub const REASON_NO_MARKET_DATA: &str = "No Market Data";

/// Event callbacks carry the order's venue tag so the caller can route
/// the event back to the submitting client.
pub type AcceptedCallback = Arc<dyn Fn(&str, NewOrderAck) + Send + Sync>;
pub type ExecutedCallback = Arc<dyn Fn(&str, Execution) + Send + Sync>;
pub type RejectedCallback = Arc<dyn Fn(&str, Rejection) + Send + Sync>;

/// A market order with its latency-adjusted fill target (unix second).
struct RestingMarket {
    order: MarketOrder,
    target: i64,
}

/// Trade prices for one symbol, keyed by unix second.
#[derive(Default)]
struct SymbolHistory {
    by_second: BTreeMap<i64, f64>,
}

enum Probe {
    Filled { price: f64, at: i64 },
    /// History has not yet reached the end of the probe window.
    Waiting,
    /// History extends past the probe window with no matching second.
    Exhausted,
}

pub struct MatchingEngine {
    latency: LatencyProfile,
    market_orders: Mutex<Vec<RestingMarket>>,
    limit_orders: Mutex<Vec<LimitOrder>>,
    history: Mutex<HashMap<String, SymbolHistory>>,
    on_accepted: Mutex<Option<AcceptedCallback>>,
    on_executed: Mutex<Option<ExecutedCallback>>,
    on_rejected: Mutex<Option<RejectedCallback>>,
}

impl MatchingEngine {
    pub fn new(latency: LatencyProfile) -> Self {
        Self {
            latency,
            market_orders: Mutex::new(Vec::new()),
            limit_orders: Mutex::new(Vec::new()),
            history: Mutex::new(HashMap::new()),
            on_accepted: Mutex::new(None),
            on_executed: Mutex::new(None),
            on_rejected: Mutex::new(None),
        }
    }

    /// One subscriber per event; a second registration is ignored with a
    /// warning.
    pub fn on_order_accepted(&self, callback: AcceptedCallback) {
        let mut slot = self.on_accepted.lock().unwrap();
        if slot.is_some() {
            warn!("Order-accepted callback already registered, ignoring");
            return;
        }
        *slot = Some(callback);
    }

    pub fn on_order_executed(&self, callback: ExecutedCallback) {
        let mut slot = self.on_executed.lock().unwrap();
        if slot.is_some() {
            warn!("Order-executed callback already registered, ignoring");
            return;
        }
        *slot = Some(callback);
    }

    pub fn on_order_rejected(&self, callback: RejectedCallback) {
        let mut slot = self.on_rejected.lock().unwrap();
        if slot.is_some() {
            warn!("Order-rejected callback already registered, ignoring");
            return;
        }
        *slot = Some(callback);
    }

    /// Validates and rests a market order, then attempts an immediate
    /// fill in case the history already covers its target.
    pub fn submit_market_order(&self, order: MarketOrder) {
        if order.order_id.is_empty() || order.symbol.is_empty() || order.venue.is_empty() {
            self.reject(&order.venue, &order.order_id, REASON_INVALID, order.submitted_at);
            return;
        }
        self.accept(&order.venue, &order.order_id, order.submitted_at);

        let target = self.latency.target_second(order.submitted_at);
        debug!(
            "Market order {} {} x{} targets second {}",
            order.order_id, order.symbol, order.size, target
        );
        let symbol = order.symbol.clone();
        self.market_orders
            .lock()
            .unwrap()
            .push(RestingMarket { order, target });
        self.sweep_market(&symbol);
    }

    /// Validates and rests a limit order, then tests it against the last
    /// recorded trade for its symbol.
    pub fn submit_limit_order(&self, order: LimitOrder) {
        if order.order_id.is_empty()
            || order.symbol.is_empty()
            || order.venue.is_empty()
            || order.size == 0
            || !(order.limit_price > 0.0)
        {
            self.reject(&order.venue, &order.order_id, REASON_INVALID, order.submitted_at);
            return;
        }
        self.accept(&order.venue, &order.order_id, order.submitted_at);

        let symbol = order.symbol.clone();
        let last_trade = {
            let history = self.history.lock().unwrap();
            history.get(&symbol).and_then(|h| {
                h.by_second
                    .last_key_value()
                    .map(|(sec, price)| (*sec, *price))
            })
        };
        self.limit_orders.lock().unwrap().push(order);
        if let Some((sec, price)) = last_trade {
            self.sweep_limits(&symbol, price, sec * 1_000);
        }
    }

    /// Records the tick's last-trade price and sweeps both resting
    /// collections for the symbol.
    pub fn on_tick(&self, tick: &Tick) {
        self.record(&tick.symbol, tick.timestamp, tick.last);
        self.sweep_limits(&tick.symbol, tick.last, tick.timestamp);
        self.sweep_market(&tick.symbol);
    }

    /// Bars participate in matching through their close price.
    pub fn on_bar(&self, bar: &Bar) {
        self.record(&bar.symbol, bar.timestamp, bar.close);
        self.sweep_limits(&bar.symbol, bar.close, bar.timestamp);
        self.sweep_market(&bar.symbol);
    }

    /// Drops the order from both resting collections. Cancelling an
    /// unknown order is a silent no-op.
    pub fn cancel(&self, order_id: &str) {
        self.market_orders
            .lock()
            .unwrap()
            .retain(|resting| resting.order.order_id != order_id);
        self.limit_orders
            .lock()
            .unwrap()
            .retain(|order| order.order_id != order_id);
    }

    /// Clears every resting order for one venue, without events. Used
    /// when the venue's session goes away.
    pub fn clear_venue(&self, venue: &str) {
        let mut dropped = 0usize;
        {
            let mut markets = self.market_orders.lock().unwrap();
            let before = markets.len();
            markets.retain(|resting| resting.order.venue != venue);
            dropped += before - markets.len();
        }
        {
            let mut limits = self.limit_orders.lock().unwrap();
            let before = limits.len();
            limits.retain(|order| order.venue != venue);
            dropped += before - limits.len();
        }
        if dropped > 0 {
            info!("Cleared {} resting orders for venue {}", dropped, venue);
        }
    }

    pub fn resting_count(&self) -> usize {
        self.market_orders.lock().unwrap().len() + self.limit_orders.lock().unwrap().len()
    }

    fn record(&self, symbol: &str, timestamp_millis: i64, price: f64) {
        let second = timestamp_millis.div_euclid(1_000);
        self.history
            .lock()
            .unwrap()
            .entry(symbol.to_string())
            .or_default()
            .by_second
            .insert(second, price);
    }

    /// Fills or expires resting market orders for one symbol, then drops
    /// history the probe can no longer reach. Limit matching only ever
    /// uses the incoming print, so the retained window is exactly what
    /// market probing needs: the probe window back from the latest print,
    /// extended to the earliest resting target.
    fn sweep_market(&self, symbol: &str) {
        let mut fills: Vec<(String, Execution)> = Vec::new();
        let mut expired: Vec<(String, Rejection)> = Vec::new();
        {
            let mut markets = self.market_orders.lock().unwrap();
            let mut history = self.history.lock().unwrap();
            let Some(hist) = history.get(symbol) else {
                return;
            };
            markets.retain(|resting| {
                if resting.order.symbol != symbol {
                    return true;
                }
                match probe(&hist.by_second, resting.target, self.latency.max_probe_minutes) {
                    Probe::Filled { price, at } => {
                        fills.push((
                            resting.order.venue.clone(),
                            Execution {
                                order_id: resting.order.order_id.clone(),
                                price,
                                average_price: price,
                                size: resting.order.size,
                                timestamp: at * 1_000,
                            },
                        ));
                        false
                    }
                    Probe::Exhausted => {
                        expired.push((
                            resting.order.venue.clone(),
                            Rejection {
                                order_id: resting.order.order_id.clone(),
                                reason: REASON_NO_MARKET_DATA.to_string(),
                                timestamp: resting.target * 1_000,
                            },
                        ));
                        false
                    }
                    Probe::Waiting => true,
                }
            });

            let earliest_target = markets
                .iter()
                .filter(|resting| resting.order.symbol == symbol)
                .map(|resting| resting.target)
                .min();
            if let Some(hist) = history.get_mut(symbol) {
                if let Some((&latest, _)) = hist.by_second.last_key_value() {
                    let mut cutoff = latest - i64::from(self.latency.max_probe_minutes) * 60;
                    if let Some(target) = earliest_target {
                        cutoff = cutoff.min(target);
                    }
                    hist.by_second = hist.by_second.split_off(&cutoff);
                }
            }
        }
        for (venue, execution) in fills {
            self.emit_executed(&venue, execution);
        }
        for (venue, rejection) in expired {
            self.emit_rejected(&venue, rejection);
        }
    }

    /// Fills resting limit orders crossed by one trade price.
    ///
    /// Buys fill when the trade prints at or below the limit; sells only
    /// strictly above it. The execution price is the limit price, the
    /// average price is the triggering trade's.
    fn sweep_limits(&self, symbol: &str, trade_price: f64, trade_ts_millis: i64) {
        let mut fills: Vec<(String, Execution)> = Vec::new();
        {
            let mut limits = self.limit_orders.lock().unwrap();
            limits.retain(|order| {
                if order.symbol != symbol {
                    return true;
                }
                let crossed = match order.side {
                    Side::Buy => trade_price <= order.limit_price,
                    Side::Sell => trade_price > order.limit_price,
                };
                if !crossed {
                    return true;
                }
                fills.push((
                    order.venue.clone(),
                    Execution {
                        order_id: order.order_id.clone(),
                        price: order.limit_price,
                        average_price: trade_price,
                        size: order.size,
                        timestamp: trade_ts_millis,
                    },
                ));
                false
            });
        }
        for (venue, execution) in fills {
            self.emit_executed(&venue, execution);
        }
    }

    fn accept(&self, venue: &str, order_id: &str, timestamp: i64) {
        let callback = self.on_accepted.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(
                venue,
                NewOrderAck {
                    order_id: order_id.to_string(),
                    timestamp,
                },
            );
        }
    }

    fn reject(&self, venue: &str, order_id: &str, reason: &str, timestamp: i64) {
        warn!("Order {} rejected: {}", order_id, reason);
        self.emit_rejected(
            venue,
            Rejection {
                order_id: order_id.to_string(),
                reason: reason.to_string(),
                timestamp,
            },
        );
    }

    fn emit_executed(&self, venue: &str, execution: Execution) {
        info!(
            "Filled {} x{} at {} (avg {})",
            execution.order_id, execution.size, execution.price, execution.average_price
        );
        let callback = self.on_executed.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(venue, execution);
        }
    }

    fn emit_rejected(&self, venue: &str, rejection: Rejection) {
        let callback = self.on_rejected.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(venue, rejection);
        }
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new(LatencyProfile::default())
    }
}

/// Looks for a trade at the target second, stepping forward one minute at
/// a time through the probe window.
fn probe(hist: &BTreeMap<i64, f64>, target: i64, max_probe_minutes: u32) -> Probe {
    for step in 0..=i64::from(max_probe_minutes) {
        let at = target + step * 60;
        if let Some(&price) = hist.get(&at) {
            return Probe::Filled { price, at };
        }
    }
    let window_end = target + i64::from(max_probe_minutes) * 60;
    match hist.last_key_value() {
        Some((&last, _)) if last > window_end => Probe::Exhausted,
        _ => Probe::Waiting,
    }
}

#[cfg(test)]
mod tests;
