use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// A market order: filled at the first qualifying tick after the simulated
/// exchange latency has elapsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrder {
    pub order_id: String,
    pub side: Side,
    pub size: u64,
    pub symbol: String,
    /// Execution venue tag (the provider the order is routed to).
    pub venue: String,
    /// Submission timestamp (unix millis).
    pub submitted_at: i64,
}

impl MarketOrder {
    pub fn new(
        order_id: impl Into<String>,
        side: Side,
        size: u64,
        symbol: impl Into<String>,
        venue: impl Into<String>,
        submitted_at: i64,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            side,
            size,
            symbol: symbol.into(),
            venue: venue.into(),
            submitted_at,
        }
    }
}

/// A limit order: rests until a tick or bar crosses the limit price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitOrder {
    pub order_id: String,
    pub side: Side,
    pub size: u64,
    pub symbol: String,
    pub limit_price: f64,
    pub venue: String,
    pub submitted_at: i64,
}

impl LimitOrder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        order_id: impl Into<String>,
        side: Side,
        size: u64,
        symbol: impl Into<String>,
        limit_price: f64,
        venue: impl Into<String>,
        submitted_at: i64,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            side,
            size,
            symbol: symbol.into(),
            limit_price,
            venue: venue.into(),
            submitted_at,
        }
    }
}
