use serde::{Deserialize, Serialize};

/// A fill report emitted once per matching event. Never mutated after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub order_id: String,
    /// Price the order was filled at.
    pub price: f64,
    /// Average execution price (for limit fills this is the price of the
    /// triggering tick or bar).
    pub average_price: f64,
    pub size: u64,
    /// Fill timestamp (unix millis).
    pub timestamp: i64,
}

/// An order rejection with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub order_id: String,
    pub reason: String,
    pub timestamp: i64,
}

/// Acknowledgement that an order passed validation and entered the
/// resting set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrderAck {
    pub order_id: String,
    pub timestamp: i64,
}
