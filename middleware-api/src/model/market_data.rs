//! Market data models.
//!
//! `Tick` and `Bar` mirror the fixed field schema of the raw low-latency
//! channel; timestamps are unix milliseconds everywhere in memory, the
//! text representation is handled by the frame codec.

use serde::{Deserialize, Serialize};

/// A single top-of-book update for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub bid: f64,
    pub bid_size: u64,
    pub ask: f64,
    pub ask_size: u64,
    pub last: f64,
    pub last_size: u64,
    /// Timestamp of the trade/quote (unix millis).
    pub timestamp: i64,
    pub provider: String,
}

impl Tick {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        bid: f64,
        bid_size: u64,
        ask: f64,
        ask_size: u64,
        last: f64,
        last_size: u64,
        timestamp: i64,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            bid,
            bid_size,
            ask,
            ask_size,
            last,
            last_size,
            timestamp,
            provider: provider.into(),
        }
    }
}

/// An aggregated OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub symbol: String,
    /// Bar end timestamp (unix millis).
    pub timestamp: i64,
    pub provider: String,
    /// Correlates historic bar replies with the originating request.
    pub request_id: String,
}
