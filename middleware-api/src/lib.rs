//! # Middleware API
//!
//! Shared domain model for the trading middleware services.
//!
//! ## Modules
//! - `model`: Common data types (orders, ticks, bars, execution reports)
//!   with identical serialization on every side of the bus.
//!
//! Every message that crosses the bus is defined here so that the client
//! session layer, the market-data engine and the simulated exchange agree
//! on one wire vocabulary.

pub mod model;
