//! # Exchange Simulator
//!
//! The simulated exchange: an order-matching engine that consumes ticks
//! and bars to fill resting market and limit orders, plus the bus-side
//! endpoint that turns it into the remote engine clients handshake with.
//!
//! ## Modules
//! - `latency`: The simulated exchange-acknowledgement latency profile.
//! - `engine`: Resting order books, validation and matching.
//! - `service`: The engine-side bus endpoint (app-ID assignment,
//!   heartbeat echo, order intake, event publication) and the raw feed
//!   intake pipeline.

pub mod engine;
pub mod latency;
pub mod service;
