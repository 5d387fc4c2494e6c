//! # Middleware Core Library
//!
//! The client-side messaging/session layer of the trading middleware.
//!
//! ## Modules
//! - `comms`: Transport abstraction (ZMQ, in-memory), message envelopes,
//!   routing-key tables and the raw tick/bar frame codec.
//! - `pipeline`: Bounded single-producer event pipeline (ring buffer)
//!   decoupling network receive loops from decode/dispatch threads.
//! - `heartbeat`: Per-connection liveness state machine.
//! - `correlator`: Fire-and-forget request/response dispatch keyed by
//!   message kind.
//! - `session`: The connect/handshake/teardown controller, one instance
//!   per remote engine.
//! - `config`: String-keyed parameter store backing the routing tables.

pub mod comms;
pub mod config;
pub mod correlator;
pub mod heartbeat;
pub mod pipeline;
pub mod session;
