//! Raw transport traits.
//!
//! Everything on the wire is a `(topic, payload)` frame pair: the bus layer
//! uses the topic as a routing key carrying a JSON envelope, the raw
//! low-latency channel uses it as the frame tag carrying delimited text.
//! Implementation details (ZMQ, in-memory) are hidden behind these traits.

use anyhow::Result;

/// Abstraction for the outgoing transport layer.
pub trait FrameSink: Send + Sync {
    /// Send one frame. The topic is delivered ahead of the payload so
    /// subscribers can filter by prefix.
    fn send_frame(&self, topic: &str, payload: &[u8]) -> Result<()>;
}

/// Abstraction for the incoming transport layer.
///
/// A `FrameSource` is owned by exactly one receive loop; it is `Send` so
/// the loop can run on a dedicated thread, but it is not shared.
pub trait FrameSource: Send {
    /// Receive the next full frame. Blocks until one is available.
    fn recv_frame(&mut self) -> Result<(String, Vec<u8>)>;

    /// Try to receive the next full frame without blocking.
    ///
    /// Returns `Ok(None)` when no frame is pending.
    fn try_recv_frame(&mut self) -> Result<Option<(String, Vec<u8>)>>;
}
