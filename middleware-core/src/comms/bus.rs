//! The abstract message-bus boundary.
//!
//! The session layer treats the broker as three operations: declare+bind a
//! queue to a routing key, publish an envelope to a routing key, and
//! register a push-style consumer on a queue. Concrete backends live in
//! `comms::transports`.

use crate::comms::envelope::Envelope;
use anyhow::Result;

/// Push-style consumer callback. Invoked on the queue's delivery thread,
/// one envelope at a time.
pub type BusHandler = Box<dyn Fn(Envelope) + Send + Sync>;

pub trait MessageBus: Send + Sync {
    /// Declares a queue and binds it to a routing key. Idempotent.
    fn declare_queue(&self, queue: &str, routing_key: &str) -> Result<()>;

    /// Publishes an envelope to every queue bound to `routing_key`.
    fn publish(&self, routing_key: &str, envelope: &Envelope) -> Result<()>;

    /// Registers the consumer for `queue`. The queue must have been
    /// declared first.
    fn consume(&self, queue: &str, handler: BusHandler) -> Result<()>;

    /// Stops delivery. Consumers finish the envelope they are handling
    /// before their loop observes the flag and exits.
    fn shutdown(&self);
}
