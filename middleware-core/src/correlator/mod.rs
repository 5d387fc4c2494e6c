//! Request/response correlation.
//!
//! There is no blocking wait anywhere: outbound requests embed a reply-to
//! routing key pointing at the caller's own inbound queue, and responses
//! are dispatched to the callback registered for that message kind at
//! session start. One callback per kind, registered once.

use crate::comms::bus::MessageBus;
use crate::comms::envelope::Envelope;
use crate::comms::routing::RoutingTable;
use log::warn;
use middleware_api::model::MessageKind;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

pub type ResponseHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

pub struct Correlator {
    bus: Arc<dyn MessageBus>,
    routing: Arc<RwLock<RoutingTable>>,
    handlers: Mutex<HashMap<MessageKind, ResponseHandler>>,
}

impl Correlator {
    pub fn new(bus: Arc<dyn MessageBus>, routing: Arc<RwLock<RoutingTable>>) -> Self {
        Self {
            bus,
            routing,
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Registers the callback for one response kind. At most one
    /// subscriber per kind: a second registration is ignored with a
    /// warning.
    pub fn register(&self, kind: MessageKind, handler: ResponseHandler) {
        let mut handlers = self.handlers.lock().unwrap();
        if handlers.contains_key(&kind) {
            warn!("Response kind {} already has a callback, ignoring", kind);
            return;
        }
        handlers.insert(kind, handler);
    }

    /// Fire-and-forget send.
    ///
    /// The outbound routing key and the reply-to key both come from the
    /// routing table; if either is absent the send is skipped and logged,
    /// never surfaced to the caller.
    pub fn send_request(&self, kind: MessageKind, payload: serde_json::Value) {
        let (routing_key, reply_to) = {
            let routing = self.routing.read().unwrap();
            let channel = kind.channel();
            let Some(routing_key) = routing.outbound(channel) else {
                warn!(
                    "Correlator: no routing key for {} (channel {}), send skipped",
                    kind, channel
                );
                return;
            };
            // The very first inquiry has no session yet; it replies to the
            // process-global inquiry route.
            let reply_to = if kind == MessageKind::AppIdInquiry {
                Some(routing.inquiry_key().to_string())
            } else {
                routing.inbound(channel).map(str::to_string)
            };
            (routing_key.to_string(), reply_to)
        };

        let envelope = Envelope::new(kind, reply_to, payload);
        if let Err(e) = self.bus.publish(&routing_key, &envelope) {
            warn!("Correlator: publish of {} failed: {:#}", kind, e);
        }
    }

    /// Dispatches one inbound envelope to its registered callback.
    pub fn on_response(&self, envelope: Envelope) {
        let handler = self.handlers.lock().unwrap().get(&envelope.kind).cloned();
        match handler {
            Some(handler) => handler(envelope),
            None => warn!(
                "Correlator: no callback registered for {}, message dropped",
                envelope.kind
            ),
        }
    }
}
