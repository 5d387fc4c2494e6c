//! Engine-side bus endpoint.
//!
//! `EngineService` is the remote end of the client handshake: it assigns
//! application IDs, echoes heartbeats, records each client's advertised
//! queue names, feeds inbound orders into the matching engine and routes
//! engine events back to the queue the owning client bound for that
//! channel.
//!
//! `FeedIntake` is the raw-channel intake: one receive thread pushes
//! frames into the bounded pipeline, one decode thread drains it into
//! the engine.

use crate::engine::MatchingEngine;
use anyhow::Result;
use log::{debug, info, warn};
use middleware_api::model::{
    AppInfo, Channel, InquiryResponse, LimitOrder, MarketOrder, MessageKind,
};
use middleware_core::comms::bus::MessageBus;
use middleware_core::comms::envelope::Envelope;
use middleware_core::comms::frame::{self, RawMessage};
use middleware_core::comms::transport::FrameSource;
use middleware_core::config::ParamStore;
use middleware_core::pipeline::{pipeline, FrameSlot, DEFAULT_CAPACITY};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

#[derive(Debug, Clone)]
pub struct EngineServiceConfig {
    /// Heartbeat interval handed to every client at app-ID assignment.
    pub heartbeat_interval_ms: u64,
    /// Prefix of assigned application IDs (`APP1`, `APP2`, ...).
    pub app_id_prefix: String,
}

impl Default for EngineServiceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 2_500,
            app_id_prefix: "APP".to_string(),
        }
    }
}

struct ServiceInner {
    bus: Arc<dyn MessageBus>,
    engine: Arc<MatchingEngine>,
    config: EngineServiceConfig,
    next_app: AtomicUsize,
    /// App ID -> the queue names that client advertised per channel.
    clients: Mutex<HashMap<String, AppInfo>>,
}

pub struct EngineService {
    inner: Arc<ServiceInner>,
}

impl EngineService {
    /// Wires the engine's events into the bus. Callbacks hold a weak
    /// reference so dropping the service unhooks them.
    pub fn new(
        bus: Arc<dyn MessageBus>,
        engine: Arc<MatchingEngine>,
        config: EngineServiceConfig,
    ) -> Self {
        let inner = Arc::new(ServiceInner {
            bus,
            engine: Arc::clone(&engine),
            config,
            next_app: AtomicUsize::new(0),
            clients: Mutex::new(HashMap::new()),
        });

        let weak: Weak<ServiceInner> = Arc::downgrade(&inner);
        engine.on_order_accepted(Arc::new(move |venue, ack| {
            if let Some(inner) = weak.upgrade() {
                inner.publish_event(venue, Channel::LiveBarExecution, MessageKind::NewOrderAck, &ack);
            }
        }));
        let weak = Arc::downgrade(&inner);
        engine.on_order_executed(Arc::new(move |venue, execution| {
            if let Some(inner) = weak.upgrade() {
                inner.publish_event(
                    venue,
                    Channel::LiveBarExecution,
                    MessageKind::Execution,
                    &execution,
                );
            }
        }));
        let weak = Arc::downgrade(&inner);
        engine.on_order_rejected(Arc::new(move |venue, rejection| {
            if let Some(inner) = weak.upgrade() {
                inner.publish_event(
                    venue,
                    Channel::HistoricBarRejection,
                    MessageKind::Rejection,
                    &rejection,
                );
            }
        }));

        Self { inner }
    }

    /// Binds one intake queue per `engine.<channel>.key` parameter. The
    /// admin key is mandatory, the rest are optional.
    pub fn start(&self, params: &ParamStore) -> Result<()> {
        params.require("engine.admin.key")?;
        for channel in Channel::ALL {
            let Some(key) = params.get(&format!("engine.{}.key", channel)) else {
                debug!("No engine intake key for channel {}, skipping", channel);
                continue;
            };
            let queue = format!("engine.{}", channel);
            self.inner.bus.declare_queue(&queue, key)?;
            let inner = Arc::clone(&self.inner);
            self.inner.bus.consume(
                &queue,
                Box::new(move |envelope| inner.handle(envelope)),
            )?;
            info!("Engine intake {} bound to {}", queue, key);
        }
        Ok(())
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.lock().unwrap().len()
    }
}

impl ServiceInner {
    fn handle(&self, envelope: Envelope) {
        match envelope.kind {
            MessageKind::AppIdInquiry => self.handle_inquiry(envelope),
            MessageKind::Heartbeat => self.handle_heartbeat(envelope),
            MessageKind::AppInfo => self.handle_app_info(envelope),
            MessageKind::Login => debug!("Login received"),
            MessageKind::Logout => self.handle_logout(envelope),
            MessageKind::MarketOrder => match envelope.payload_as::<MarketOrder>() {
                Ok(order) => self.engine.submit_market_order(order),
                Err(e) => warn!("Undecodable market order dropped: {}", e),
            },
            MessageKind::LimitOrder => match envelope.payload_as::<LimitOrder>() {
                Ok(order) => self.engine.submit_limit_order(order),
                Err(e) => warn!("Undecodable limit order dropped: {}", e),
            },
            MessageKind::CancelOrder => {
                match envelope.payload.get("order_id").and_then(|v| v.as_str()) {
                    Some(order_id) => self.engine.cancel(order_id),
                    None => warn!("Cancel without order_id dropped"),
                }
            }
            MessageKind::LocateRequest => self.handle_locate(envelope),
            other => debug!("Engine ignores {}", other),
        }
    }

    fn handle_inquiry(&self, envelope: Envelope) {
        let Some(reply_to) = envelope.reply_to else {
            warn!("App-ID inquiry without reply-to dropped");
            return;
        };
        let number = self.next_app.fetch_add(1, Ordering::SeqCst) + 1;
        let app_id = format!("{}{}", self.config.app_id_prefix, number);
        info!("Assigned application ID {} (replies to {})", app_id, reply_to);

        let response = InquiryResponse {
            app_id,
            heartbeat_interval_ms: self.config.heartbeat_interval_ms,
        };
        self.reply(&reply_to, MessageKind::AppIdResponse, &response);
    }

    fn handle_heartbeat(&self, envelope: Envelope) {
        let Some(reply_to) = envelope.reply_to else {
            warn!("Heartbeat without reply-to dropped");
            return;
        };
        self.reply(
            &reply_to,
            MessageKind::HeartbeatResponse,
            &serde_json::json!({ "interval_ms": self.config.heartbeat_interval_ms }),
        );
    }

    fn handle_app_info(&self, envelope: Envelope) {
        match envelope.payload_as::<AppInfo>() {
            Ok(info) => {
                info!(
                    "Client {} registered {} queues",
                    info.app_id,
                    info.queues.len()
                );
                self.clients.lock().unwrap().insert(info.app_id.clone(), info);
            }
            Err(e) => warn!("Undecodable app-info dropped: {}", e),
        }
    }

    fn handle_logout(&self, envelope: Envelope) {
        let Some(app_id) = envelope.payload.get("app_id").and_then(|v| v.as_str()) else {
            warn!("Logout without app_id dropped");
            return;
        };
        info!("Client {} logged out", app_id);
        self.engine.clear_venue(app_id);
        self.clients.lock().unwrap().remove(app_id);
    }

    /// Locates are always approved in simulation.
    fn handle_locate(&self, envelope: Envelope) {
        let Some(reply_to) = envelope.reply_to else {
            warn!("Locate request without reply-to dropped");
            return;
        };
        let mut payload = envelope.payload;
        if let Some(object) = payload.as_object_mut() {
            object.insert("approved".to_string(), serde_json::Value::Bool(true));
        }
        let reply = Envelope::new(MessageKind::LocateResponse, None, payload);
        if let Err(e) = self.bus.publish(&reply_to, &reply) {
            warn!("Locate response publish failed: {:#}", e);
        }
    }

    fn reply<T: serde::Serialize>(&self, reply_to: &str, kind: MessageKind, payload: &T) {
        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not serialize {} reply: {}", kind, e);
                return;
            }
        };
        let envelope = Envelope::new(kind, None, payload);
        if let Err(e) = self.bus.publish(reply_to, &envelope) {
            warn!("Reply {} to {} failed: {:#}", kind, reply_to, e);
        }
    }

    /// Routes one engine event to the queue the owning client advertised
    /// for the channel. Events for unknown venues are dropped.
    fn publish_event<T: serde::Serialize>(
        &self,
        venue: &str,
        channel: Channel,
        kind: MessageKind,
        payload: &T,
    ) {
        let queue = {
            let clients = self.clients.lock().unwrap();
            clients
                .get(venue)
                .and_then(|info| info.queues.get(channel.name()))
                .cloned()
        };
        let Some(queue) = queue else {
            debug!("No client registered for venue {}, {} dropped", venue, kind);
            return;
        };
        let payload = match serde_json::to_value(payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Could not serialize {} event: {}", kind, e);
                return;
            }
        };
        let envelope = Envelope::new(kind, None, payload);
        if let Err(e) = self.bus.publish(&queue, &envelope) {
            warn!("Event {} to {} failed: {:#}", kind, queue, e);
        }
    }
}

/// Raw-channel intake: receive thread -> bounded pipeline -> decode
/// thread -> engine.
pub struct FeedIntake {
    receive: JoinHandle<()>,
    decode: JoinHandle<()>,
}

impl FeedIntake {
    pub fn start(engine: Arc<MatchingEngine>, mut source: Box<dyn FrameSource>) -> Result<Self> {
        let (mut producer, mut consumers) = pipeline::<FrameSlot>(DEFAULT_CAPACITY, 1)?;
        let consumer = consumers.pop().ok_or_else(|| anyhow::anyhow!("pipeline built without consumer"))?;

        let decode = consumer.spawn("feed-decode", move |slot: &FrameSlot, _sequence, _eob| {
            let line = match std::str::from_utf8(&slot.payload) {
                Ok(line) => line,
                Err(_) => {
                    warn!("Non-UTF8 frame on topic {} dropped", slot.topic);
                    return;
                }
            };
            match frame::decode(line) {
                Ok(RawMessage::Tick(tick)) => engine.on_tick(&tick),
                Ok(RawMessage::Bar(bar)) => engine.on_bar(&bar),
                Err(e) => warn!("Bad frame dropped: {}", e),
            }
        })?;

        let receive = std::thread::Builder::new()
            .name("feed-recv".to_string())
            .spawn(move || {
                loop {
                    match source.recv_frame() {
                        Ok((topic, payload)) => {
                            let mut claim = producer.claim();
                            claim.fill(&topic, &payload);
                            claim.publish();
                        }
                        Err(e) => {
                            info!("Feed source closed: {:#}", e);
                            break;
                        }
                    }
                }
                producer.close();
            })?;

        Ok(Self { receive, decode })
    }

    /// Blocks until the feed source closes and the pipeline drains.
    pub fn join(self) {
        let _ = self.receive.join();
        let _ = self.decode.join();
    }
}
