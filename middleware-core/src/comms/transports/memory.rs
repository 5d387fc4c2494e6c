//! In-process transports for tests and single-process wiring.
//!
//! `MemoryBus` is a broker living on its own router thread so publishes
//! never re-enter the caller's stack; `MemoryHub` fans raw frames out to
//! prefix-filtered sources, mirroring ZMQ topic subscriptions.

use crate::comms::bus::{BusHandler, MessageBus};
use crate::comms::envelope::Envelope;
use crate::comms::transport::{FrameSink, FrameSource};
use anyhow::{Context, Result};
use log::warn;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

type SharedHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

struct QueueState {
    routing_key: String,
    handler: Option<SharedHandler>,
}

struct BusShared {
    queues: Mutex<HashMap<String, QueueState>>,
    running: AtomicBool,
}

/// An in-process message bus. Cloning yields another handle on the same
/// broker, so a client session and an engine endpoint can share one bus
/// inside a single process.
#[derive(Clone)]
pub struct MemoryBus {
    shared: Arc<BusShared>,
    tx: Arc<Mutex<mpsc::Sender<(String, Envelope)>>>,
    router: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        let shared = Arc::new(BusShared {
            queues: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
        });
        let (tx, rx) = mpsc::channel::<(String, Envelope)>();

        let router_shared = Arc::clone(&shared);
        let router = std::thread::Builder::new()
            .name("memory-bus-router".to_string())
            .spawn(move || {
                while router_shared.running.load(Ordering::Relaxed) {
                    let (routing_key, envelope) = match rx.recv_timeout(Duration::from_millis(10))
                    {
                        Ok(frame) => frame,
                        Err(mpsc::RecvTimeoutError::Timeout) => continue,
                        Err(mpsc::RecvTimeoutError::Disconnected) => break,
                    };

                    // Collect matching handlers under the lock, invoke outside
                    // it so handlers may publish without deadlocking.
                    let handlers: Vec<SharedHandler> = {
                        let queues = router_shared.queues.lock().unwrap();
                        queues
                            .values()
                            .filter(|q| routing_key.starts_with(&q.routing_key))
                            .filter_map(|q| q.handler.clone())
                            .collect()
                    };
                    for handler in handlers {
                        handler(envelope.clone());
                    }
                }
            })
            .expect("Failed to spawn memory bus router");

        Self {
            shared,
            tx: Arc::new(Mutex::new(tx)),
            router: Arc::new(Mutex::new(Some(router))),
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for MemoryBus {
    fn declare_queue(&self, queue: &str, routing_key: &str) -> Result<()> {
        let mut queues = self.shared.queues.lock().unwrap();
        let state = queues.entry(queue.to_string()).or_insert_with(|| QueueState {
            routing_key: routing_key.to_string(),
            handler: None,
        });
        state.routing_key = routing_key.to_string();
        Ok(())
    }

    fn publish(&self, routing_key: &str, envelope: &Envelope) -> Result<()> {
        self.tx
            .lock()
            .unwrap()
            .send((routing_key.to_string(), envelope.clone()))
            .context("Memory bus router is gone")
    }

    fn consume(&self, queue: &str, handler: BusHandler) -> Result<()> {
        let mut queues = self.shared.queues.lock().unwrap();
        let state = queues
            .get_mut(queue)
            .with_context(|| format!("Queue '{}' was never declared", queue))?;
        if state.handler.is_some() {
            warn!("Queue '{}' already has a consumer, replacing it", queue);
        }
        state.handler = Some(Arc::from(handler));
        Ok(())
    }

    fn shutdown(&self) {
        self.shared.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.router.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

type FrameSubscribers = Arc<Mutex<Vec<(String, mpsc::Sender<(String, Vec<u8>)>)>>>;

/// Fan-out hub for raw `(topic, payload)` frames, the in-memory stand-in
/// for the low-latency tick/bar channel.
#[derive(Clone, Default)]
pub struct MemoryHub {
    subscribers: FrameSubscribers,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink publishing into this hub.
    pub fn sink(&self) -> MemoryFrameSink {
        MemoryFrameSink {
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// A source receiving every frame whose topic starts with `prefix`.
    pub fn source(&self, prefix: &str) -> MemoryFrameSource {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap()
            .push((prefix.to_string(), tx));
        MemoryFrameSource { rx }
    }
}

pub struct MemoryFrameSink {
    subscribers: FrameSubscribers,
}

impl FrameSink for MemoryFrameSink {
    fn send_frame(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let mut subscribers = self.subscribers.lock().unwrap();
        // Drop subscribers whose source has been closed.
        subscribers.retain(|(prefix, tx)| {
            if topic.starts_with(prefix.as_str()) {
                tx.send((topic.to_string(), payload.to_vec())).is_ok()
            } else {
                true
            }
        });
        Ok(())
    }
}

pub struct MemoryFrameSource {
    rx: mpsc::Receiver<(String, Vec<u8>)>,
}

impl FrameSource for MemoryFrameSource {
    fn recv_frame(&mut self) -> Result<(String, Vec<u8>)> {
        self.rx.recv().context("Memory frame channel closed")
    }

    fn try_recv_frame(&mut self) -> Result<Option<(String, Vec<u8>)>> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => {
                anyhow::bail!("Memory frame channel closed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use middleware_api::model::MessageKind;
    use std::time::Instant;

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn routes_by_bound_key() {
        let bus = MemoryBus::new();
        let received = Arc::new(Mutex::new(Vec::new()));

        bus.declare_queue("q.admin", "client.admin").unwrap();
        let sink = Arc::clone(&received);
        bus.consume(
            "q.admin",
            Box::new(move |env| sink.lock().unwrap().push(env.kind)),
        )
        .unwrap();

        let env = Envelope::new(MessageKind::Heartbeat, None, serde_json::Value::Null);
        bus.publish("client.admin", &env).unwrap();
        bus.publish("client.other", &env).unwrap();

        wait_for(|| !received.lock().unwrap().is_empty());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(&*received.lock().unwrap(), &[MessageKind::Heartbeat]);
        bus.shutdown();
    }

    #[test]
    fn hub_filters_by_prefix() {
        let hub = MemoryHub::new();
        let mut ticks = hub.source("TICK");
        let sink = hub.sink();

        sink.send_frame("TICK", b"payload-a").unwrap();
        sink.send_frame("BAR", b"payload-b").unwrap();

        let (topic, payload) = ticks.recv_frame().unwrap();
        assert_eq!(topic, "TICK");
        assert_eq!(payload, b"payload-a");
        assert!(ticks.try_recv_frame().unwrap().is_none());
    }
}
