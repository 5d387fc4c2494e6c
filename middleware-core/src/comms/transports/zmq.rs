//! ZMQ-backed transports.
//!
//! PUB/SUB sockets with topic-prefix filtering carry both the control
//! plane (topic = routing key, payload = JSON envelope) and the raw
//! tick/bar channel (topic = frame tag, payload = delimited text).
//! Sockets sit behind a `Mutex` because `zmq::Socket` is not thread-safe.

use crate::comms::address::Address;
use crate::comms::bus::{BusHandler, MessageBus};
use crate::comms::envelope::Envelope;
use crate::comms::transport::{FrameSink, FrameSource};
use anyhow::{bail, Context as AnyhowContext, Result};
use log::{error, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use zmq::{Context as ZmqContext, Socket, SocketType};

fn zmq_endpoint(address: &Address) -> Result<&str> {
    match address {
        Address::Zmq(endpoint) => Ok(endpoint),
        other => bail!("ZMQ transport requires a zmq address, got {}", other),
    }
}

/// A thread-safe ZMQ PUB wrapper implementing `FrameSink`.
pub struct ZmqFramePublisher {
    socket: Mutex<Socket>,
}

impl ZmqFramePublisher {
    /// Binds a PUB socket at `address`.
    pub fn bind(address: &Address) -> Result<Self> {
        let endpoint = zmq_endpoint(address)?;
        let context = ZmqContext::new();
        let socket = context.socket(SocketType::PUB)?;
        socket.bind(endpoint)?;
        Ok(Self {
            socket: Mutex::new(socket),
        })
    }
}

impl FrameSink for ZmqFramePublisher {
    fn send_frame(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let socket = self.socket.lock().unwrap();
        // ZMQ is fast enough that we can use the blocking call inside the lock
        socket
            .send_multipart(&[topic.as_bytes(), payload], 0)
            .context("Failed to send ZMQ frame")
    }
}

/// A ZMQ SUB wrapper implementing `FrameSource`.
pub struct ZmqFrameSubscriber {
    socket: Socket,
}

impl ZmqFrameSubscriber {
    /// Connects a SUB socket to `address` filtered on `topic_prefix`
    /// (empty prefix subscribes to everything).
    pub fn connect(address: &Address, topic_prefix: &str) -> Result<Self> {
        let endpoint = zmq_endpoint(address)?;
        let context = ZmqContext::new();
        let socket = context.socket(SocketType::SUB)?;
        socket.connect(endpoint)?;
        socket.set_subscribe(topic_prefix.as_bytes())?;
        Ok(Self { socket })
    }

    fn split(mut parts: Vec<Vec<u8>>) -> Result<(String, Vec<u8>)> {
        if parts.len() != 2 {
            bail!("Expected 2-part frame, got {} parts", parts.len());
        }
        let payload = parts.pop().unwrap_or_default();
        let topic = String::from_utf8(parts.pop().unwrap_or_default())
            .context("Frame topic is not UTF-8")?;
        Ok((topic, payload))
    }
}

impl FrameSource for ZmqFrameSubscriber {
    fn recv_frame(&mut self) -> Result<(String, Vec<u8>)> {
        let parts = self
            .socket
            .recv_multipart(0)
            .context("Failed to receive ZMQ frame")?;
        Self::split(parts)
    }

    fn try_recv_frame(&mut self) -> Result<Option<(String, Vec<u8>)>> {
        match self.socket.recv_multipart(zmq::DONTWAIT) {
            Ok(parts) => Ok(Some(Self::split(parts)?)),
            Err(zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(e).context("Failed to receive ZMQ frame"),
        }
    }
}

/// The control-plane bus over ZMQ.
///
/// Publishes on a locally bound PUB socket; every consumed queue gets its
/// own SUB socket subscribed to the queue's bound routing key, serviced by
/// a dedicated polling thread. Shutdown is cooperative: loops observe the
/// running flag between frames.
pub struct ZmqBus {
    publisher: ZmqFramePublisher,
    peer: Address,
    queues: Mutex<HashMap<String, String>>,
    running: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ZmqBus {
    /// # Arguments
    ///
    /// * `pub_address` - Local address to bind the PUB socket at.
    /// * `peer` - The remote party's PUB address to consume from.
    pub fn new(pub_address: &Address, peer: &Address) -> Result<Self> {
        Ok(Self {
            publisher: ZmqFramePublisher::bind(pub_address)?,
            peer: peer.clone(),
            queues: Mutex::new(HashMap::new()),
            running: Arc::new(AtomicBool::new(true)),
            threads: Mutex::new(Vec::new()),
        })
    }
}

impl MessageBus for ZmqBus {
    fn declare_queue(&self, queue: &str, routing_key: &str) -> Result<()> {
        self.queues
            .lock()
            .unwrap()
            .insert(queue.to_string(), routing_key.to_string());
        Ok(())
    }

    fn publish(&self, routing_key: &str, envelope: &Envelope) -> Result<()> {
        self.publisher.send_frame(routing_key, &envelope.encode())
    }

    fn consume(&self, queue: &str, handler: BusHandler) -> Result<()> {
        let routing_key = self
            .queues
            .lock()
            .unwrap()
            .get(queue)
            .cloned()
            .with_context(|| format!("Queue '{}' was never declared", queue))?;

        let mut subscriber = ZmqFrameSubscriber::connect(&self.peer, &routing_key)?;
        let running = Arc::clone(&self.running);
        let queue_name = queue.to_string();

        let handle = std::thread::Builder::new()
            .name(format!("bus-{}", queue_name))
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    match subscriber.try_recv_frame() {
                        Ok(Some((_topic, payload))) => match Envelope::decode(&payload) {
                            Ok(envelope) => handler(envelope),
                            Err(e) => {
                                // Protocol error: skip the frame, keep the queue alive.
                                error!("Queue '{}': malformed envelope: {}", queue_name, e);
                            }
                        },
                        Ok(None) => std::thread::sleep(Duration::from_millis(1)),
                        Err(e) => {
                            warn!("Queue '{}': receive failed: {}", queue_name, e);
                            std::thread::sleep(Duration::from_millis(10));
                        }
                    }
                }
            })
            .context("Failed to spawn bus consumer thread")?;

        self.threads.lock().unwrap().push(handle);
        Ok(())
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
        for handle in self.threads.lock().unwrap().drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for ZmqBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}
