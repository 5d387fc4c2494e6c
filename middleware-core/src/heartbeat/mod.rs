//! Per-connection liveness state machine.
//!
//! Two independent timers: a periodic send timer that raises
//! `HeartbeatDue` with the payload to publish, and a one-shot validation
//! timer armed to `server_interval + grace` that is stopped and restarted
//! every time a heartbeat response arrives. If the validation timer ever
//! fires uninterrupted the monitor stops both timers and raises
//! `ConnectionLost` exactly once.
//!
//! Timer callbacks run on the tokio runtime captured at construction, so
//! `on_response_received` may be called from any thread; resets are
//! serialized through one mutex.

use log::{error, warn};
use middleware_api::model::HeartbeatPayload;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Grace period added to the server's heartbeat interval before the
/// connection is declared dead.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(10_000);

pub type DueCallback = Arc<dyn Fn(HeartbeatPayload) + Send + Sync>;
pub type LostCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Active,
    /// At least one response has arrived; the validation timer is armed.
    AwaitingValidation,
}

struct Timers {
    state: MonitorState,
    send_task: Option<JoinHandle<()>>,
    validation_task: Option<JoinHandle<()>>,
    /// Incremented on every validation reset; an expiring timer only
    /// counts if its generation is still current.
    generation: u64,
}

struct Inner {
    timers: Mutex<Timers>,
    on_due: Mutex<Option<DueCallback>>,
    on_lost: Mutex<Option<LostCallback>>,
    lost_fired: AtomicBool,
    grace: Duration,
    runtime: Handle,
}

pub struct HeartbeatMonitor {
    inner: Arc<Inner>,
}

impl HeartbeatMonitor {
    /// Must be called from within a tokio runtime; timers are spawned on
    /// the runtime current at construction.
    pub fn new(grace: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                timers: Mutex::new(Timers {
                    state: MonitorState::Idle,
                    send_task: None,
                    validation_task: None,
                    generation: 0,
                }),
                on_due: Mutex::new(None),
                on_lost: Mutex::new(None),
                lost_fired: AtomicBool::new(false),
                grace,
                runtime: Handle::current(),
            }),
        }
    }

    /// Registers the `HeartbeatDue` callback. At most one subscriber: a
    /// second registration is ignored with a warning.
    pub fn on_heartbeat_due(&self, callback: DueCallback) {
        let mut slot = self.inner.on_due.lock().unwrap();
        if slot.is_some() {
            warn!("HeartbeatDue already has a subscriber, ignoring");
            return;
        }
        *slot = Some(callback);
    }

    /// Registers the `ConnectionLost` callback. At most one subscriber.
    pub fn on_connection_lost(&self, callback: LostCallback) {
        let mut slot = self.inner.on_lost.lock().unwrap();
        if slot.is_some() {
            warn!("ConnectionLost already has a subscriber, ignoring");
            return;
        }
        *slot = Some(callback);
    }

    pub fn state(&self) -> MonitorState {
        self.inner.timers.lock().unwrap().state
    }

    /// Arms the periodic send timer. The first `HeartbeatDue` fires
    /// immediately, then every `interval`.
    pub fn start(&self, app_id: &str, interval: Duration) {
        let mut timers = self.inner.timers.lock().unwrap();
        Self::halt(&mut timers);
        self.inner.lost_fired.store(false, Ordering::Release);
        timers.state = MonitorState::Active;

        let inner = Arc::clone(&self.inner);
        let payload = HeartbeatPayload {
            app_id: app_id.to_string(),
            interval_ms: interval.as_millis() as u64,
        };
        timers.send_task = Some(self.inner.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let callback = inner.on_due.lock().unwrap().clone();
                if let Some(callback) = callback {
                    let beat = payload.clone();
                    // A failing publish must not stop the periodic send.
                    if catch_unwind(AssertUnwindSafe(|| callback(beat))).is_err() {
                        error!("Heartbeat publish failed, keeping send timer alive");
                    }
                }
            }
        }));
    }

    /// Resets the validation timer to `server_interval + grace`.
    ///
    /// Stop-then-restart is atomic with respect to concurrent calls and
    /// to an about-to-fire timeout: both go through the timer mutex and
    /// the generation counter.
    pub fn on_response_received(&self, server_interval: Duration) {
        let mut timers = self.inner.timers.lock().unwrap();
        if timers.state == MonitorState::Idle {
            return;
        }
        if let Some(task) = timers.validation_task.take() {
            task.abort();
        }
        timers.generation += 1;
        timers.state = MonitorState::AwaitingValidation;

        let generation = timers.generation;
        let timeout = server_interval + self.inner.grace;
        let inner = Arc::clone(&self.inner);
        timers.validation_task = Some(self.inner.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            Inner::expire(&inner, generation);
        }));
    }

    /// Stops both timers without raising `ConnectionLost`.
    pub fn stop(&self) {
        let mut timers = self.inner.timers.lock().unwrap();
        Self::halt(&mut timers);
    }

    fn halt(timers: &mut Timers) {
        if let Some(task) = timers.send_task.take() {
            task.abort();
        }
        if let Some(task) = timers.validation_task.take() {
            task.abort();
        }
        timers.generation += 1;
        timers.state = MonitorState::Idle;
    }
}

impl Inner {
    /// Validation timer elapsed without a reset: tear the monitor down
    /// and raise `ConnectionLost` exactly once.
    fn expire(inner: &Arc<Inner>, generation: u64) {
        {
            let mut timers = inner.timers.lock().unwrap();
            if timers.generation != generation {
                // A response arrived while we were waking up.
                return;
            }
            HeartbeatMonitor::halt(&mut timers);
        }
        if !inner.lost_fired.swap(true, Ordering::AcqRel) {
            let callback = inner.on_lost.lock().unwrap().clone();
            if let Some(callback) = callback {
                callback();
            }
        }
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        if let Ok(mut timers) = self.inner.timers.lock() {
            Self::halt(&mut timers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counters() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)))
    }

    #[tokio::test(start_paused = true)]
    async fn due_fires_periodically() {
        let monitor = HeartbeatMonitor::new(DEFAULT_GRACE);
        let (beats, _) = counters();
        let sink = Arc::clone(&beats);
        monitor.on_heartbeat_due(Arc::new(move |payload| {
            assert_eq!(payload.app_id, "APP1");
            sink.fetch_add(1, Ordering::SeqCst);
        }));

        monitor.start("APP1", Duration::from_millis(1000));
        assert_eq!(monitor.state(), MonitorState::Active);

        // First beat is immediate, then one per interval.
        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(beats.load(Ordering::SeqCst), 4);

        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn steady_responses_keep_connection_alive() {
        let monitor = HeartbeatMonitor::new(Duration::from_millis(500));
        let (_, losses) = counters();
        let sink = Arc::clone(&losses);
        monitor.on_connection_lost(Arc::new(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        }));

        monitor.start("APP1", Duration::from_millis(1000));
        // Respond every second; timeout would be 1000 + 500 ms.
        for _ in 0..10 {
            monitor.on_response_received(Duration::from_millis(1000));
            tokio::time::sleep(Duration::from_millis(1000)).await;
        }
        assert_eq!(losses.load(Ordering::SeqCst), 0);
        assert_eq!(monitor.state(), MonitorState::AwaitingValidation);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn silence_fires_connection_lost_exactly_once() {
        let monitor = HeartbeatMonitor::new(Duration::from_millis(500));
        let (_, losses) = counters();
        let sink = Arc::clone(&losses);
        monitor.on_connection_lost(Arc::new(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        }));

        monitor.start("APP1", Duration::from_millis(1000));
        monitor.on_response_received(Duration::from_millis(1000));

        // No further responses: 1000 + 500 ms later the session is dead.
        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert_eq!(losses.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(losses.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.state(), MonitorState::Idle);

        // Idle monitor ignores late responses and never fires again.
        monitor.on_response_received(Duration::from_millis(1000));
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(losses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_timeout() {
        let monitor = HeartbeatMonitor::new(Duration::from_millis(500));
        let (_, losses) = counters();
        let sink = Arc::clone(&losses);
        monitor.on_connection_lost(Arc::new(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        }));

        monitor.start("APP1", Duration::from_millis(1000));
        monitor.on_response_received(Duration::from_millis(1000));
        monitor.stop();

        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(losses.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_due_callback_keeps_the_send_timer_alive() {
        let monitor = HeartbeatMonitor::new(DEFAULT_GRACE);
        let (beats, _) = counters();
        let sink = Arc::clone(&beats);
        monitor.on_heartbeat_due(Arc::new(move |_| {
            // First publish blows up; the timer must keep ticking.
            if sink.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("publish failed");
            }
        }));

        monitor.start("APP1", Duration::from_millis(1000));
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(beats.load(Ordering::SeqCst), 3);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn second_subscriber_is_ignored() {
        let monitor = HeartbeatMonitor::new(DEFAULT_GRACE);
        let (beats, _) = counters();

        let first = Arc::clone(&beats);
        monitor.on_heartbeat_due(Arc::new(move |_| {
            first.fetch_add(1, Ordering::SeqCst);
        }));
        // The event slot holds at most one subscriber.
        monitor.on_heartbeat_due(Arc::new(|_| panic!("must never be called")));

        monitor.start("APP1", Duration::from_millis(1000));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(beats.load(Ordering::SeqCst) >= 1);
        monitor.stop();
    }
}
