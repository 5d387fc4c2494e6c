//! Single-process end-to-end demo.
//!
//! Runs the exchange simulator and one client session over the in-memory
//! transports: handshake, heartbeats, a tick feed and a couple of orders,
//! with every event logged as it flows back.

use anyhow::Result;
use log::{info, warn};
use middleware_api::model::{
    Execution, LimitOrder, MarketOrder, MessageKind, NewOrderAck, Rejection, Side, Tick,
};
use middleware_core::comms::frame::{encode_tick, TICK_TAG};
use middleware_core::comms::transport::FrameSink;
use middleware_core::comms::transports::memory::{MemoryBus, MemoryHub};
use middleware_core::comms::MessageBus;
use middleware_core::config::ParamStore;
use middleware_core::session::{SessionConfig, SessionController, SessionState};
use exchange_sim::engine::MatchingEngine;
use exchange_sim::service::{EngineService, EngineServiceConfig, FeedIntake};
use std::sync::Arc;
use std::time::Duration;

fn params() -> ParamStore {
    ParamStore::from_iter([
        ("client.inquiry.key", "client.inquiry.response"),
        ("engine.admin.key", "engine.admin.request"),
        ("client.admin.key", "client.admin.response"),
        ("engine.tick_order.key", "engine.order.request"),
        ("client.tick_order.key", "client.tick.stream"),
        ("engine.livebar_execution.key", "engine.execution.request"),
        ("client.livebar_execution.key", "client.execution.stream"),
        ("engine.historicbar_rejection.key", "engine.historic.request"),
        ("client.historicbar_rejection.key", "client.rejection.stream"),
        ("engine.locate.key", "engine.locate.request"),
        ("client.locate.key", "client.locate.stream"),
    ])
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) -> Result<()> {
    for _ in 0..400 {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    anyhow::bail!("timed out waiting for {}", what)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let bus = Arc::new(MemoryBus::new());
    let hub = MemoryHub::new();

    // Engine side.
    let engine = Arc::new(MatchingEngine::default());
    let service = EngineService::new(bus.clone(), engine.clone(), EngineServiceConfig::default());
    service.start(&params())?;
    let intake = FeedIntake::start(engine, Box::new(hub.source("")))?;

    // Client side.
    let session = SessionController::new(
        bus.clone(),
        params(),
        SessionConfig {
            engine: "exchange-sim".to_string(),
            grace: Duration::from_secs(10),
        },
    )?;
    session.on_server_connected(Arc::new(|app_id| {
        info!("Connected as {}", app_id);
    }));
    session.on_server_disconnected(Arc::new(|| {
        info!("Disconnected");
    }));
    session.register_response_handler(
        MessageKind::NewOrderAck,
        Arc::new(|envelope| match envelope.payload_as::<NewOrderAck>() {
            Ok(ack) => info!("Accepted order {}", ack.order_id),
            Err(e) => warn!("Bad ack: {}", e),
        }),
    );
    session.register_response_handler(
        MessageKind::Execution,
        Arc::new(|envelope| match envelope.payload_as::<Execution>() {
            Ok(fill) => info!(
                "Filled {} x{} at {} (avg {})",
                fill.order_id, fill.size, fill.price, fill.average_price
            ),
            Err(e) => warn!("Bad execution: {}", e),
        }),
    );
    session.register_response_handler(
        MessageKind::Rejection,
        Arc::new(|envelope| match envelope.payload_as::<Rejection>() {
            Ok(rejection) => info!("Rejected {}: {}", rejection.order_id, rejection.reason),
            Err(e) => warn!("Bad rejection: {}", e),
        }),
    );

    session.start();
    wait_for("handshake", || session.state() == SessionState::Connected).await?;
    let app_id = session
        .app_id()
        .ok_or_else(|| anyhow::anyhow!("connected without app id"))?;

    // One marketable limit, one resting market order, one invalid order.
    let submitted_at = chrono::Utc::now().timestamp_millis();
    session.send(
        MessageKind::LimitOrder,
        serde_json::to_value(LimitOrder::new(
            "DEMO-L1", Side::Buy, 100, "AAPL", 100.50, app_id.clone(), submitted_at,
        ))?,
    );
    session.send(
        MessageKind::MarketOrder,
        serde_json::to_value(MarketOrder::new(
            "DEMO-M1", Side::Buy, 50, "AAPL", app_id.clone(), submitted_at,
        ))?,
    );
    session.send(
        MessageKind::LimitOrder,
        serde_json::to_value(LimitOrder::new(
            "DEMO-BAD", Side::Sell, 0, "AAPL", 100.0, app_id.clone(), submitted_at,
        ))?,
    );

    // Replay twenty seconds of prints in one burst; the market order's
    // latency target falls inside the window.
    let sink = hub.sink();
    for i in 0..=20i64 {
        let last = 100.0 - 0.02 * i as f64;
        let tick = Tick::new(
            "AAPL",
            last - 0.02,
            300,
            last + 0.02,
            200,
            last,
            100,
            submitted_at + i * 1_000,
            "SIMX",
        );
        sink.send_frame(TICK_TAG, encode_tick(&tick).as_bytes())?;
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    session.shutdown();
    bus.shutdown();
    drop(sink);
    drop(hub);
    intake.join();
    Ok(())
}
