use anyhow::{anyhow, Result};
use clap::Parser;
use exchange_sim::engine::MatchingEngine;
use exchange_sim::latency::LatencyProfile;
use exchange_sim::service::{EngineService, EngineServiceConfig, FeedIntake};
use log::info;
use middleware_core::comms::address::Address;
use middleware_core::comms::transports::zmq::{ZmqBus, ZmqFrameSubscriber};
use middleware_core::comms::MessageBus;
use middleware_core::config::ParamStore;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the engine's PUB socket at.
    #[arg(long, default_value = "tcp://*:5560")]
    pub_address: String,

    /// The clients' PUB address to consume requests from.
    #[arg(long, default_value = "tcp://localhost:5561")]
    peer_address: String,

    /// The raw tick/bar feed's PUB address (SUB side).
    #[arg(long, default_value = "tcp://localhost:5580")]
    feed_address: String,

    /// Routing parameter file (flat JSON object of key -> value).
    #[arg(long)]
    params: PathBuf,

    /// Heartbeat interval handed to clients, in milliseconds.
    #[arg(long, default_value_t = 2_500)]
    heartbeat_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let params = ParamStore::from_file(&args.params)?;
    let pub_address: Address = args.pub_address.parse().map_err(|e| anyhow!("{}", e))?;
    let peer_address: Address = args.peer_address.parse().map_err(|e| anyhow!("{}", e))?;
    let feed_address: Address = args.feed_address.parse().map_err(|e| anyhow!("{}", e))?;

    let bus = Arc::new(ZmqBus::new(&pub_address, &peer_address)?);
    let engine = Arc::new(MatchingEngine::new(LatencyProfile::default()));

    let service = EngineService::new(
        bus.clone(),
        engine.clone(),
        EngineServiceConfig {
            heartbeat_interval_ms: args.heartbeat_interval_ms,
            ..EngineServiceConfig::default()
        },
    );
    service.start(&params)?;

    let feed = ZmqFrameSubscriber::connect(&feed_address, "")?;
    let _intake = FeedIntake::start(engine, Box::new(feed))?;

    info!(
        "Exchange simulator up: bus {} <- {}, feed {}",
        pub_address, peer_address, feed_address
    );
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    bus.shutdown();
    Ok(())
}
