//! Synthetic tick publisher for the raw low-latency channel.
//!
//! Generates a simple random walk per symbol and publishes each update as
//! a pipe-delimited `TICK` frame over a bound PUB socket, the same wire
//! format the exchange simulator's feed intake consumes.

use anyhow::{anyhow, Result};
use clap::Parser;
use log::info;
use middleware_api::model::Tick;
use middleware_core::comms::address::Address;
use middleware_core::comms::frame::{encode_tick, TICK_TAG};
use middleware_core::comms::transport::FrameSink;
use middleware_core::comms::transports::zmq::ZmqFramePublisher;
use rand::Rng;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the feed's PUB socket at.
    #[arg(long, default_value = "tcp://*:5580")]
    address: String,

    /// Comma-separated symbols to generate.
    #[arg(long, default_value = "AAPL,MSFT,TSLA")]
    symbols: String,

    /// Milliseconds between updates (per full symbol sweep).
    #[arg(long, default_value_t = 250)]
    interval_ms: u64,

    /// Starting price for every symbol.
    #[arg(long, default_value_t = 100.0)]
    start_price: f64,

    /// Provider tag stamped on every frame.
    #[arg(long, default_value = "SIMX")]
    provider: String,
}

/// Random walk: +/- 0.5% per step, floored just above zero.
fn step(price: &mut f64) -> f64 {
    let change = rand::thread_rng().gen_range(-0.005..0.005);
    *price *= 1.0 + change;
    if *price < 0.01 {
        *price = 0.01;
    }
    *price
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let address: Address = args.address.parse().map_err(|e| anyhow!("{}", e))?;
    let publisher = ZmqFramePublisher::bind(&address)?;
    let symbols: Vec<String> = args
        .symbols
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let mut prices = vec![args.start_price; symbols.len()];

    info!(
        "Publishing {} symbols at {} every {}ms",
        symbols.len(),
        address,
        args.interval_ms
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = chrono::Utc::now().timestamp_millis();
                let mut rng = rand::thread_rng();
                for (symbol, price) in symbols.iter().zip(prices.iter_mut()) {
                    let last = step(price);
                    let tick = Tick::new(
                        symbol.clone(),
                        last * 0.999,
                        rng.gen_range(100..1_000),
                        last * 1.001,
                        rng.gen_range(100..1_000),
                        last,
                        rng.gen_range(1..500),
                        now,
                        args.provider.clone(),
                    );
                    publisher.send_frame(TICK_TAG, encode_tick(&tick).as_bytes())?;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}
