use super::*;
use chrono::NaiveDate;
use std::sync::Mutex;

/// Collects every event the engine emits, tagged with its venue.
#[derive(Default)]
struct Recorder {
    accepted: Mutex<Vec<(String, NewOrderAck)>>,
    executed: Mutex<Vec<(String, Execution)>>,
    rejected: Mutex<Vec<(String, Rejection)>>,
}

impl Recorder {
    fn wire(recorder: &Arc<Self>, engine: &MatchingEngine) {
        let sink = Arc::clone(recorder);
        engine.on_order_accepted(Arc::new(move |venue, ack| {
            sink.accepted.lock().unwrap().push((venue.to_string(), ack));
        }));
        let sink = Arc::clone(recorder);
        engine.on_order_executed(Arc::new(move |venue, execution| {
            sink.executed
                .lock()
                .unwrap()
                .push((venue.to_string(), execution));
        }));
        let sink = Arc::clone(recorder);
        engine.on_order_rejected(Arc::new(move |venue, rejection| {
            sink.rejected
                .lock()
                .unwrap()
                .push((venue.to_string(), rejection));
        }));
    }

    fn executions(&self) -> Vec<Execution> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    fn rejections(&self) -> Vec<Rejection> {
        self.rejected
            .lock()
            .unwrap()
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }
}

fn setup() -> (MatchingEngine, Arc<Recorder>) {
    let engine = MatchingEngine::default();
    let recorder = Arc::new(Recorder::default());
    Recorder::wire(&recorder, &engine);
    (engine, recorder)
}

fn millis(h: u32, m: u32, s: u32) -> i64 {
    NaiveDate::from_ymd_opt(2024, 3, 5)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
        .and_utc()
        .timestamp_millis()
}

fn tick_at(symbol: &str, last: f64, timestamp: i64) -> Tick {
    Tick::new(symbol, last - 0.02, 300, last + 0.02, 200, last, 100, timestamp, "SIMX")
}

fn market(order_id: &str, symbol: &str, submitted_at: i64) -> MarketOrder {
    MarketOrder::new(order_id, Side::Buy, 100, symbol, "APP1", submitted_at)
}

fn limit(order_id: &str, side: Side, price: f64, submitted_at: i64) -> LimitOrder {
    LimitOrder::new(order_id, side, 100, "AAPL", price, "APP1", submitted_at)
}

#[test]
fn market_order_with_empty_id_is_rejected() {
    let (engine, recorder) = setup();
    engine.submit_market_order(market("", "AAPL", millis(10, 0, 0)));

    let rejections = recorder.rejections();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].reason, "Invalid Price Or Size");
    assert!(recorder.accepted.lock().unwrap().is_empty());
    assert_eq!(engine.resting_count(), 0);
}

#[test]
fn limit_order_with_zero_size_or_price_is_rejected() {
    let (engine, recorder) = setup();

    let mut zero_size = limit("L1", Side::Buy, 150.0, millis(10, 0, 0));
    zero_size.size = 0;
    engine.submit_limit_order(zero_size);
    engine.submit_limit_order(limit("L2", Side::Buy, 0.0, millis(10, 0, 0)));

    let rejections = recorder.rejections();
    assert_eq!(rejections.len(), 2);
    assert!(rejections.iter().all(|r| r.reason == "Invalid Price Or Size"));
    assert_eq!(engine.resting_count(), 0);
}

#[test]
fn valid_orders_are_acknowledged_and_rest() {
    let (engine, recorder) = setup();
    engine.submit_market_order(market("M1", "AAPL", millis(10, 0, 0)));
    engine.submit_limit_order(limit("L1", Side::Buy, 150.0, millis(10, 0, 0)));

    let accepted = recorder.accepted.lock().unwrap();
    assert_eq!(accepted.len(), 2);
    assert_eq!(accepted[0].1.order_id, "M1");
    assert_eq!(accepted[0].0, "APP1");
    assert_eq!(engine.resting_count(), 2);
}

#[test]
fn buy_limit_fills_at_or_below_the_limit() {
    let (engine, recorder) = setup();
    engine.submit_limit_order(limit("L1", Side::Buy, 150.0, millis(10, 0, 0)));

    let ts = millis(10, 0, 5);
    engine.on_tick(&tick_at("AAPL", 149.50, ts));

    let executions = recorder.executions();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].order_id, "L1");
    assert_eq!(executions[0].price, 150.0);
    assert_eq!(executions[0].average_price, 149.50);
    assert_eq!(executions[0].timestamp, ts);
    assert_eq!(engine.resting_count(), 0);

    // A filled order is gone: the same print again produces nothing.
    engine.on_tick(&tick_at("AAPL", 149.50, millis(10, 0, 6)));
    assert_eq!(recorder.executions().len(), 1);
}

#[test]
fn sell_limit_requires_a_print_strictly_above_the_limit() {
    let (engine, recorder) = setup();
    engine.submit_limit_order(limit("S1", Side::Sell, 150.0, millis(10, 0, 0)));

    engine.on_tick(&tick_at("AAPL", 150.0, millis(10, 0, 5)));
    assert!(recorder.executions().is_empty());
    assert_eq!(engine.resting_count(), 1);

    engine.on_tick(&tick_at("AAPL", 150.01, millis(10, 0, 6)));
    let executions = recorder.executions();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].average_price, 150.01);
    assert_eq!(engine.resting_count(), 0);
}

#[test]
fn limit_order_can_fill_against_the_last_recorded_print() {
    let (engine, recorder) = setup();
    engine.on_tick(&tick_at("AAPL", 149.0, millis(10, 0, 0)));

    engine.submit_limit_order(limit("L1", Side::Buy, 150.0, millis(10, 0, 1)));
    let executions = recorder.executions();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].average_price, 149.0);
}

#[test]
fn market_order_fills_at_its_latency_target() {
    let (engine, recorder) = setup();
    // Submitted at second 0: the standard offset targets 10:30:14.
    engine.submit_market_order(market("M1", "AAPL", millis(10, 30, 0)));

    // A print before the target does not fill.
    engine.on_tick(&tick_at("AAPL", 150.0, millis(10, 30, 10)));
    assert!(recorder.executions().is_empty());

    engine.on_tick(&tick_at("AAPL", 150.25, millis(10, 30, 14)));
    let executions = recorder.executions();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].price, 150.25);
    assert_eq!(executions[0].average_price, 150.25);
    assert_eq!(executions[0].timestamp, millis(10, 30, 14));
}

#[test]
fn batching_second_shifts_the_target() {
    let (engine, recorder) = setup();
    // Second 56 is a batching point: the target is +18s, not +14s.
    engine.submit_market_order(market("M1", "AAPL", millis(10, 30, 56)));

    engine.on_tick(&tick_at("AAPL", 150.0, millis(10, 31, 10)));
    assert!(recorder.executions().is_empty());

    engine.on_tick(&tick_at("AAPL", 150.5, millis(10, 31, 14)));
    assert_eq!(recorder.executions().len(), 1);
}

#[test]
fn market_order_probes_forward_in_minute_steps() {
    let (engine, recorder) = setup();
    engine.submit_market_order(market("M1", "AAPL", millis(10, 30, 0)));

    // Nothing at 10:30:14, but a print exactly two minutes later.
    engine.on_tick(&tick_at("AAPL", 151.0, millis(10, 32, 14)));
    let executions = recorder.executions();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].price, 151.0);
    assert_eq!(executions[0].timestamp, millis(10, 32, 14));
}

#[test]
fn market_order_expires_when_the_probe_window_passes() {
    let mut latency = LatencyProfile::default();
    latency.max_probe_minutes = 2;
    let engine = MatchingEngine::new(latency);
    let recorder = Arc::new(Recorder::default());
    Recorder::wire(&recorder, &engine);

    engine.submit_market_order(market("M1", "AAPL", millis(10, 30, 0)));

    // Prints at off-target seconds only; the last one is past the
    // two-minute window, so the order expires instead of waiting.
    engine.on_tick(&tick_at("AAPL", 150.0, millis(10, 31, 30)));
    assert!(recorder.rejections().is_empty());

    engine.on_tick(&tick_at("AAPL", 150.0, millis(10, 35, 30)));
    let rejections = recorder.rejections();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].order_id, "M1");
    assert_eq!(rejections[0].reason, "No Market Data");
    assert_eq!(engine.resting_count(), 0);
}

#[test]
fn history_is_pruned_to_the_probe_window() {
    let mut latency = LatencyProfile::default();
    latency.max_probe_minutes = 2;
    let engine = MatchingEngine::new(latency);

    for minute in 0..60 {
        engine.on_tick(&tick_at("AAPL", 150.0, millis(10, minute, 0)));
    }

    let history = engine.history.lock().unwrap();
    let prints = &history.get("AAPL").unwrap().by_second;
    let latest = millis(10, 59, 0) / 1_000;
    assert_eq!(prints.last_key_value().map(|(&sec, _)| sec), Some(latest));
    assert!(prints.keys().all(|&sec| sec >= latest - 120));
    assert_eq!(prints.len(), 3);
}

#[test]
fn pruning_leaves_the_probe_window_intact_for_resting_orders() {
    let mut latency = LatencyProfile::default();
    latency.max_probe_minutes = 2;
    let engine = MatchingEngine::new(latency);
    let recorder = Arc::new(Recorder::default());
    Recorder::wire(&recorder, &engine);

    // Target 10:00:14; prints before the window edge leave it resting.
    engine.submit_market_order(market("M1", "AAPL", millis(10, 0, 0)));
    engine.on_tick(&tick_at("AAPL", 150.0, millis(10, 0, 30)));
    engine.on_tick(&tick_at("AAPL", 150.0, millis(10, 1, 30)));
    assert!(recorder.executions().is_empty());

    // The last probe second is still reachable after the sweeps above.
    engine.on_tick(&tick_at("AAPL", 150.5, millis(10, 2, 14)));
    let executions = recorder.executions();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].timestamp, millis(10, 2, 14));
}

#[test]
fn cancel_removes_resting_orders_without_events() {
    let (engine, recorder) = setup();
    engine.submit_market_order(market("M1", "AAPL", millis(10, 0, 0)));
    engine.submit_limit_order(limit("L1", Side::Buy, 150.0, millis(10, 0, 0)));

    engine.cancel("M1");
    engine.cancel("L1");
    engine.cancel("never-existed");

    assert_eq!(engine.resting_count(), 0);
    assert!(recorder.executions().is_empty());
    assert!(recorder.rejections().is_empty());
}

#[test]
fn clearing_a_venue_drops_only_its_orders() {
    let (engine, _recorder) = setup();
    engine.submit_market_order(market("M1", "AAPL", millis(10, 0, 0)));
    let mut other = limit("L1", Side::Buy, 150.0, millis(10, 0, 0));
    other.venue = "APP2".to_string();
    engine.submit_limit_order(other);

    engine.clear_venue("APP1");
    assert_eq!(engine.resting_count(), 1);
}

#[test]
fn bars_match_limits_through_their_close() {
    let (engine, recorder) = setup();
    engine.submit_limit_order(limit("L1", Side::Buy, 150.0, millis(10, 0, 0)));

    let bar = Bar {
        open: 151.0,
        high: 151.5,
        low: 149.0,
        close: 149.25,
        volume: 10_000,
        symbol: "AAPL".to_string(),
        timestamp: millis(10, 1, 0),
        provider: "SIMX".to_string(),
        request_id: String::new(),
    };
    engine.on_bar(&bar);

    let executions = recorder.executions();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].average_price, 149.25);
}
