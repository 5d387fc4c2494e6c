//! Raw low-latency channel codec.
//!
//! Ticks and bars fan out as pipe-delimited text lines,
//! `TAG|field,field,...`, with the timestamp rendered as
//! `M/d/yyyy h:mm:ss.fff tt` (e.g. `3/5/2024 2:31:05.250 PM`). On the
//! wire the frame topic carries the tag again so subscribers can filter
//! by prefix without touching the payload.
//!
//! Tick fields: bid, bid_size, ask, ask_size, last, last_size, symbol,
//! timestamp, provider.
//! Bar fields: open, high, low, close, volume, symbol, timestamp,
//! provider, request_id.

use chrono::{DateTime, NaiveDateTime};
use middleware_api::model::{Bar, Tick};
use thiserror::Error;

pub const TICK_TAG: &str = "TICK";
pub const BAR_TAG: &str = "BAR";

const TIMESTAMP_PARSE: &str = "%m/%d/%Y %I:%M:%S%.3f %p";
const TIMESTAMP_FORMAT: &str = "%-m/%-d/%Y %-I:%M:%S%.3f %p";

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame has no tag separator: {0}")]
    MissingTag(String),
    #[error("Unknown frame tag: {0}")]
    UnknownTag(String),
    #[error("Expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },
    #[error("Bad numeric field '{0}'")]
    BadNumber(String),
    #[error("Bad timestamp '{0}'")]
    BadTimestamp(String),
}

/// A decoded raw-channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMessage {
    Tick(Tick),
    Bar(Bar),
}

fn format_timestamp(millis: i64) -> String {
    match DateTime::from_timestamp_millis(millis) {
        Some(dt) => dt.naive_utc().format(TIMESTAMP_FORMAT).to_string(),
        None => String::new(),
    }
}

fn parse_timestamp(field: &str) -> Result<i64, FrameError> {
    let naive = NaiveDateTime::parse_from_str(field, TIMESTAMP_PARSE)
        .map_err(|_| FrameError::BadTimestamp(field.to_string()))?;
    Ok(naive.and_utc().timestamp_millis())
}

fn parse_f64(field: &str) -> Result<f64, FrameError> {
    field
        .parse()
        .map_err(|_| FrameError::BadNumber(field.to_string()))
}

fn parse_u64(field: &str) -> Result<u64, FrameError> {
    field
        .parse()
        .map_err(|_| FrameError::BadNumber(field.to_string()))
}

pub fn encode_tick(tick: &Tick) -> String {
    format!(
        "{}|{},{},{},{},{},{},{},{},{}",
        TICK_TAG,
        tick.bid,
        tick.bid_size,
        tick.ask,
        tick.ask_size,
        tick.last,
        tick.last_size,
        tick.symbol,
        format_timestamp(tick.timestamp),
        tick.provider,
    )
}

pub fn encode_bar(bar: &Bar) -> String {
    format!(
        "{}|{},{},{},{},{},{},{},{},{}",
        BAR_TAG,
        bar.open,
        bar.high,
        bar.low,
        bar.close,
        bar.volume,
        bar.symbol,
        format_timestamp(bar.timestamp),
        bar.provider,
        bar.request_id,
    )
}

/// Parses one full frame line (`TAG|fields`).
pub fn decode(frame: &str) -> Result<RawMessage, FrameError> {
    let (tag, payload) = frame
        .split_once('|')
        .ok_or_else(|| FrameError::MissingTag(frame.to_string()))?;
    match tag {
        TICK_TAG => decode_tick_fields(payload).map(RawMessage::Tick),
        BAR_TAG => decode_bar_fields(payload).map(RawMessage::Bar),
        other => Err(FrameError::UnknownTag(other.to_string())),
    }
}

fn split_fields(payload: &str, expected: usize) -> Result<Vec<&str>, FrameError> {
    let fields: Vec<&str> = payload.split(',').collect();
    if fields.len() != expected {
        return Err(FrameError::FieldCount {
            expected,
            actual: fields.len(),
        });
    }
    Ok(fields)
}

fn decode_tick_fields(payload: &str) -> Result<Tick, FrameError> {
    let f = split_fields(payload, 9)?;
    Ok(Tick {
        bid: parse_f64(f[0])?,
        bid_size: parse_u64(f[1])?,
        ask: parse_f64(f[2])?,
        ask_size: parse_u64(f[3])?,
        last: parse_f64(f[4])?,
        last_size: parse_u64(f[5])?,
        symbol: f[6].to_string(),
        timestamp: parse_timestamp(f[7])?,
        provider: f[8].to_string(),
    })
}

fn decode_bar_fields(payload: &str) -> Result<Bar, FrameError> {
    let f = split_fields(payload, 9)?;
    Ok(Bar {
        open: parse_f64(f[0])?,
        high: parse_f64(f[1])?,
        low: parse_f64(f[2])?,
        close: parse_f64(f[3])?,
        volume: parse_u64(f[4])?,
        symbol: f[5].to_string(),
        timestamp: parse_timestamp(f[6])?,
        provider: f[7].to_string(),
        request_id: f[8].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn millis(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, ms: u32) -> i64 {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_milli_opt(h, mi, s, ms)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    #[test]
    fn tick_line_format() {
        let tick = Tick::new(
            "AAPL",
            149.98,
            300,
            150.02,
            200,
            150.0,
            100,
            millis(2024, 3, 5, 14, 31, 5, 250),
            "SIMX",
        );
        let line = encode_tick(&tick);
        assert_eq!(
            line,
            "TICK|149.98,300,150.02,200,150,100,AAPL,3/5/2024 2:31:05.250 PM,SIMX"
        );
        assert_eq!(decode(&line).unwrap(), RawMessage::Tick(tick));
    }

    #[test]
    fn bar_line_format() {
        let bar = Bar {
            open: 100.0,
            high: 101.5,
            low: 99.75,
            close: 101.0,
            volume: 12_000,
            symbol: "MSFT".into(),
            timestamp: millis(2024, 3, 5, 9, 30, 0, 0),
            provider: "SIMX".into(),
            request_id: "HB-42".into(),
        };
        let line = encode_bar(&bar);
        assert_eq!(
            line,
            "BAR|100,101.5,99.75,101,12000,MSFT,3/5/2024 9:30:00.000 AM,SIMX,HB-42"
        );
        assert_eq!(decode(&line).unwrap(), RawMessage::Bar(bar));
    }

    #[test]
    fn morning_and_evening_timestamps() {
        // Midnight renders as 12 AM, noon as 12 PM.
        assert!(format_timestamp(millis(2024, 1, 2, 0, 5, 0, 0)).contains("12:05:00.000 AM"));
        assert!(format_timestamp(millis(2024, 1, 2, 12, 5, 0, 0)).contains("12:05:00.000 PM"));
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(matches!(decode("TICKnopipe"), Err(FrameError::MissingTag(_))));
        assert!(matches!(decode("QUOTE|1,2"), Err(FrameError::UnknownTag(_))));
        assert!(matches!(
            decode("TICK|1,2,3"),
            Err(FrameError::FieldCount { .. })
        ));
        assert!(matches!(
            decode("TICK|x,300,150.02,200,150,100,AAPL,3/5/2024 2:31:05.250 PM,SIMX"),
            Err(FrameError::BadNumber(_))
        ));
        assert!(matches!(
            decode("TICK|149.98,300,150.02,200,150,100,AAPL,yesterday,SIMX"),
            Err(FrameError::BadTimestamp(_))
        ));
    }
}
