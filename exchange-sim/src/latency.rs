//! Simulated exchange-acknowledgement latency.
//!
//! A market order submitted at time T does not fill at T: the simulator
//! targets the tick at T plus a latency offset, mimicking what the live
//! venue was measured to do. The offset depends on the wall-clock second
//! of submission (the venue batches at fixed seconds of each minute) and
//! on one end-of-day cutoff where orders carry over to the next session.

use chrono::{DateTime, NaiveTime, Timelike};
use std::time::Duration;

/// Latency offsets applied to market order submission times.
///
/// All lookups happen in UTC; the submission timestamp is unix millis and
/// the returned target is a unix second.
#[derive(Debug, Clone)]
pub struct LatencyProfile {
    /// Baseline acknowledgement delay.
    pub standard: Duration,
    /// Delay when the submission second lands on a venue batching point.
    pub batching: Duration,
    /// Seconds-of-minute at which the venue batches.
    pub batching_seconds: Vec<u32>,
    /// Submissions at exactly this time of day carry over past the close.
    pub eod_cutoff: NaiveTime,
    /// Delay applied at the end-of-day cutoff.
    pub eod: Duration,
    /// How many one-minute probes a market order may make past its target
    /// before the engine gives up on it.
    pub max_probe_minutes: u32,
}

impl Default for LatencyProfile {
    fn default() -> Self {
        Self {
            standard: Duration::from_secs(14),
            batching: Duration::from_secs(18),
            batching_seconds: vec![56, 11],
            // 15:58:56 is the last batching point before the close.
            eod_cutoff: NaiveTime::from_hms_opt(15, 58, 56).unwrap(),
            eod: Duration::from_secs(1 * 3600 + 32 * 60 + 18),
            max_probe_minutes: 2_880,
        }
    }
}

impl LatencyProfile {
    /// Maps a submission timestamp (unix millis) to the unix second the
    /// fill should be sourced from.
    pub fn target_second(&self, submitted_at_millis: i64) -> i64 {
        let submitted_sec = submitted_at_millis.div_euclid(1_000);
        let offset = match DateTime::from_timestamp(submitted_sec, 0) {
            Some(dt) => {
                let t = dt.time();
                if t.hour() == self.eod_cutoff.hour()
                    && t.minute() == self.eod_cutoff.minute()
                    && t.second() == self.eod_cutoff.second()
                {
                    self.eod
                } else if self.batching_seconds.contains(&t.second()) {
                    self.batching
                } else {
                    self.standard
                }
            }
            // Out-of-range timestamp: fall back to the baseline delay.
            None => self.standard,
        };
        submitted_sec + offset.as_secs() as i64
    }
}
