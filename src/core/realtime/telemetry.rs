//! Link telemetry.
//!
//! A transport reports cumulative counters as [`RawStats`]; the
//! [`TelemetrySampler`] turns successive snapshots into throughput figures.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Cumulative counters read from the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawStats {
    /// Sum of outbound audio bytes
    pub bytes_sent: u64,
    /// Sum of inbound audio bytes
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    /// Round-trip time of the nominated candidate pair, in seconds
    pub round_trip_time_secs: Option<f64>,
}

/// One telemetry sample published to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionStats {
    /// Wall-clock time of the sample, milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub round_trip_time_ms: Option<u64>,
    pub in_kbps: u64,
    pub out_kbps: u64,
}

/// Converts cumulative counters into rates against the previous sample.
#[derive(Debug, Default)]
pub struct TelemetrySampler {
    previous: Option<(Instant, RawStats)>,
}

impl TelemetrySampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `raw` taken at `at` and compute rates against the previous
    /// sample. The first sample after construction or [`reset`] reports zero
    /// rates.
    ///
    /// [`reset`]: TelemetrySampler::reset
    pub fn sample(&mut self, raw: RawStats, at: Instant) -> ConnectionStats {
        let (in_kbps, out_kbps) = match self.previous {
            Some((prev_at, prev)) => {
                let elapsed = at.saturating_duration_since(prev_at).max(Duration::from_millis(1));
                (
                    kbps(raw.bytes_received.saturating_sub(prev.bytes_received), elapsed),
                    kbps(raw.bytes_sent.saturating_sub(prev.bytes_sent), elapsed),
                )
            }
            None => (0, 0),
        };
        self.previous = Some((at, raw));

        ConnectionStats {
            timestamp_ms: unix_millis(),
            bytes_sent: raw.bytes_sent,
            bytes_received: raw.bytes_received,
            packets_sent: raw.packets_sent,
            packets_received: raw.packets_received,
            round_trip_time_ms: raw
                .round_trip_time_secs
                .filter(|rtt| rtt.is_finite() && *rtt >= 0.0)
                .map(|rtt| (rtt * 1000.0).round() as u64),
            in_kbps,
            out_kbps,
        }
    }

    /// Forget the baseline.
    pub fn reset(&mut self) {
        self.previous = None;
    }
}

fn kbps(bytes: u64, elapsed: Duration) -> u64 {
    (bytes as f64 * 8.0 / 1000.0 / elapsed.as_secs_f64()).round() as u64
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
