//! Operator-facing stats surface: per-receiver, per-route and per-sink
//! counters accumulated in a shared `dashmap` the caller reads directly,
//! instead of subscribing to a separate stats bus.

use dashmap::DashMap;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ReceiverStats {
    pub packets_received: u64,
    pub malformed_packets: u64,
    pub out_of_order_packets: u64,
    pub last_packet_at: Option<Duration>,
    /// Smoothed inter-arrival jitter, RFC 3550-style running estimate.
    pub jitter: Duration,
}

/// Per-route counters: one route reads one source's timeshift ring and
/// feeds one sink lane, so catch-up, anchor adjustment and rate-correction
/// counters live here rather than on the receiver or the sink.
#[derive(Debug, Clone, Default)]
pub struct RouteStats {
    pub buffer_fill: Duration,
    pub target_buffer_level: Duration,
    pub cumulative_anchor_adjustment: Duration,
    pub discards: u64,
    pub rate_corrections: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SinkStats {
    pub chunks_mixed: u64,
    pub active_lanes: usize,
    pub stalled_lanes: usize,
    pub underruns: u64,
    /// How long the last emitted chunk sat in its ready queue before mixing.
    pub last_chunk_dwell: Duration,
    /// Gap between this tick's send and the previous one; large values mean
    /// the sink's downstream consumer is being starved.
    pub send_gap: Duration,
    last_sent_at: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct StatsRegistry {
    receivers: DashMap<String, ReceiverStats>,
    routes: DashMap<String, RouteStats>,
    sinks: DashMap<String, SinkStats>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet(&self, receiver_id: &str, now: Duration) {
        let mut entry = self.receivers.entry(receiver_id.to_string()).or_default();
        entry.packets_received += 1;
        if let Some(last) = entry.last_packet_at {
            let interarrival = now.as_secs_f64() - last.as_secs_f64();
            let sample = Duration::from_secs_f64(interarrival.abs());
            // RFC 3550 section 6.4.1: J += (|D| - J) / 16.
            let delta = sample.as_secs_f64() - entry.jitter.as_secs_f64();
            entry.jitter = Duration::from_secs_f64((entry.jitter.as_secs_f64() + delta / 16.0).max(0.0));
        }
        entry.last_packet_at = Some(now);
    }

    pub fn record_malformed(&self, receiver_id: &str) {
        self.receivers
            .entry(receiver_id.to_string())
            .or_default()
            .malformed_packets += 1;
    }

    pub fn record_out_of_order(&self, receiver_id: &str) {
        self.receivers
            .entry(receiver_id.to_string())
            .or_default()
            .out_of_order_packets += 1;
    }

    pub fn record_route_buffer(
        &self,
        route_id: &str,
        buffer_fill: Duration,
        target_buffer_level: Duration,
        cumulative_anchor_adjustment: Duration,
    ) {
        let mut entry = self.routes.entry(route_id.to_string()).or_default();
        entry.buffer_fill = buffer_fill;
        entry.target_buffer_level = target_buffer_level;
        entry.cumulative_anchor_adjustment = cumulative_anchor_adjustment;
    }

    pub fn record_discard(&self, route_id: &str) {
        self.routes.entry(route_id.to_string()).or_default().discards += 1;
    }

    pub fn record_rate_correction(&self, route_id: &str) {
        self.routes
            .entry(route_id.to_string())
            .or_default()
            .rate_corrections += 1;
    }

    pub fn record_mix(&self, sink_id: &str, active_lanes: usize, stalled_lanes: usize) {
        let mut entry = self.sinks.entry(sink_id.to_string()).or_default();
        entry.chunks_mixed += 1;
        entry.active_lanes = active_lanes;
        entry.stalled_lanes = stalled_lanes;
    }

    pub fn record_underrun(&self, sink_id: &str) {
        self.sinks.entry(sink_id.to_string()).or_default().underruns += 1;
    }

    pub fn record_send(&self, sink_id: &str, now: Duration, chunk_dwell: Duration) {
        let mut entry = self.sinks.entry(sink_id.to_string()).or_default();
        entry.last_chunk_dwell = chunk_dwell;
        entry.send_gap = entry.last_sent_at.map(|last| now.saturating_sub(last)).unwrap_or(Duration::ZERO);
        entry.last_sent_at = Some(now);
    }

    pub fn receiver_snapshot(&self, receiver_id: &str) -> ReceiverStats {
        self.receivers.get(receiver_id).map(|e| e.clone()).unwrap_or_default()
    }

    pub fn route_snapshot(&self, route_id: &str) -> RouteStats {
        self.routes.get(route_id).map(|e| e.clone()).unwrap_or_default()
    }

    pub fn sink_snapshot(&self, sink_id: &str) -> SinkStats {
        self.sinks.get(sink_id).map(|e| e.clone()).unwrap_or_default()
    }

    pub fn all_receivers(&self) -> Vec<(String, ReceiverStats)> {
        self.receivers.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    pub fn all_routes(&self) -> Vec<(String, RouteStats)> {
        self.routes.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    pub fn all_sinks(&self) -> Vec<(String, SinkStats)> {
        self.sinks.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_packet_counts() {
        let stats = StatsRegistry::new();
        stats.record_packet("scream0", Duration::from_millis(1));
        stats.record_packet("scream0", Duration::from_millis(2));
        assert_eq!(stats.receiver_snapshot("scream0").packets_received, 2);
    }

    #[test]
    fn unknown_receiver_returns_default() {
        let stats = StatsRegistry::new();
        assert_eq!(stats.receiver_snapshot("ghost").packets_received, 0);
    }

    #[test]
    fn jitter_tracks_interarrival_variance() {
        let stats = StatsRegistry::new();
        stats.record_packet("scream0", Duration::from_millis(0));
        stats.record_packet("scream0", Duration::from_millis(20));
        stats.record_packet("scream0", Duration::from_millis(60));
        assert!(stats.receiver_snapshot("scream0").jitter > Duration::ZERO);
    }

    #[test]
    fn sink_mix_tracks_lane_counts() {
        let stats = StatsRegistry::new();
        stats.record_mix("living_room", 3, 1);
        let snapshot = stats.sink_snapshot("living_room");
        assert_eq!(snapshot.active_lanes, 3);
        assert_eq!(snapshot.stalled_lanes, 1);
    }

    #[test]
    fn send_gap_tracks_interval_between_sends() {
        let stats = StatsRegistry::new();
        stats.record_send("living_room", Duration::from_millis(0), Duration::from_millis(5));
        stats.record_send("living_room", Duration::from_millis(20), Duration::from_millis(3));
        let snapshot = stats.sink_snapshot("living_room");
        assert_eq!(snapshot.send_gap, Duration::from_millis(20));
        assert_eq!(snapshot.last_chunk_dwell, Duration::from_millis(3));
    }

    #[test]
    fn route_buffer_stats_round_trip() {
        let stats = StatsRegistry::new();
        stats.record_route_buffer(
            "r1",
            Duration::from_millis(30),
            Duration::from_millis(40),
            Duration::from_millis(2),
        );
        stats.record_discard("r1");
        stats.record_rate_correction("r1");
        let snapshot = stats.route_snapshot("r1");
        assert_eq!(snapshot.buffer_fill, Duration::from_millis(30));
        assert_eq!(snapshot.discards, 1);
        assert_eq!(snapshot.rate_corrections, 1);
    }
}
