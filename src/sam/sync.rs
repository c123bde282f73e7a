//! Lane summing plus multi-sink synchronization.
//!
//! [`mix`] sums one sink's lanes sample-for-sample, clamping to avoid
//! clipping from multiple sources adding constructively. [`SyncGroup`] is
//! the separate, optional mechanism that keeps several *sinks'* mix ticks
//! aligned: members report their tick completion instant, the group
//! resolves a soft barrier, and the skew of each member from the group's
//! average is fed back as a small resample-ratio bias on that member's
//! source processors.

use crate::frame::PcmChunk;
use crate::formats::AudioFormat;
use crate::tag::SourceTag;
use std::collections::HashMap;
use std::time::Duration;

/// Sums `lanes` into a single chunk at `format`. Lanes that are shorter
/// than the longest lane are zero-padded rather than skipped, so one
/// source's chunk size never truncates the whole mix.
pub fn mix(lanes: &[PcmChunk], format: AudioFormat, sink_tag: SourceTag, playout_at: std::time::Duration) -> PcmChunk {
    let len = lanes.iter().map(|c| c.samples.len()).max().unwrap_or(0);
    let mut out = vec![0.0f32; len];
    for lane in lanes {
        for (i, s) in lane.samples.iter().enumerate() {
            out[i] += s;
        }
    }
    for s in out.iter_mut() {
        *s = s.clamp(-1.0, 1.0);
    }
    PcmChunk {
        source: sink_tag,
        format,
        samples: out,
        playout_at,
    }
}

/// Coordinates mix ticks across a group of sinks sharing a sync group.
/// A member that misses the soft barrier keeps its last bias and
/// re-enters on the next tick rather than blocking the group.
pub struct SyncGroup {
    barrier_timeout: Duration,
    max_rate_adjustment: f32,
    smoothing: f32,
    arrivals: HashMap<String, Duration>,
    biases: HashMap<String, f32>,
}

impl SyncGroup {
    pub fn new(barrier_timeout: Duration, max_rate_adjustment: f32, smoothing: f32) -> Self {
        SyncGroup {
            barrier_timeout,
            max_rate_adjustment,
            smoothing,
            arrivals: HashMap::new(),
            biases: HashMap::new(),
        }
    }

    /// Records `member`'s mix-tick completion instant for this round.
    pub fn report_tick(&mut self, member: &str, now: Duration) {
        self.arrivals.insert(member.to_string(), now);
    }

    pub fn current_bias(&self, member: &str) -> f32 {
        self.biases.get(member).copied().unwrap_or(0.0)
    }

    /// Resolves the barrier for whichever members reported within
    /// `barrier_timeout` of the earliest reporter, updating each one's
    /// smoothed rate-skew bias from its offset to the group average.
    /// Members that haven't reported this round keep their prior bias.
    /// Returns the full bias map, including unchanged carry-over entries.
    pub fn resolve_barrier(&mut self) -> HashMap<String, f32> {
        if self.arrivals.is_empty() {
            return self.biases.clone();
        }
        let earliest = *self.arrivals.values().min().expect("non-empty");
        let within: Vec<(String, Duration)> = self
            .arrivals
            .iter()
            .filter(|(_, t)| t.saturating_sub(earliest) <= self.barrier_timeout)
            .map(|(m, t)| (m.clone(), *t))
            .collect();

        if !within.is_empty() {
            let avg_nanos: i128 = within.iter().map(|(_, t)| t.as_nanos() as i128).sum::<i128>() / within.len() as i128;
            for (member, t) in &within {
                let skew_secs = (t.as_nanos() as i128 - avg_nanos) as f32 / 1e9;
                // Ahead of the group average: slow this member down (negative bias).
                let raw_bias = (-skew_secs).clamp(-self.max_rate_adjustment, self.max_rate_adjustment);
                let prev = self.current_bias(member);
                let smoothed = prev + self.smoothing * (raw_bias - prev);
                self.biases.insert(member.clone(), smoothed);
            }
        }
        self.arrivals.clear();
        self.biases.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{FrameFormat, SampleFormat};

    fn fmt() -> AudioFormat {
        AudioFormat {
            sample_rate: 48_000,
            frame_format: FrameFormat {
                channels: 1,
                sample_format: SampleFormat::S16,
            },
        }
    }

    fn chunk(samples: Vec<f32>) -> PcmChunk {
        PcmChunk {
            source: SourceTag::new("x").unwrap(),
            format: fmt(),
            samples,
            playout_at: std::time::Duration::ZERO,
        }
    }

    #[test]
    fn sums_lanes_sample_wise() {
        let mixed = mix(
            &[chunk(vec![0.1, 0.2]), chunk(vec![0.1, 0.2])],
            fmt(),
            SourceTag::new("sink").unwrap(),
            std::time::Duration::ZERO,
        );
        assert!((mixed.samples[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn clamps_to_avoid_clipping_overflow() {
        let mixed = mix(
            &[chunk(vec![0.9]), chunk(vec![0.9])],
            fmt(),
            SourceTag::new("sink").unwrap(),
            std::time::Duration::ZERO,
        );
        assert!(mixed.samples[0] <= 1.0);
    }

    #[test]
    fn zero_pads_shorter_lanes() {
        let mixed = mix(
            &[chunk(vec![0.1, 0.2, 0.3]), chunk(vec![0.1])],
            fmt(),
            SourceTag::new("sink").unwrap(),
            std::time::Duration::ZERO,
        );
        assert_eq!(mixed.samples.len(), 3);
    }

    #[test]
    fn members_within_barrier_bias_toward_group_average() {
        let mut group = SyncGroup::new(Duration::from_millis(50), 0.2, 1.0);
        group.report_tick("a", Duration::from_millis(1000));
        group.report_tick("b", Duration::from_millis(1010));
        let biases = group.resolve_barrier();
        // "a" completed before the average: it should be nudged to slow
        // down less than "b", which completed after the average.
        assert!(biases["a"] > biases["b"]);
    }

    #[test]
    fn member_missing_barrier_keeps_prior_bias() {
        let mut group = SyncGroup::new(Duration::from_millis(10), 0.2, 1.0);
        group.report_tick("a", Duration::from_millis(1000));
        group.report_tick("b", Duration::from_millis(1000));
        let first = group.resolve_barrier();
        assert_eq!(first["a"], 0.0);

        // Round two: "b" arrives far outside the barrier window, so only
        // "a" is in-barrier this round; "b" should keep its prior bias.
        group.report_tick("a", Duration::from_millis(2000));
        group.report_tick("b", Duration::from_millis(2200));
        let second = group.resolve_barrier();
        assert_eq!(second["b"], first["b"]);
    }

    #[test]
    fn bias_never_exceeds_max_rate_adjustment() {
        let mut group = SyncGroup::new(Duration::from_secs(10), 0.05, 1.0);
        group.report_tick("a", Duration::from_millis(0));
        group.report_tick("b", Duration::from_millis(5000));
        let biases = group.resolve_barrier();
        for bias in biases.values() {
            assert!(bias.abs() <= 0.05 + 1e-6);
        }
    }
}
