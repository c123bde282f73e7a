//! The global timeshift buffer: a bounded history of PCM chunks per
//! source tag, addressable by playout time, shared by every route that
//! reads that source. Rings are held in a `dashmap` keyed by source tag.

pub mod ring;

use crate::config::TimeshiftConfig;
use crate::error::TimeshiftError;
use crate::frame::PcmChunk;
use crate::tag::SourceTag;
use dashmap::DashMap;
use ring::{AnchorEvent, TimeshiftRing, TimeshiftTuning};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Result of a catch-up-aware read: the chunks found, whether the reader
/// was lagging beyond `max_catchup_lag` and had its cursor skipped ahead,
/// and the cursor position the caller should resume from next time.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub chunks: Vec<PcmChunk>,
    pub lagging: bool,
    pub next_since: Duration,
}

/// Shared store of per-source timeshift rings. One instance per engine.
pub struct TimeshiftStore {
    rings: DashMap<SourceTag, Arc<TimeshiftRing>>,
    window: Duration,
    tuning: TimeshiftTuning,
}

impl TimeshiftStore {
    pub fn new(config: &TimeshiftConfig) -> Self {
        TimeshiftStore {
            rings: DashMap::new(),
            window: config.window,
            tuning: TimeshiftTuning {
                max_catchup_lag: config.max_catchup_lag,
                target_buffer_level: config.target_buffer_level,
                session_reset_threshold: config.session_reset_threshold,
                continuity_slack: config.continuity_slack,
                arrival_error_threshold: config.arrival_error_threshold,
                anchor_nudge_factor: config.anchor_nudge_factor,
            },
        }
    }

    /// Test/ad-hoc constructor taking just a window, with default tuning.
    pub fn with_window(window: Duration) -> Self {
        TimeshiftStore {
            rings: DashMap::new(),
            window,
            tuning: TimeshiftTuning::default(),
        }
    }

    /// Returns the ring for `tag`, creating it on first use. A receiver
    /// calls this once per source it discovers.
    pub fn ring_for(&self, tag: &SourceTag) -> Arc<TimeshiftRing> {
        self.rings
            .entry(tag.clone())
            .or_insert_with(|| TimeshiftRing::new(self.window))
            .clone()
    }

    /// Pushes a chunk whose `playout_at` the caller has already computed
    /// (used by the plugin ingress and by tests).
    #[instrument(skip(self, chunk), fields(source = %chunk.source))]
    pub fn push(&self, chunk: PcmChunk, now: Duration) {
        let ring = self.ring_for(&chunk.source);
        debug!(frames = chunk.frames(), "timeshift push");
        ring.push(chunk, now);
    }

    /// Pushes a chunk stamped from the tag's playout-clock anchor given its
    /// wire arrival instant. Every network receiver uses this path so
    /// eviction and catch-up behave identically across protocols.
    #[instrument(skip(self, chunk), fields(source = %chunk.source))]
    pub fn push_arrived(&self, chunk: PcmChunk, arrival_instant: Duration, now: Duration) -> AnchorEvent {
        let ring = self.ring_for(&chunk.source);
        let event = ring.push_arrived(chunk, arrival_instant, now, &self.tuning);
        match event {
            AnchorEvent::Reset => warn!("timeshift anchor reset: arrival gap exceeded session_reset_threshold"),
            AnchorEvent::Rearmed => debug!("timeshift anchor re-armed: arrival gap exceeded continuity_slack"),
            AnchorEvent::Normal => {}
        }
        event
    }

    /// Looks up chunks for `tag` at or after `since`, skipping the reader
    /// ahead to `now − target_buffer_level` (counted as lagging) if it has
    /// fallen more than `max_catchup_lag` behind. Returns
    /// [`TimeshiftError::UnknownSource`] if nothing has ever been pushed for
    /// that tag, and [`TimeshiftError::OffsetOutOfWindow`] if the resulting
    /// offset is older than everything currently retained.
    pub fn read_since(&self, tag: &SourceTag, since: Duration, now: Duration) -> Result<ReadOutcome, TimeshiftError> {
        let ring = self
            .rings
            .get(tag)
            .ok_or_else(|| TimeshiftError::UnknownSource(tag.as_str().to_string()))?;

        let lagging = now.saturating_sub(since) > self.tuning.max_catchup_lag;
        let effective_since = if lagging {
            warn!(
                tag = %tag,
                lag_ms = now.saturating_sub(since).as_secs_f64() * 1000.0,
                "timeshift cursor lagging beyond max_catchup_lag, skipping ahead"
            );
            now.saturating_sub(self.tuning.target_buffer_level)
        } else {
            since
        };

        if let Some(oldest) = ring.oldest_retained() {
            if effective_since < oldest {
                warn!(
                    tag = %tag,
                    requested_ms = effective_since.as_secs_f64() * 1000.0,
                    oldest_ms = oldest.as_secs_f64() * 1000.0,
                    "requested offset precedes retained window, skipping ahead"
                );
                return Err(TimeshiftError::OffsetOutOfWindow {
                    offset_ms: effective_since.as_secs_f64() * 1000.0,
                    window_ms: self.window.as_secs_f64() * 1000.0,
                });
            }
        }

        let chunks = ring.read_since(effective_since);
        let next_since = chunks
            .last()
            .map(|c| c.playout_at + c.duration())
            .unwrap_or(effective_since);
        Ok(ReadOutcome {
            chunks,
            lagging,
            next_since,
        })
    }

    /// Full snapshot export for `tag`, used by `export_timeshift_buffer`.
    pub fn export(&self, tag: &SourceTag) -> Result<Vec<PcmChunk>, TimeshiftError> {
        let ring = self
            .rings
            .get(tag)
            .ok_or_else(|| TimeshiftError::UnknownSource(tag.as_str().to_string()))?;
        Ok(ring.export_all())
    }

    /// Cumulative anchor adjustment applied to `tag`'s playout clock so far.
    pub fn cumulative_adjustment(&self, tag: &SourceTag) -> Duration {
        self.rings
            .get(tag)
            .map(|r| r.cumulative_adjustment())
            .unwrap_or(Duration::ZERO)
    }

    pub fn known_tags(&self) -> Vec<SourceTag> {
        self.rings.iter().map(|e| e.key().clone()).collect()
    }

    /// Drops rings for tags a receiver has stopped reporting and that have
    /// gone fully empty, so a source that disappears doesn't leak its ring
    /// forever.
    pub fn prune_empty(&self) {
        self.rings.retain(|_, ring| !ring.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{AudioFormat, FrameFormat, SampleFormat};

    fn chunk(tag: &str, playout_ms: u64) -> PcmChunk {
        PcmChunk::silence(
            AudioFormat {
                sample_rate: 48_000,
                frame_format: FrameFormat {
                    channels: 2,
                    sample_format: SampleFormat::S16,
                },
            },
            SourceTag::new(tag).unwrap(),
            128,
            Duration::from_millis(playout_ms),
        )
    }

    #[test]
    fn unknown_source_errors() {
        let store = TimeshiftStore::with_window(Duration::from_secs(1));
        let tag = SourceTag::new("ghost").unwrap();
        assert!(store.read_since(&tag, Duration::ZERO, Duration::ZERO).is_err());
    }

    #[test]
    fn push_then_read_round_trips() {
        let store = TimeshiftStore::with_window(Duration::from_secs(10));
        store.push(chunk("a", 0), Duration::from_millis(0));
        store.push(chunk("a", 10), Duration::from_millis(10));
        let tag = SourceTag::new("a").unwrap();
        let got = store
            .read_since(&tag, Duration::ZERO, Duration::from_millis(10))
            .expect("known source");
        assert_eq!(got.chunks.len(), 2);
        assert!(!got.lagging);
    }

    #[test]
    fn offset_before_window_errors() {
        let store = TimeshiftStore::with_window(Duration::from_millis(50));
        store.push(chunk("a", 0), Duration::from_millis(0));
        store.push(chunk("a", 500), Duration::from_millis(500));
        let tag = SourceTag::new("a").unwrap();
        let err = store.read_since(&tag, Duration::from_millis(0), Duration::from_millis(500));
        assert!(matches!(err, Err(TimeshiftError::OffsetOutOfWindow { .. })));
    }

    #[test]
    fn prune_removes_empty_rings() {
        let store = TimeshiftStore::with_window(Duration::from_millis(10));
        store.push(chunk("a", 0), Duration::from_millis(0));
        store.push(chunk("a", 500), Duration::from_millis(500));
        store.prune_empty();
        assert!(store.known_tags().is_empty());
    }

    #[test]
    fn far_behind_reader_is_marked_lagging_and_skipped_ahead() {
        let store = TimeshiftStore::with_window(Duration::from_secs(10));
        for ms in (0..2000).step_by(20) {
            store.push(chunk("a", ms), Duration::from_millis(ms));
        }
        let tag = SourceTag::new("a").unwrap();
        let outcome = store
            .read_since(&tag, Duration::from_millis(0), Duration::from_millis(1980))
            .expect("known source");
        assert!(outcome.lagging);
    }

    #[test]
    fn arrival_anchored_push_evicts_non_rtp_sources_by_age() {
        let store = TimeshiftStore::with_window(Duration::from_millis(100));
        let tag = SourceTag::new("a").unwrap();
        let fmt = AudioFormat {
            sample_rate: 48_000,
            frame_format: FrameFormat {
                channels: 2,
                sample_format: SampleFormat::S16,
            },
        };
        store.push_arrived(
            PcmChunk::silence(fmt, tag.clone(), 128, Duration::ZERO),
            Duration::from_millis(0),
            Duration::from_millis(0),
        );
        store.push_arrived(
            PcmChunk::silence(fmt, tag.clone(), 128, Duration::ZERO),
            Duration::from_millis(500),
            Duration::from_millis(500),
        );
        let ring = store.ring_for(&tag);
        assert_eq!(ring.len(), 1);
    }
}
