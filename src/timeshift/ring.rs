//! Per-source ring storage: a `watch` channel carries the latest write
//! cursor so readers can block until new data is available instead of
//! polling, while the actual samples live behind a `Mutex<VecDeque<_>>`
//! shared between producer and consumer handles. This process is the ring's
//! only owner and there's no FFI boundary to cross, so it's a plain safe
//! `VecDeque` of chunks rather than raw memory.
//!
//! Each tag also owns a playout-clock anchor: the pair `(reference_arrival,
//! reference_playout)` that turns an entry's arrival instant into its
//! scheduled playout instant. The anchor nudges itself toward the observed
//! arrival pattern and resets outright on a large discontinuity.

use crate::frame::PcmChunk;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// Write cursor broadcast to readers: the playout instant of the most
/// recently inserted chunk, plus an epoch that bumps on every anchor reset
/// so a reader can tell its relative position is no longer meaningful
/// instead of silently reading across a discontinuity.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cursor {
    pub latest_playout_at: Duration,
    pub sequence: u64,
    pub epoch: u64,
}

/// What happened to the tag's anchor when an entry was pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorEvent {
    /// First entry for this tag, or within normal nudge tolerance.
    Normal,
    /// Gap exceeded `continuity_slack`: anchor re-armed, cursors kept position.
    Rearmed,
    /// Gap exceeded `session_reset_threshold`: anchor and all cursors reset.
    Reset,
}

/// Tunables threaded in from [`crate::config::TimeshiftConfig`], kept as a
/// plain copy type here so `ring.rs` doesn't need to depend on `config.rs`.
#[derive(Debug, Clone, Copy)]
pub struct TimeshiftTuning {
    pub max_catchup_lag: Duration,
    pub target_buffer_level: Duration,
    pub session_reset_threshold: Duration,
    pub continuity_slack: Duration,
    pub arrival_error_threshold: Duration,
    pub anchor_nudge_factor: f32,
}

impl Default for TimeshiftTuning {
    fn default() -> Self {
        TimeshiftTuning {
            max_catchup_lag: Duration::from_millis(200),
            target_buffer_level: Duration::from_millis(40),
            session_reset_threshold: Duration::from_secs(2),
            continuity_slack: Duration::from_millis(200),
            arrival_error_threshold: Duration::from_millis(20),
            anchor_nudge_factor: 0.1,
        }
    }
}

/// Signed duration arithmetic, since an arrival can run ahead of or behind
/// its scheduled playout.
fn signed_sub(a: Duration, b: Duration) -> i128 {
    a.as_nanos() as i128 - b.as_nanos() as i128
}

fn add_signed(d: Duration, nanos: i128) -> Duration {
    let total = d.as_nanos() as i128 + nanos;
    Duration::from_nanos(total.max(0) as u64)
}

struct Anchor {
    reference_arrival: Duration,
    reference_playout: Duration,
    last_arrival: Option<Duration>,
    cumulative_adjustment: Duration,
}

impl Anchor {
    fn new() -> Self {
        Anchor {
            reference_arrival: Duration::ZERO,
            reference_playout: Duration::ZERO,
            last_arrival: None,
            cumulative_adjustment: Duration::ZERO,
        }
    }

    /// Schedules `arrival_instant`, updating the anchor per the discontinuity
    /// and nudge rules, and returns the resulting playout instant.
    fn schedule(&mut self, arrival_instant: Duration, now: Duration, tuning: &TimeshiftTuning) -> (Duration, AnchorEvent) {
        let event = match self.last_arrival {
            None => {
                self.reference_arrival = arrival_instant;
                self.reference_playout = now;
                AnchorEvent::Normal
            }
            Some(last) => {
                let gap = arrival_instant.saturating_sub(last);
                if gap > tuning.session_reset_threshold {
                    self.reference_arrival = arrival_instant;
                    self.reference_playout = now;
                    self.cumulative_adjustment = Duration::ZERO;
                    AnchorEvent::Reset
                } else if gap > tuning.continuity_slack {
                    let scheduled_before =
                        self.reference_playout + arrival_instant.saturating_sub(self.reference_arrival);
                    self.reference_playout = scheduled_before;
                    self.reference_arrival = arrival_instant;
                    AnchorEvent::Rearmed
                } else {
                    AnchorEvent::Normal
                }
            }
        };
        self.last_arrival = Some(arrival_instant);

        let scheduled = self.reference_playout + arrival_instant.saturating_sub(self.reference_arrival);
        let error_nanos = signed_sub(now, scheduled);
        if error_nanos.unsigned_abs() > tuning.arrival_error_threshold.as_nanos() {
            let nudge = (error_nanos as f64 * tuning.anchor_nudge_factor as f64) as i128;
            self.reference_playout = add_signed(self.reference_playout, nudge);
            self.cumulative_adjustment += Duration::from_nanos(nudge.unsigned_abs() as u64);
        }
        let scheduled = self.reference_playout + arrival_instant.saturating_sub(self.reference_arrival);
        (scheduled, event)
    }
}

struct Inner {
    chunks: VecDeque<PcmChunk>,
    window: Duration,
    anchor: Anchor,
}

impl Inner {
    fn evict_expired(&mut self, now: Duration) {
        while let Some(front) = self.chunks.front() {
            if now.saturating_sub(front.playout_at) > self.window {
                self.chunks.pop_front();
            } else {
                break;
            }
        }
    }
}

/// A single source's ring: one producer (the receiver), many consumers
/// (one per SIP pipeline reading this source for a given route).
pub struct TimeshiftRing {
    inner: Mutex<Inner>,
    cursor_tx: watch::Sender<Cursor>,
    cursor_rx: watch::Receiver<Cursor>,
}

impl TimeshiftRing {
    pub fn new(window: Duration) -> Arc<Self> {
        let (cursor_tx, cursor_rx) = watch::channel(Cursor::default());
        Arc::new(TimeshiftRing {
            inner: Mutex::new(Inner {
                chunks: VecDeque::new(),
                window,
                anchor: Anchor::new(),
            }),
            cursor_tx,
            cursor_rx,
        })
    }

    /// Appends a chunk whose `playout_at` was already computed by the
    /// caller (used by tests and by the plugin ingress, which has no
    /// network arrival jitter to anchor against), evicts anything older
    /// than the window, and wakes any reader watching the cursor.
    pub fn push(&self, chunk: PcmChunk, now: Duration) {
        let playout_at = chunk.playout_at;
        let mut inner = self.inner.lock().expect("timeshift ring mutex poisoned");
        inner.chunks.push_back(chunk);
        inner.evict_expired(now);
        drop(inner);
        self.cursor_tx.send_modify(|c| {
            c.latest_playout_at = playout_at;
            c.sequence = c.sequence.wrapping_add(1);
        });
    }

    /// Stamps `chunk.playout_at` from the tag's playout-clock anchor given
    /// its wire `arrival_instant`, applying discontinuity handling and
    /// arrival-error nudging, then pushes it. Returns the anchor event so
    /// the caller can report a session reset/re-arm to stats.
    pub fn push_arrived(
        &self,
        mut chunk: PcmChunk,
        arrival_instant: Duration,
        now: Duration,
        tuning: &TimeshiftTuning,
    ) -> AnchorEvent {
        let mut inner = self.inner.lock().expect("timeshift ring mutex poisoned");
        let (playout_at, event) = inner.anchor.schedule(arrival_instant, now, tuning);
        chunk.playout_at = playout_at;
        if event == AnchorEvent::Reset {
            inner.chunks.clear();
        }
        inner.chunks.push_back(chunk);
        inner.evict_expired(now);
        drop(inner);
        self.cursor_tx.send_modify(|c| {
            c.latest_playout_at = playout_at;
            c.sequence = c.sequence.wrapping_add(1);
            if event == AnchorEvent::Reset {
                c.epoch = c.epoch.wrapping_add(1);
            }
        });
        event
    }

    /// Cumulative anchor adjustment applied to this tag so far, surfaced by
    /// the stats registry.
    pub fn cumulative_adjustment(&self) -> Duration {
        self.inner
            .lock()
            .expect("timeshift ring mutex poisoned")
            .anchor
            .cumulative_adjustment
    }

    /// Returns every retained chunk with `playout_at >= since`, oldest first.
    pub fn read_since(&self, since: Duration) -> Vec<PcmChunk> {
        let inner = self.inner.lock().expect("timeshift ring mutex poisoned");
        inner
            .chunks
            .iter()
            .filter(|c| c.playout_at >= since)
            .cloned()
            .collect()
    }

    /// Full export of everything currently retained (the timeshift window),
    /// used by the `export_timeshift_buffer` API.
    pub fn export_all(&self) -> Vec<PcmChunk> {
        let inner = self.inner.lock().expect("timeshift ring mutex poisoned");
        inner.chunks.iter().cloned().collect()
    }

    pub fn oldest_retained(&self) -> Option<Duration> {
        let inner = self.inner.lock().expect("timeshift ring mutex poisoned");
        inner.chunks.front().map(|c| c.playout_at)
    }

    pub fn watch_cursor(&self) -> watch::Receiver<Cursor> {
        self.cursor_rx.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("timeshift ring mutex poisoned").chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{AudioFormat, FrameFormat, SampleFormat};
    use crate::tag::SourceTag;

    fn chunk(playout_ms: u64) -> PcmChunk {
        PcmChunk::silence(
            AudioFormat {
                sample_rate: 48_000,
                frame_format: FrameFormat {
                    channels: 2,
                    sample_format: SampleFormat::S16,
                },
            },
            SourceTag::new("src").unwrap(),
            128,
            Duration::from_millis(playout_ms),
        )
    }

    fn raw_chunk() -> PcmChunk {
        PcmChunk::silence(
            AudioFormat {
                sample_rate: 48_000,
                frame_format: FrameFormat {
                    channels: 2,
                    sample_format: SampleFormat::S16,
                },
            },
            SourceTag::new("src").unwrap(),
            128,
            Duration::ZERO,
        )
    }

    #[test]
    fn evicts_chunks_older_than_window() {
        let ring = TimeshiftRing::new(Duration::from_millis(100));
        ring.push(chunk(0), Duration::from_millis(0));
        ring.push(chunk(50), Duration::from_millis(50));
        ring.push(chunk(300), Duration::from_millis(300));
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.oldest_retained(), Some(Duration::from_millis(300)));
    }

    #[test]
    fn read_since_filters_by_playout_time() {
        let ring = TimeshiftRing::new(Duration::from_secs(10));
        ring.push(chunk(0), Duration::from_millis(0));
        ring.push(chunk(10), Duration::from_millis(10));
        ring.push(chunk(20), Duration::from_millis(20));
        let got = ring.read_since(Duration::from_millis(10));
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn cursor_advances_on_push() {
        let ring = TimeshiftRing::new(Duration::from_secs(10));
        let rx = ring.watch_cursor();
        ring.push(chunk(5), Duration::from_millis(5));
        assert_eq!(rx.borrow().sequence, 1);
        assert_eq!(rx.borrow().latest_playout_at, Duration::from_millis(5));
    }

    #[test]
    fn first_arrival_anchors_playout_to_now() {
        let ring = TimeshiftRing::new(Duration::from_secs(10));
        let tuning = TimeshiftTuning::default();
        let event = ring.push_arrived(raw_chunk(), Duration::from_millis(1000), Duration::from_millis(1000), &tuning);
        assert_eq!(event, AnchorEvent::Normal);
        assert_eq!(ring.oldest_retained(), Some(Duration::from_millis(1000)));
    }

    #[test]
    fn steady_arrivals_track_the_anchor_without_drift() {
        let ring = TimeshiftRing::new(Duration::from_secs(10));
        let tuning = TimeshiftTuning::default();
        ring.push_arrived(raw_chunk(), Duration::from_millis(0), Duration::from_millis(0), &tuning);
        ring.push_arrived(raw_chunk(), Duration::from_millis(24), Duration::from_millis(24), &tuning);
        ring.push_arrived(raw_chunk(), Duration::from_millis(48), Duration::from_millis(48), &tuning);
        assert_eq!(ring.oldest_retained(), Some(Duration::from_millis(0)));
        assert_eq!(ring.cumulative_adjustment(), Duration::ZERO);
    }

    #[test]
    fn large_gap_resets_anchor_and_clears_history() {
        let ring = TimeshiftRing::new(Duration::from_secs(10));
        let tuning = TimeshiftTuning::default();
        ring.push_arrived(raw_chunk(), Duration::from_millis(0), Duration::from_millis(0), &tuning);
        let rx = ring.watch_cursor();
        let epoch_before = rx.borrow().epoch;
        let event = ring.push_arrived(
            raw_chunk(),
            Duration::from_secs(5),
            Duration::from_secs(5),
            &tuning,
        );
        assert_eq!(event, AnchorEvent::Reset);
        assert_eq!(ring.len(), 1);
        assert_eq!(rx.borrow().epoch, epoch_before + 1);
    }

    #[test]
    fn moderate_gap_rearms_without_clearing_history() {
        let ring = TimeshiftRing::new(Duration::from_secs(10));
        let tuning = TimeshiftTuning::default();
        ring.push_arrived(raw_chunk(), Duration::from_millis(0), Duration::from_millis(0), &tuning);
        let event = ring.push_arrived(
            raw_chunk(),
            Duration::from_millis(500),
            Duration::from_millis(500),
            &tuning,
        );
        assert_eq!(event, AnchorEvent::Rearmed);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn arrival_error_beyond_threshold_nudges_anchor_and_reports_it() {
        let ring = TimeshiftRing::new(Duration::from_secs(10));
        let tuning = TimeshiftTuning::default();
        ring.push_arrived(raw_chunk(), Duration::from_millis(0), Duration::from_millis(0), &tuning);
        // Arrival is on schedule but the wall clock jumped 100ms ahead of it,
        // an error well past the 20ms threshold.
        ring.push_arrived(
            raw_chunk(),
            Duration::from_millis(24),
            Duration::from_millis(124),
            &tuning,
        );
        assert!(ring.cumulative_adjustment() > Duration::ZERO);
    }
}
