//! One lane of a sink mixer: the per-source input to a [`super::SinkMixer`].
//!
//! A lane has two queues. The *transfer* queue is where a source's SIP
//! pipeline hands off chunks; it is bounded and drops the oldest entry on
//! overflow (a burst from upstream must not grow memory without bound).
//! The *ready* queue is what [`SamLane::pop_ready`] drains from on each
//! mix tick; it is bounded separately so a lane that fills faster than the
//! sink drains can't starve the mixer's other lanes for memory.

use crate::frame::PcmChunk;
use std::collections::VecDeque;
use std::time::Duration;

pub struct SamLane {
    pub source: crate::tag::SourceTag,
    transfer: VecDeque<PcmChunk>,
    transfer_capacity: usize,
    ready: VecDeque<PcmChunk>,
    ready_capacity: usize,
    underrun_since: Option<Duration>,
    underrun_hold: Duration,
    dropped_transfer: u64,
    dropped_ready: u64,
}

impl SamLane {
    pub fn new(source: crate::tag::SourceTag, underrun_hold: Duration) -> Self {
        Self::with_capacities(source, underrun_hold, usize::MAX, usize::MAX)
    }

    pub fn with_capacities(
        source: crate::tag::SourceTag,
        underrun_hold: Duration,
        transfer_capacity: usize,
        ready_capacity: usize,
    ) -> Self {
        SamLane {
            source,
            transfer: VecDeque::new(),
            transfer_capacity,
            ready: VecDeque::new(),
            ready_capacity,
            underrun_since: None,
            underrun_hold,
            dropped_transfer: 0,
            dropped_ready: 0,
        }
    }

    /// Hands a chunk from the SIP pipeline to this lane's transfer queue,
    /// dropping the oldest queued chunk if it's already at capacity.
    pub fn push(&mut self, chunk: PcmChunk) {
        self.underrun_since = None;
        if self.transfer.len() >= self.transfer_capacity {
            self.transfer.pop_front();
            self.dropped_transfer += 1;
        }
        self.transfer.push_back(chunk);
    }

    /// Moves as many chunks as fit from the transfer queue into the ready
    /// queue, dropping the oldest ready chunk on overflow. Called once per
    /// mix tick before [`Self::pop_ready`].
    pub fn promote_ready(&mut self) {
        while let Some(chunk) = self.transfer.pop_front() {
            if self.ready.len() >= self.ready_capacity {
                self.ready.pop_front();
                self.dropped_ready += 1;
            }
            self.ready.push_back(chunk);
        }
    }

    pub fn queued_len(&self) -> usize {
        self.transfer.len() + self.ready.len()
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_transfer + self.dropped_ready
    }

    /// Pops the next chunk to mix, or `None` if this lane is empty and has
    /// been empty longer than the configured underrun hold (meaning the
    /// sink mixer should drop the lane from this tick's sum rather than
    /// stall waiting for it).
    pub fn pop_ready(&mut self, now: Duration) -> Option<PcmChunk> {
        self.promote_ready();
        if let Some(chunk) = self.ready.pop_front() {
            return Some(chunk);
        }
        if self.underrun_since.is_none() {
            self.underrun_since = Some(now);
        }
        None
    }

    pub fn is_stalled(&self, now: Duration) -> bool {
        self.ready.is_empty()
            && self.transfer.is_empty()
            && self
                .underrun_since
                .is_some_and(|since| now.saturating_sub(since) >= self.underrun_hold)
    }
}
