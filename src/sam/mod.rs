//! The sink audio mixer (SAM): one per sink, owning a lane per
//! attached source and summing their output each tick into the chunk
//! handed to the sink's protocol encoder.

pub mod lane;
pub mod sync;

use crate::error::SamError;
use crate::formats::AudioFormat;
use crate::frame::PcmChunk;
use crate::tag::SourceTag;
use lane::SamLane;
use std::collections::HashMap;
use std::time::Duration;

pub struct SinkMixer {
    sink_tag: SourceTag,
    format: AudioFormat,
    lanes: HashMap<SourceTag, SamLane>,
    underrun_hold: Duration,
    transfer_capacity: usize,
    ready_capacity: usize,
}

impl SinkMixer {
    pub fn new(sink_tag: SourceTag, format: AudioFormat, underrun_hold: Duration) -> Self {
        Self::with_capacities(sink_tag, format, underrun_hold, usize::MAX, usize::MAX)
    }

    pub fn with_capacities(
        sink_tag: SourceTag,
        format: AudioFormat,
        underrun_hold: Duration,
        transfer_capacity: usize,
        ready_capacity: usize,
    ) -> Self {
        SinkMixer {
            sink_tag,
            format,
            lanes: HashMap::new(),
            underrun_hold,
            transfer_capacity,
            ready_capacity,
        }
    }

    pub fn add_lane(&mut self, source: SourceTag) {
        let underrun_hold = self.underrun_hold;
        let transfer_capacity = self.transfer_capacity;
        let ready_capacity = self.ready_capacity;
        self.lanes
            .entry(source.clone())
            .or_insert_with(|| SamLane::with_capacities(source, underrun_hold, transfer_capacity, ready_capacity));
    }

    /// Total chunks dropped across all lanes due to transfer or ready queue
    /// overflow, since the mixer was created.
    pub fn dropped_chunks(&self) -> u64 {
        self.lanes.values().map(|l| l.dropped_chunks()).sum()
    }

    pub fn remove_lane(&mut self, source: &SourceTag) {
        self.lanes.remove(source);
    }

    pub fn feed(&mut self, source: &SourceTag, chunk: PcmChunk) -> Result<(), SamError> {
        self.lanes
            .get_mut(source)
            .ok_or_else(|| SamError::UnknownLane(source.as_str().to_string()))?
            .push(chunk);
        Ok(())
    }

    /// Pops one ready chunk from every lane that has one (or is within its
    /// underrun grace period) and sums them into a single output chunk.
    /// Lanes that have exceeded their grace period are skipped for this
    /// tick rather than holding up the whole sink.
    pub fn mix_tick(&mut self, now: Duration, playout_at: Duration) -> PcmChunk {
        let mut ready = Vec::new();
        for lane in self.lanes.values_mut() {
            if let Some(chunk) = lane.pop_ready(now) {
                ready.push(chunk);
            }
        }
        sync::mix(&ready, self.format, self.sink_tag.clone(), playout_at)
    }

    pub fn active_lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn stalled_lanes(&self, now: Duration) -> Vec<SourceTag> {
        self.lanes
            .values()
            .filter(|lane| lane.is_stalled(now))
            .map(|lane| lane.source.clone())
            .collect()
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

    #[test]
    fn feed_rejects_unknown_lane() {
        let mut mixer = SinkMixer::new(SourceTag::new("sink").unwrap(), fmt(), Duration::from_millis(50));
        let chunk = PcmChunk::silence(fmt(), SourceTag::new("a").unwrap(), 4, Duration::ZERO);
        assert!(mixer.feed(&SourceTag::new("a").unwrap(), chunk).is_err());
    }

    #[test]
    fn mix_tick_sums_registered_lanes() {
        let mut mixer = SinkMixer::new(SourceTag::new("sink").unwrap(), fmt(), Duration::from_millis(50));
        let a = SourceTag::new("a").unwrap();
        mixer.add_lane(a.clone());
        mixer
            .feed(&a, PcmChunk { source: a.clone(), format: fmt(), samples: vec![0.2, 0.2], playout_at: Duration::ZERO })
            .expect("feed");
        let mixed = mixer.mix_tick(Duration::ZERO, Duration::ZERO);
        assert_eq!(mixed.samples, vec![0.2, 0.2]);
    }
}
