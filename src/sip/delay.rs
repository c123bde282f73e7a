//! Per-source delay stage: holds back a source's audio by a configured
//! number of milliseconds, implemented as a ring of pending frames so delay
//! can be changed live without discontinuity beyond the change itself.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct DelayLine {
    channels: usize,
    delay_frames: usize,
    pending: VecDeque<f32>,
}

impl DelayLine {
    pub fn new(channels: usize, delay_frames: usize) -> Self {
        let mut pending = VecDeque::with_capacity(delay_frames * channels);
        for _ in 0..delay_frames * channels {
            pending.push_back(0.0);
        }
        DelayLine {
            channels,
            delay_frames,
            pending,
        }
    }

    pub fn set_delay_frames(&mut self, delay_frames: usize) {
        let target_len = delay_frames * self.channels;
        while self.pending.len() < target_len {
            self.pending.push_front(0.0);
        }
        while self.pending.len() > target_len {
            self.pending.pop_front();
        }
        self.delay_frames = delay_frames;
    }

    pub fn delay_frames(&self) -> usize {
        self.delay_frames
    }

    /// Pushes `input` in, pops the same count of delayed samples out.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let mut output = Vec::with_capacity(input.len());
        for &sample in input {
            self.pending.push_back(sample);
            output.push(self.pending.pop_front().unwrap_or(0.0));
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delay_is_passthrough() {
        let mut line = DelayLine::new(1, 0);
        let out = line.process(&[1.0, 2.0, 3.0]);
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn delay_holds_back_samples() {
        let mut line = DelayLine::new(1, 2);
        let out = line.process(&[1.0, 2.0, 3.0]);
        assert_eq!(out, vec![0.0, 0.0, 1.0]);
    }
}
