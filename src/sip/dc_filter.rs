//! DC-blocking filter: a one-pole high-pass that removes the constant
//! offset some capture devices leave in the signal, run per channel so each
//! keeps its own filter state across chunks.

const POLE: f32 = 0.995;

#[derive(Debug, Clone)]
pub struct DcFilter {
    channels: usize,
    prev_in: Vec<f32>,
    prev_out: Vec<f32>,
}

impl DcFilter {
    pub fn new(channels: usize) -> Self {
        DcFilter {
            channels,
            prev_in: vec![0.0; channels],
            prev_out: vec![0.0; channels],
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for (i, s) in samples.iter_mut().enumerate() {
            let ch = i % self.channels;
            let x = *s;
            let y = x - self.prev_in[ch] + POLE * self.prev_out[ch];
            self.prev_in[ch] = x;
            self.prev_out[ch] = y;
            *s = y;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_constant_offset() {
        let mut filter = DcFilter::new(1);
        let mut samples = vec![0.5f32; 2000];
        filter.process(&mut samples);
        assert!(samples.last().unwrap().abs() < 0.05);
    }

    #[test]
    fn preserves_channel_independence() {
        let mut filter = DcFilter::new(2);
        let mut samples = vec![1.0, -1.0, 1.0, -1.0];
        filter.process(&mut samples);
        assert!(samples[0] > 0.0);
        assert!(samples[1] < 0.0);
    }
}
