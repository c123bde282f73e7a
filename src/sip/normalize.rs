//! Peak normalizer / limiter: tracks a running peak and scales the signal
//! down when it would clip, releasing the gain reduction gradually so
//! normalization doesn't pump audibly on transients.

const ATTACK: f32 = 0.9;
const RELEASE: f32 = 0.9995;

#[derive(Debug, Clone)]
pub struct Normalizer {
    target_peak: f32,
    current_gain: f32,
}

impl Normalizer {
    pub fn new(target_peak: f32) -> Self {
        Normalizer {
            target_peak,
            current_gain: 1.0,
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let peak = s.abs();
            if peak * self.current_gain > self.target_peak && peak > 0.0 {
                let needed = self.target_peak / peak;
                self.current_gain = self.current_gain * ATTACK + needed * (1.0 - ATTACK);
            } else {
                self.current_gain = self.current_gain * RELEASE + 1.0 * (1.0 - RELEASE);
                self.current_gain = self.current_gain.min(1.0);
            }
            *s *= self.current_gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_overshoot_toward_target() {
        let mut norm = Normalizer::new(1.0);
        let mut samples = vec![2.0; 64];
        norm.process(&mut samples);
        assert!(samples.iter().all(|&s| s <= 1.01));
    }

    #[test]
    fn leaves_quiet_signal_mostly_untouched() {
        let mut norm = Normalizer::new(1.0);
        let mut samples = vec![0.1; 16];
        norm.process(&mut samples);
        assert!(samples[15] > 0.09);
    }
}
