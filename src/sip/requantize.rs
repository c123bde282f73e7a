//! Requantization: converts the engine's internal `f32` working format down
//! to a target bit depth with triangular dither, applied just before a
//! chunk leaves the SIP pipeline for a sink whose encoder wants fixed-point
//! samples (system-audio, Scream, RTP).

use crate::formats::SampleFormat;
use rand::Rng;

pub fn requantize(samples: &[f32], target: SampleFormat, rng: &mut impl Rng) -> Vec<u8> {
    let bytes_per_sample = target.bytes_per_sample();
    let mut out = vec![0u8; samples.len() * bytes_per_sample];
    let dither_lsb = 1.0 / (1u64 << (target.bit_depth() - 1)) as f32;
    for (i, &s) in samples.iter().enumerate() {
        let dither = (rng.random::<f32>() - rng.random::<f32>()) * dither_lsb;
        let dest = &mut out[i * bytes_per_sample..(i + 1) * bytes_per_sample];
        target.write_sample(s + dither, dest);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_length_matches_sample_count_and_depth() {
        let mut rng = rand::rng();
        let samples = vec![0.0f32; 10];
        let out = requantize(&samples, SampleFormat::S16, &mut rng);
        assert_eq!(out.len(), 20);
    }

    #[test]
    fn silence_stays_near_zero() {
        let mut rng = rand::rng();
        let samples = vec![0.0f32; 2];
        let out = requantize(&samples, SampleFormat::S16, &mut rng);
        let v = i16::from_le_bytes([out[0], out[1]]);
        assert!(v.abs() < 10);
    }
}
