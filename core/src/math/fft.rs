use crate::math::window::hamming;
use num_complex::Complex32;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// Helper that wraps the `rustfft` planner and a Hamming window for reuse.
pub struct FftHelper {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex32>,
    /// Squared coherent gain of the window; a full-scale tone lands at 0 dBFS.
    norm: f32,
}

impl FftHelper {
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let window = hamming(size);
        let coherent: f32 = window.iter().sum();
        Self {
            fft,
            window,
            scratch: Vec::with_capacity(size),
            norm: (coherent * coherent).max(f32::MIN_POSITIVE),
        }
    }

    pub fn size(&self) -> usize {
        self.window.len()
    }

    /// Windows `segment`, transforms it and adds the normalized power of each
    /// bin into `accumulator`, reordered so index 0 is the most negative
    /// frequency offset.
    pub fn accumulate_power(&mut self, segment: &[Complex32], accumulator: &mut [f32]) {
        let size = self.size();
        self.scratch.clear();
        self.scratch.extend(
            segment
                .iter()
                .zip(&self.window)
                .map(|(&sample, &w)| sample * w),
        );
        self.scratch.resize(size, Complex32::zero());

        self.fft.process(&mut self.scratch);

        let half = size / 2;
        for (out_idx, slot) in accumulator.iter_mut().take(size).enumerate() {
            let bin = (out_idx + half) % size;
            *slot += self.scratch[bin].norm_sqr() / self.norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn fft_helper_reports_size() {
        let helper = FftHelper::new(4);
        assert_eq!(helper.size(), 4);
    }

    #[test]
    fn full_scale_tone_lands_near_zero_dbfs_in_shifted_bin() {
        let size = 64;
        let mut helper = FftHelper::new(size);
        let bin = 8;
        let tone: Vec<Complex32> = (0..size)
            .map(|n| Complex32::from_polar(1.0, 2.0 * PI * bin as f32 * n as f32 / size as f32))
            .collect();

        let mut power = vec![0.0; size];
        helper.accumulate_power(&tone, &mut power);

        let peak = power
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, &p)| if p > best.1 { (i, p) } else { best });
        assert_eq!(peak.0, size / 2 + bin);
        assert!((peak.1 - 1.0).abs() < 0.05);
    }

    #[test]
    fn reused_scratch_does_not_leak_between_segments() {
        let size = 32;
        let mut helper = FftHelper::new(size);
        let loud = vec![Complex32::new(0.9, -0.4); size];
        let silent = vec![Complex32::zero(); size];

        let mut first = vec![0.0; size];
        helper.accumulate_power(&loud, &mut first);
        let mut second = vec![0.0; size];
        helper.accumulate_power(&silent, &mut second);
        assert!(second.iter().all(|&p| p == 0.0));

        // a short trailing segment is zero-padded, not topped up with old samples
        let mut short = vec![0.0; size];
        helper.accumulate_power(&silent[..size / 2], &mut short);
        assert!(short.iter().all(|&p| p == 0.0));
        assert_eq!(helper.size(), size);
    }
}
