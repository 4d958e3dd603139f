use crate::math::fft::FftHelper;
use crate::math::stats::StatsHelper;
use crate::prelude::{Complex32, EngineError, EngineResult, ScanConfig, SpectrumFrame};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed transform geometry of the spectrum path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Transform length; each block is split into segments of this size.
    pub fft_size: usize,
    /// Bin count published per frame.
    pub output_bins: usize,
    /// Width, in frames, of the symmetric moving average ahead of detection.
    pub smoothing_width: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            output_bins: 1024,
            smoothing_width: 3,
        }
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.fft_size < 2 || self.fft_size % 2 != 0 {
            return Err(EngineError::InvalidInput(format!(
                "fft_size must be even and at least 2, got {}",
                self.fft_size
            )));
        }
        if self.output_bins == 0
            || (self.fft_size > self.output_bins && self.fft_size % self.output_bins != 0)
        {
            return Err(EngineError::InvalidInput(format!(
                "output_bins {} must divide fft_size {}",
                self.output_bins, self.fft_size
            )));
        }
        if self.smoothing_width == 0 || self.smoothing_width % 2 == 0 {
            return Err(EngineError::InvalidInput(format!(
                "smoothing_width must be odd, got {}",
                self.smoothing_width
            )));
        }
        Ok(())
    }

    /// Number of transform bins averaged into one published bin.
    pub fn decimation(&self) -> usize {
        if self.fft_size > self.output_bins {
            self.fft_size / self.output_bins
        } else {
            1
        }
    }

    pub fn bins_per_frame(&self) -> usize {
        self.fft_size / self.decimation()
    }
}

/// Stream position stamped onto a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameClock {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub offset_s: f64,
}

/// Turns a block of complex samples into a [`SpectrumFrame`].
///
/// Every segment of `fft_size` samples is Hamming-windowed and transformed;
/// segment powers are averaged, neighbouring bins are block-averaged down to
/// `output_bins`, and the result is expressed in dBFS. Output depends only on
/// the block, the scan config and the clock.
pub struct SpectrumProcessor {
    config: ProcessorConfig,
    fft: FftHelper,
}

impl SpectrumProcessor {
    pub fn new(config: ProcessorConfig) -> EngineResult<Self> {
        config.validate()?;
        let fft = FftHelper::new(config.fft_size);
        Ok(Self { config, fft })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Centre frequency of every published bin, ascending.
    pub fn frequency_axis(&self, scan: &ScanConfig) -> Vec<f64> {
        let size = self.config.fft_size as f64;
        let group = self.config.decimation() as f64;
        let resolution = scan.sample_rate_hz as f64 / size;
        let center = scan.center_frequency_hz as f64;
        (0..self.config.bins_per_frame())
            .map(|out_bin| {
                let mid_bin = out_bin as f64 * group + (group - 1.0) / 2.0;
                center + (mid_bin - size / 2.0) * resolution
            })
            .collect()
    }

    pub fn process(
        &mut self,
        block: &[Complex32],
        scan: &ScanConfig,
        clock: FrameClock,
    ) -> EngineResult<SpectrumFrame> {
        let size = self.config.fft_size;
        let segments = block.len() / size;
        if segments == 0 {
            return Err(EngineError::InvalidInput(format!(
                "block of {} samples is shorter than the {}-point transform",
                block.len(),
                size
            )));
        }

        let mut linear = vec![0.0f32; size];
        for segment in block.chunks_exact(size) {
            self.fft.accumulate_power(segment, &mut linear);
        }

        let group = self.config.decimation();
        let scale = 1.0 / (segments * group) as f32;
        let power_dbfs = linear
            .chunks_exact(group)
            .map(|bins| StatsHelper::to_dbfs(bins.iter().sum::<f32>() * scale))
            .collect();

        Ok(SpectrumFrame {
            device_index: scan.device_index,
            sequence: clock.sequence,
            timestamp: clock.timestamp,
            offset_s: clock.offset_s,
            frequencies: self.frequency_axis(scan),
            power_dbfs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn clock() -> FrameClock {
        FrameClock {
            sequence: 7,
            timestamp: Utc::now(),
            offset_s: 0.5,
        }
    }

    fn tone(len: usize, offset_hz: f64, sample_rate: f64, amplitude: f32) -> Vec<Complex32> {
        (0..len)
            .map(|n| {
                let phase = 2.0 * PI * offset_hz * n as f64 / sample_rate;
                Complex32::from_polar(amplitude, phase as f32)
            })
            .collect()
    }

    #[test]
    fn processor_rejects_short_blocks() {
        let mut processor = SpectrumProcessor::new(ProcessorConfig::default()).unwrap();
        let block = vec![Complex32::new(0.0, 0.0); 100];
        let err = processor
            .process(&block, &ScanConfig::default(), clock())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[test]
    fn config_validation() {
        assert!(ProcessorConfig {
            fft_size: 1000,
            output_bins: 300,
            smoothing_width: 3
        }
        .validate()
        .is_err());
        assert!(ProcessorConfig {
            smoothing_width: 2,
            ..Default::default()
        }
        .validate()
        .is_err());
        assert!(ProcessorConfig::default().validate().is_ok());
    }

    #[test]
    fn frequency_axis_is_ascending_and_centered() {
        let processor = SpectrumProcessor::new(ProcessorConfig::default()).unwrap();
        let scan = ScanConfig::default();
        let axis = processor.frequency_axis(&scan);
        assert_eq!(axis.len(), 1024);
        assert!(axis.windows(2).all(|pair| pair[0] < pair[1]));
        let (low, high) = scan.span_hz();
        assert!(axis[0] >= low && axis[axis.len() - 1] < high);
    }

    #[test]
    fn tone_appears_at_its_absolute_frequency() {
        let mut processor = SpectrumProcessor::new(ProcessorConfig::default()).unwrap();
        let scan = ScanConfig::default();
        let resolution = scan.sample_rate_hz as f64 / 2048.0;
        let offset = 200.0 * resolution;
        let block = tone(4096, offset, scan.sample_rate_hz as f64, 10f32.powf(-1.5));

        let frame = processor.process(&block, &scan, clock()).unwrap();
        let (idx, power) = frame.peak().unwrap();
        let expected = scan.center_frequency_hz as f64 + offset;
        assert!((frame.frequencies[idx] - expected).abs() <= resolution);
        assert!(power > -34.0 && power < -29.0, "peak {power}");
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.offset_s, 0.5);
    }

    #[test]
    fn identical_input_gives_bit_identical_frames() {
        let mut processor = SpectrumProcessor::new(ProcessorConfig::default()).unwrap();
        let scan = ScanConfig::default();
        let block = tone(8192, 123_456.0, scan.sample_rate_hz as f64, 0.2);
        let stamp = clock();

        let first = processor.process(&block, &scan, stamp).unwrap();
        let second = processor.process(&block, &scan, stamp).unwrap();
        let first_bits: Vec<u32> = first.power_dbfs.iter().map(|p| p.to_bits()).collect();
        let second_bits: Vec<u32> = second.power_dbfs.iter().map(|p| p.to_bits()).collect();
        assert_eq!(first_bits, second_bits);
        assert_eq!(first, second);
    }

    #[test]
    fn block_averaging_keeps_a_narrow_peak_visible() {
        let config = ProcessorConfig {
            fft_size: 2048,
            output_bins: 256,
            smoothing_width: 1,
        };
        let mut processor = SpectrumProcessor::new(config).unwrap();
        let scan = ScanConfig::default();
        let resolution = scan.sample_rate_hz as f64 / 2048.0;
        // lands on a bin that naive every-8th decimation would skip
        let block = tone(2048, 301.0 * resolution, scan.sample_rate_hz as f64, 0.1);

        let frame = processor.process(&block, &scan, clock()).unwrap();
        assert_eq!(frame.len(), 256);
        let (_, power) = frame.peak().unwrap();
        // -20 dBFS tone spread over an 8-bin group costs at most ~9 dB
        assert!(power > -30.0, "peak {power}");
    }
}
