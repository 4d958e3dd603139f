use crate::prelude::{Burst, DeviceIndex, ScanConfig, SpectrumFrame};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Detector constants that are not part of the per-device scan config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// A burst ends once the peak drops this far below `threshold_dbfs`.
    pub hysteresis_db: f32,
    /// Bins within this distance of the burst peak count towards bandwidth.
    pub bandwidth_margin_db: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            hysteresis_db: 3.0,
            bandwidth_margin_db: 3.0,
        }
    }
}

/// A finished burst together with its span in stream time.
#[derive(Debug, Clone, PartialEq)]
pub struct BurstEnd {
    pub burst: Burst,
    pub start_offset_s: f64,
    pub end_offset_s: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectorEvent {
    Began {
        offset_s: f64,
        frequency_hz: f64,
        power_dbfs: f32,
    },
    Ended(BurstEnd),
}

#[derive(Debug, Clone)]
struct ActiveBurst {
    start_offset_s: f64,
    start_time: DateTime<Utc>,
    peak_power_dbfs: f32,
    peak_frequency_hz: f64,
    low_edge_hz: f64,
    high_edge_hz: f64,
}

#[derive(Debug, Clone)]
enum DetectorState {
    Idle,
    InBurst(ActiveBurst),
}

/// Per-device burst state machine fed with smoothed frames in stream order.
pub struct BurstDetector {
    device_index: DeviceIndex,
    config: DetectorConfig,
    state: DetectorState,
    discarded: u64,
}

impl BurstDetector {
    pub fn new(device_index: DeviceIndex, config: DetectorConfig) -> Self {
        Self {
            device_index,
            config,
            state: DetectorState::Idle,
            discarded: 0,
        }
    }

    pub fn in_burst(&self) -> bool {
        matches!(self.state, DetectorState::InBurst(_))
    }

    /// Bursts that ended before reaching the minimum duration.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Drops any burst in progress without emitting it.
    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
    }

    pub fn on_frame(&mut self, frame: &SpectrumFrame, scan: &ScanConfig) -> Option<DetectorEvent> {
        let (peak_idx, peak_power) = frame.peak()?;
        let margin_db = self.config.bandwidth_margin_db;

        match &mut self.state {
            DetectorState::Idle => {
                if peak_power <= scan.threshold_dbfs {
                    return None;
                }
                let level = span_level(peak_power, margin_db, scan);
                let (low_edge_hz, high_edge_hz) =
                    occupied_span(frame, peak_idx, level).unwrap_or_default();
                let frequency_hz = frame.frequencies[peak_idx];
                self.state = DetectorState::InBurst(ActiveBurst {
                    start_offset_s: frame.offset_s,
                    start_time: frame.timestamp,
                    peak_power_dbfs: peak_power,
                    peak_frequency_hz: frequency_hz,
                    low_edge_hz,
                    high_edge_hz,
                });
                Some(DetectorEvent::Began {
                    offset_s: frame.offset_s,
                    frequency_hz,
                    power_dbfs: peak_power,
                })
            }
            DetectorState::InBurst(active) => {
                let end_threshold = scan.threshold_dbfs - self.config.hysteresis_db;
                if peak_power >= end_threshold {
                    if peak_power > active.peak_power_dbfs {
                        active.peak_power_dbfs = peak_power;
                        active.peak_frequency_hz = frame.frequencies[peak_idx];
                    }
                    // a fading frame only widens the burst where it still
                    // reaches the band around the burst peak
                    let level = span_level(active.peak_power_dbfs, margin_db, scan);
                    if let Some((low, high)) = occupied_span(frame, peak_idx, level) {
                        active.low_edge_hz = active.low_edge_hz.min(low);
                        active.high_edge_hz = active.high_edge_hz.max(high);
                    }
                    return None;
                }

                let active = active.clone();
                self.state = DetectorState::Idle;
                let duration_s = frame.offset_s - active.start_offset_s;
                if duration_s < scan.min_burst_duration_s {
                    self.discarded += 1;
                    return None;
                }

                Some(DetectorEvent::Ended(BurstEnd {
                    burst: Burst {
                        id: Uuid::new_v4(),
                        device_id: self.device_index,
                        frequency_hz: active.peak_frequency_hz,
                        peak_power_dbfs: active.peak_power_dbfs,
                        timestamp: active.start_time,
                        duration_s,
                        bandwidth_hz: active.high_edge_hz - active.low_edge_hz,
                        capture_ref: None,
                    },
                    start_offset_s: active.start_offset_s,
                    end_offset_s: frame.offset_s,
                }))
            }
        }
    }
}

/// Lowest power a bin may have and still count towards bandwidth.
fn span_level(reference_dbfs: f32, margin_db: f32, scan: &ScanConfig) -> f32 {
    (reference_dbfs - margin_db).max(scan.threshold_dbfs)
}

/// Edges of the contiguous run of bins around `peak_idx` at or above
/// `level`, or `None` when the peak bin itself falls short.
fn occupied_span(frame: &SpectrumFrame, peak_idx: usize, level: f32) -> Option<(f64, f64)> {
    let power = &frame.power_dbfs;
    if power[peak_idx] < level {
        return None;
    }

    let mut left = peak_idx;
    while left > 0 && power[left - 1] >= level {
        left -= 1;
    }
    let mut right = peak_idx;
    while right + 1 < power.len() && power[right + 1] >= level {
        right += 1;
    }

    let half_bin = frame.bin_width_hz() / 2.0;
    Some((
        frame.frequencies[left] - half_bin,
        frame.frequencies[right] + half_bin,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BINS: usize = 16;
    const FRAME_PERIOD_S: f64 = 0.01;

    fn scan(threshold_dbfs: f32, min_burst_duration_s: f64) -> ScanConfig {
        ScanConfig {
            threshold_dbfs,
            min_burst_duration_s,
            ..Default::default()
        }
    }

    fn frame(index: u64, peaks: &[(usize, f32)]) -> SpectrumFrame {
        let mut power_dbfs = vec![-90.0; BINS];
        for &(bin, level) in peaks {
            power_dbfs[bin] = level;
        }
        SpectrumFrame {
            device_index: 0,
            sequence: index,
            timestamp: Utc::now(),
            offset_s: index as f64 * FRAME_PERIOD_S,
            frequencies: (0..BINS).map(|i| 1_000.0 + i as f64 * 100.0).collect(),
            power_dbfs,
        }
    }

    /// Frames above `high` for `active_frames`, then at `low`.
    fn run_trace(
        detector: &mut BurstDetector,
        config: &ScanConfig,
        active_frames: u64,
        total_frames: u64,
        high: f32,
        low: f32,
    ) -> Vec<BurstEnd> {
        (0..total_frames)
            .filter_map(|i| {
                let level = if i < active_frames { high } else { low };
                detector.on_frame(&frame(i, &[(5, level)]), config)
            })
            .filter_map(|event| match event {
                DetectorEvent::Ended(end) => Some(end),
                DetectorEvent::Began { .. } => None,
            })
            .collect()
    }

    #[test]
    fn long_burst_is_emitted_with_its_duration() {
        let mut detector = BurstDetector::new(0, DetectorConfig::default());
        let config = scan(-35.0, 0.1);
        let ends = run_trace(&mut detector, &config, 15, 30, -30.0, -60.0);

        assert_eq!(ends.len(), 1);
        let burst = &ends[0].burst;
        assert!((burst.duration_s - 0.15).abs() < 1e-9);
        assert_eq!(burst.peak_power_dbfs, -30.0);
        assert_eq!(burst.frequency_hz, 1_500.0);
        assert_eq!(burst.device_id, 0);
        assert!(!detector.in_burst());
    }

    #[test]
    fn short_burst_is_discarded_silently() {
        let mut detector = BurstDetector::new(0, DetectorConfig::default());
        let config = scan(-35.0, 0.1);
        let ends = run_trace(&mut detector, &config, 8, 30, -30.0, -60.0);

        assert!(ends.is_empty());
        assert_eq!(detector.discarded(), 1);
        assert!(!detector.in_burst());
    }

    #[test]
    fn duration_never_below_minimum() {
        for min_ms in [0u32, 20, 50, 90, 130] {
            for active in 1..20u64 {
                let mut detector = BurstDetector::new(0, DetectorConfig::default());
                let config = scan(-35.0, min_ms as f64 / 1000.0);
                for end in run_trace(&mut detector, &config, active, 25, -20.0, -70.0) {
                    assert!(end.burst.duration_s >= config.min_burst_duration_s);
                }
            }
        }
    }

    #[test]
    fn hysteresis_holds_burst_open_between_thresholds() {
        let mut detector = BurstDetector::new(0, DetectorConfig::default());
        let config = scan(-35.0, 0.0);
        detector.on_frame(&frame(0, &[(5, -30.0)]), &config);
        // below detection threshold but above the burst-end level
        assert!(detector.on_frame(&frame(1, &[(5, -36.5)]), &config).is_none());
        assert!(detector.in_burst());
        let ended = detector.on_frame(&frame(2, &[(5, -40.0)]), &config);
        assert!(matches!(ended, Some(DetectorEvent::Ended(_))));
    }

    #[test]
    fn tie_reports_lower_frequency() {
        let mut detector = BurstDetector::new(0, DetectorConfig::default());
        let config = scan(-35.0, 0.0);
        let began = detector
            .on_frame(&frame(0, &[(3, -20.0), (9, -20.0)]), &config)
            .unwrap();
        assert_eq!(
            began,
            DetectorEvent::Began {
                offset_s: 0.0,
                frequency_hz: 1_300.0,
                power_dbfs: -20.0
            }
        );
    }

    #[test]
    fn peak_and_bandwidth_follow_strongest_frames() {
        let mut detector = BurstDetector::new(2, DetectorConfig::default());
        let config = scan(-35.0, 0.0);
        detector.on_frame(&frame(0, &[(5, -30.0)]), &config);
        detector.on_frame(&frame(1, &[(7, -25.0), (8, -26.0)]), &config);
        let end = match detector.on_frame(&frame(2, &[]), &config) {
            Some(DetectorEvent::Ended(end)) => end,
            other => panic!("expected burst end, got {other:?}"),
        };

        assert_eq!(end.burst.peak_power_dbfs, -25.0);
        assert_eq!(end.burst.frequency_hz, 1_700.0);
        // bins 5..=8 in 100 Hz steps, half a bin past each outer edge
        assert_eq!(end.burst.bandwidth_hz, 400.0);
        assert_eq!(end.burst.device_id, 2);
        assert_eq!(end.start_offset_s, 0.0);
        assert_eq!(end.end_offset_s, 0.02);
    }

    fn finish(detector: &mut BurstDetector, config: &ScanConfig, index: u64) -> BurstEnd {
        match detector.on_frame(&frame(index, &[]), config) {
            Some(DetectorEvent::Ended(end)) => end,
            other => panic!("expected burst end, got {other:?}"),
        }
    }

    #[test]
    fn bins_below_threshold_never_widen_an_active_burst() {
        let config = scan(-35.0, 0.0);

        let mut detector = BurstDetector::new(0, DetectorConfig::default());
        detector.on_frame(&frame(0, &[(5, -30.0)]), &config);
        detector.on_frame(&frame(1, &[(4, -36.5), (5, -34.0), (6, -36.5)]), &config);
        assert_eq!(finish(&mut detector, &config, 2).burst.bandwidth_hz, 100.0);

        // even with a wide margin the floor stays at the detection threshold
        let wide = DetectorConfig {
            bandwidth_margin_db: 10.0,
            ..Default::default()
        };
        let mut detector = BurstDetector::new(0, wide);
        detector.on_frame(&frame(0, &[(5, -30.0)]), &config);
        detector.on_frame(&frame(1, &[(4, -36.5), (5, -31.0), (6, -36.5)]), &config);
        assert_eq!(finish(&mut detector, &config, 2).burst.bandwidth_hz, 100.0);
    }

    #[test]
    fn fading_frames_are_measured_against_the_burst_peak() {
        let mut detector = BurstDetector::new(0, DetectorConfig::default());
        let config = scan(-35.0, 0.0);
        detector.on_frame(&frame(0, &[(5, -20.0)]), &config);
        // within 3 dB of its own peak but far below the burst peak
        detector.on_frame(&frame(1, &[(4, -31.0), (5, -30.0), (6, -31.0)]), &config);
        detector.on_frame(&frame(2, &[(4, -22.0), (5, -21.0)]), &config);
        let end = finish(&mut detector, &config, 3);
        assert_eq!(end.burst.peak_power_dbfs, -20.0);
        // bins 4..=5
        assert_eq!(end.burst.bandwidth_hz, 200.0);
    }

    #[test]
    fn reset_discards_burst_in_progress() {
        let mut detector = BurstDetector::new(0, DetectorConfig::default());
        let config = scan(-35.0, 0.0);
        detector.on_frame(&frame(0, &[(5, -30.0)]), &config);
        detector.reset();
        assert!(detector.on_frame(&frame(1, &[]), &config).is_none());
    }
}
