use crate::model::device::{DeviceIndex, HardwareCaps};
use crate::prelude::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

const MIN_THRESHOLD_DBFS: f32 = -200.0;
const MAX_THRESHOLD_DBFS: f32 = 0.0;
const MAX_MIN_BURST_DURATION_S: f64 = 3600.0;

/// Immutable snapshot of everything a worker needs to scan one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub device_index: DeviceIndex,
    pub center_frequency_hz: u64,
    pub sample_rate_hz: u32,
    pub gain_db: f32,
    pub ppm_correction: i32,
    pub threshold_dbfs: f32,
    pub min_burst_duration_s: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            center_frequency_hz: 433_920_000,
            sample_rate_hz: 2_048_000,
            gain_db: 40.0,
            ppm_correction: 0,
            threshold_dbfs: -35.0,
            min_burst_duration_s: 0.1,
        }
    }
}

impl ScanConfig {
    pub fn for_device(device_index: DeviceIndex) -> Self {
        Self {
            device_index,
            ..Default::default()
        }
    }

    /// Checks every field against `caps` and returns the normalized snapshot
    /// (gain snapped to a hardware step).
    pub fn validate(&self, caps: &HardwareCaps) -> EngineResult<ScanConfig> {
        if !caps.supports_frequency(self.center_frequency_hz) {
            return Err(EngineError::out_of_range(
                "center_frequency_hz",
                format!(
                    "{} Hz outside {}..={} Hz",
                    self.center_frequency_hz, caps.min_frequency_hz, caps.max_frequency_hz
                ),
            ));
        }
        if !caps.supports_sample_rate(self.sample_rate_hz) {
            return Err(EngineError::out_of_range(
                "sample_rate_hz",
                format!("{} Hz is not a supported rate", self.sample_rate_hz),
            ));
        }
        let gain_db = caps.quantize_gain(self.gain_db).ok_or_else(|| {
            EngineError::out_of_range("gain_db", format!("{} dB outside gain table", self.gain_db))
        })?;
        if self.ppm_correction.abs() > caps.max_ppm {
            return Err(EngineError::out_of_range(
                "ppm_correction",
                format!("{} exceeds ±{}", self.ppm_correction, caps.max_ppm),
            ));
        }
        if !self.threshold_dbfs.is_finite()
            || !(MIN_THRESHOLD_DBFS..=MAX_THRESHOLD_DBFS).contains(&self.threshold_dbfs)
        {
            return Err(EngineError::out_of_range(
                "threshold_dbfs",
                format!(
                    "{} outside {}..={} dBFS",
                    self.threshold_dbfs, MIN_THRESHOLD_DBFS, MAX_THRESHOLD_DBFS
                ),
            ));
        }
        if !self.min_burst_duration_s.is_finite()
            || !(0.0..=MAX_MIN_BURST_DURATION_S).contains(&self.min_burst_duration_s)
        {
            return Err(EngineError::out_of_range(
                "min_burst_duration_s",
                format!("{} s", self.min_burst_duration_s),
            ));
        }

        Ok(ScanConfig {
            gain_db,
            ..self.clone()
        })
    }

    /// Overlays a partial change; fields absent from `request` keep their value.
    pub fn apply(&self, request: &TuneRequest) -> ScanConfig {
        ScanConfig {
            device_index: self.device_index,
            center_frequency_hz: request
                .center_frequency_hz
                .unwrap_or(self.center_frequency_hz),
            sample_rate_hz: request.sample_rate_hz.unwrap_or(self.sample_rate_hz),
            gain_db: request.gain_db.unwrap_or(self.gain_db),
            ppm_correction: request.ppm_correction.unwrap_or(self.ppm_correction),
            threshold_dbfs: request.threshold_dbfs.unwrap_or(self.threshold_dbfs),
            min_burst_duration_s: request
                .min_burst_duration_s
                .unwrap_or(self.min_burst_duration_s),
        }
    }

    /// True when the hardware must be reprogrammed to go from `self` to `other`.
    pub fn rf_differs(&self, other: &ScanConfig) -> bool {
        self.center_frequency_hz != other.center_frequency_hz
            || self.sample_rate_hz != other.sample_rate_hz
            || self.gain_db != other.gain_db
            || self.ppm_correction != other.ppm_correction
    }

    /// Lowest and highest frequency visible at this tuning.
    pub fn span_hz(&self) -> (f64, f64) {
        let center = self.center_frequency_hz as f64;
        let half = self.sample_rate_hz as f64 / 2.0;
        (center - half, center + half)
    }
}

/// Partial [`ScanConfig`] accepted by the tuning path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuneRequest {
    pub center_frequency_hz: Option<u64>,
    pub sample_rate_hz: Option<u32>,
    pub gain_db: Option<f32>,
    pub ppm_correction: Option<i32>,
    pub threshold_dbfs: Option<f32>,
    pub min_burst_duration_s: Option<f64>,
}

impl TuneRequest {
    pub fn is_empty(&self) -> bool {
        *self == TuneRequest::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates_with_quantized_gain() {
        let config = ScanConfig::default()
            .validate(&HardwareCaps::rtl_sdr())
            .unwrap();
        assert_eq!(config.gain_db, 40.2);
        assert_eq!(config.center_frequency_hz, 433_920_000);
    }

    #[test]
    fn out_of_range_fields_are_named() {
        let caps = HardwareCaps::rtl_sdr();
        let cases = [
            (
                ScanConfig {
                    center_frequency_hz: 10_000,
                    ..Default::default()
                },
                "center_frequency_hz",
            ),
            (
                ScanConfig {
                    sample_rate_hz: 1_000_000,
                    ..Default::default()
                },
                "sample_rate_hz",
            ),
            (
                ScanConfig {
                    gain_db: 70.0,
                    ..Default::default()
                },
                "gain_db",
            ),
            (
                ScanConfig {
                    ppm_correction: 5000,
                    ..Default::default()
                },
                "ppm_correction",
            ),
            (
                ScanConfig {
                    threshold_dbfs: f32::NAN,
                    ..Default::default()
                },
                "threshold_dbfs",
            ),
            (
                ScanConfig {
                    min_burst_duration_s: -1.0,
                    ..Default::default()
                },
                "min_burst_duration_s",
            ),
        ];

        for (config, expected) in cases {
            match config.validate(&caps) {
                Err(EngineError::OutOfRange { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected OutOfRange for {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn apply_keeps_unspecified_fields() {
        let base = ScanConfig::for_device(3);
        let tuned = base.apply(&TuneRequest {
            gain_db: Some(20.7),
            ..Default::default()
        });
        assert_eq!(tuned.device_index, 3);
        assert_eq!(tuned.gain_db, 20.7);
        assert_eq!(tuned.center_frequency_hz, base.center_frequency_hz);
        assert!(base.rf_differs(&tuned));
    }

    #[test]
    fn threshold_change_is_not_an_rf_change() {
        let base = ScanConfig::default();
        let tuned = base.apply(&TuneRequest {
            threshold_dbfs: Some(-50.0),
            min_burst_duration_s: Some(0.5),
            ..Default::default()
        });
        assert!(!base.rf_differs(&tuned));
    }

    #[test]
    fn tune_request_parses_partial_json() {
        let request: TuneRequest =
            serde_json::from_str(r#"{"center_frequency_hz": 868000000}"#).unwrap();
        assert_eq!(request.center_frequency_hz, Some(868_000_000));
        assert!(request.gain_db.is_none());
        assert!(!request.is_empty());
        assert!(TuneRequest::default().is_empty());
    }
}
