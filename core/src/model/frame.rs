use crate::model::device::DeviceIndex;
use crate::math::stats::StatsHelper;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One power-vs-frequency snapshot produced from a block of samples.
///
/// `frequencies` and `power_dbfs` are parallel and ordered by increasing
/// frequency. `offset_s` is stream time since the worker started streaming,
/// derived from the sample count rather than the wall clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpectrumFrame {
    pub device_index: DeviceIndex,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub offset_s: f64,
    pub frequencies: Vec<f64>,
    pub power_dbfs: Vec<f32>,
}

impl SpectrumFrame {
    pub fn len(&self) -> usize {
        self.power_dbfs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.power_dbfs.is_empty()
    }

    /// Strongest bin; ties go to the lower frequency.
    pub fn peak(&self) -> Option<(usize, f32)> {
        StatsHelper::argmax(&self.power_dbfs).map(|idx| (idx, self.power_dbfs[idx]))
    }

    pub fn bin_width_hz(&self) -> f64 {
        match self.frequencies.as_slice() {
            [first, second, ..] => second - first,
            _ => 0.0,
        }
    }

    pub fn frequency_range(&self) -> Option<(f64, f64)> {
        Some((*self.frequencies.first()?, *self.frequencies.last()?))
    }
}
