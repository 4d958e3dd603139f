use rfcore::prelude::{DeviceIndex, DeviceInfo};
use serde::{Deserialize, Serialize};

/// One periodic transmitter heard by a synthetic receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterProfile {
    pub frequency_hz: f64,
    pub power_dbfs: f32,
    pub burst_s: f64,
    pub period_s: f64,
    /// Stream time of the first burst.
    pub first_burst_s: f64,
}

impl Default for EmitterProfile {
    fn default() -> Self {
        Self {
            frequency_hz: 434_020_000.0,
            power_dbfs: -30.0,
            burst_s: 0.25,
            period_s: 4.0,
            first_burst_s: 1.0,
        }
    }
}

impl EmitterProfile {
    pub fn is_keyed(&self, t: f64) -> bool {
        if t < self.first_burst_s || self.burst_s <= 0.0 {
            return false;
        }
        let since = t - self.first_burst_s;
        if self.period_s <= 0.0 {
            return since < self.burst_s;
        }
        since % self.period_s < self.burst_s
    }

    pub fn amplitude(&self) -> f64 {
        10f64.powf(self.power_dbfs as f64 / 20.0)
    }
}

/// A seeded, reproducible receiver: who it claims to be and what it hears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticDeviceProfile {
    pub index: DeviceIndex,
    pub name: String,
    pub serial: String,
    pub emitters: Vec<EmitterProfile>,
    /// Total noise power per sample.
    pub noise_dbfs: f32,
    pub seed: u64,
}

impl Default for SyntheticDeviceProfile {
    fn default() -> Self {
        Self::numbered(0)
    }
}

impl SyntheticDeviceProfile {
    /// Profile `index` of a default fleet; each receiver hears its emitter at
    /// a different offset so their spectra are told apart.
    pub fn numbered(index: DeviceIndex) -> Self {
        let emitter = EmitterProfile {
            frequency_hz: 434_020_000.0 + index as f64 * 50_000.0,
            ..Default::default()
        };
        Self {
            index,
            name: "Synthetic RTL2832U".into(),
            serial: format!("SYN{:05}", index),
            emitters: vec![emitter],
            noise_dbfs: -40.0,
            seed: 0x5eed_0000 + index as u64,
        }
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo::new(self.index, self.name.clone(), self.serial.clone())
    }

    /// Half-width of the uniform I and Q noise components giving `noise_dbfs`.
    pub fn noise_half_width(&self) -> f32 {
        let variance = 10f32.powf(self.noise_dbfs / 10.0);
        (1.5 * variance).sqrt()
    }
}
