use serde::{Deserialize, Serialize};

/// Stable integer identity of a receiver, as assigned by enumeration.
pub type DeviceIndex = u32;

/// Tuner gain table of the R820T, in dB.
const R820T_GAIN_STEPS_DB: [f32; 29] = [
    0.0, 0.9, 1.4, 2.7, 3.7, 7.7, 8.7, 12.5, 14.4, 15.7, 16.6, 19.7, 20.7, 22.9, 25.4, 28.0,
    29.7, 32.8, 33.8, 36.4, 37.2, 38.6, 40.2, 42.1, 43.4, 43.9, 44.5, 48.0, 49.6,
];

/// Gain values within this distance of the advertised range are snapped onto it.
const GAIN_TOLERANCE_DB: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Disconnected,
    Idle,
    Scanning,
    Error,
}

/// Identity reported by the driver at enumeration time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub index: DeviceIndex,
    pub name: String,
    pub serial: String,
}

impl DeviceInfo {
    pub fn new(index: DeviceIndex, name: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            serial: serial.into(),
        }
    }
}

/// Device as listed to polling clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(flatten)]
    pub info: DeviceInfo,
    pub status: DeviceStatus,
}

/// Tuning limits advertised by a receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareCaps {
    pub min_frequency_hz: u64,
    pub max_frequency_hz: u64,
    pub sample_rates_hz: Vec<u32>,
    pub gain_steps_db: Vec<f32>,
    pub max_ppm: i32,
}

impl HardwareCaps {
    /// Limits of a stock RTL2832U dongle with an R820T tuner.
    pub fn rtl_sdr() -> Self {
        Self {
            min_frequency_hz: 24_000_000,
            max_frequency_hz: 1_766_000_000,
            sample_rates_hz: vec![
                250_000, 1_024_000, 1_536_000, 1_792_000, 1_920_000, 2_048_000, 2_160_000,
                2_400_000, 2_560_000, 2_880_000, 3_200_000,
            ],
            gain_steps_db: R820T_GAIN_STEPS_DB.to_vec(),
            max_ppm: 1000,
        }
    }

    pub fn supports_frequency(&self, frequency_hz: u64) -> bool {
        (self.min_frequency_hz..=self.max_frequency_hz).contains(&frequency_hz)
    }

    pub fn supports_sample_rate(&self, sample_rate_hz: u32) -> bool {
        self.sample_rates_hz.contains(&sample_rate_hz)
    }

    /// Snaps `gain_db` to the nearest advertised step, or `None` outside the table.
    ///
    /// An empty table means the receiver accepts any finite gain.
    pub fn quantize_gain(&self, gain_db: f32) -> Option<f32> {
        if !gain_db.is_finite() {
            return None;
        }
        if self.gain_steps_db.is_empty() {
            return Some(gain_db);
        }

        let lowest = self.gain_steps_db.iter().copied().fold(f32::INFINITY, f32::min);
        let highest = self
            .gain_steps_db
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        if gain_db < lowest - GAIN_TOLERANCE_DB || gain_db > highest + GAIN_TOLERANCE_DB {
            return None;
        }

        let mut nearest = self.gain_steps_db[0];
        for &step in &self.gain_steps_db[1..] {
            // strict comparison keeps the lower step on an exact midpoint
            if (step - gain_db).abs() < (nearest - gain_db).abs() {
                nearest = step;
            }
        }
        Some(nearest)
    }
}

impl Default for HardwareCaps {
    fn default() -> Self {
        Self::rtl_sdr()
    }
}
