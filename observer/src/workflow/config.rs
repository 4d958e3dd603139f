use crate::generator::profile::SyntheticDeviceProfile;
use anyhow::{ensure, Context};
use rfcore::hub::HubConfig;
use rfcore::prelude::{DeviceIndex, ScanConfig};
use rfcore::recorder::RecorderConfig;
use rfcore::EngineConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Which bursts keep their raw samples.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapturePolicy {
    pub enabled: bool,
    /// Only bursts this far above their threshold are captured.
    pub margin_db: f32,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            margin_db: 10.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub data_dir: PathBuf,
    pub bind: SocketAddr,
    /// Start every device as soon as the bridge comes up.
    pub autostart: bool,
    pub capture: CapturePolicy,
    pub engine: EngineConfig,
    pub hub: HubConfig,
    pub devices: Vec<SyntheticDeviceProfile>,
    /// Start configs; devices without one scan the defaults.
    pub scans: Vec<ScanConfig>,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            bind: SocketAddr::from(([127, 0, 0, 1], 9000)),
            autostart: false,
            capture: CapturePolicy::default(),
            engine: EngineConfig::default(),
            hub: HubConfig::default(),
            devices: vec![SyntheticDeviceProfile::numbered(0)],
            scans: Vec::new(),
        }
    }
}

impl ObserverConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading observer config {}", path_ref.display()))?;
        let config: ObserverConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing observer config {}", path_ref.display()))?;
        config
            .validate()
            .with_context(|| format!("checking observer config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(devices: usize, data_dir: PathBuf, capture: bool) -> Self {
        Self {
            data_dir,
            capture: CapturePolicy {
                enabled: capture,
                ..Default::default()
            },
            devices: (0..devices.max(1) as DeviceIndex)
                .map(SyntheticDeviceProfile::numbered)
                .collect(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.devices.is_empty(), "at least one device profile is required");
        let mut seen = HashSet::new();
        for profile in &self.devices {
            ensure!(
                seen.insert(profile.index),
                "device index {} is listed twice",
                profile.index
            );
        }
        for scan in &self.scans {
            ensure!(
                seen.contains(&scan.device_index),
                "scan config for unknown device {}",
                scan.device_index
            );
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("bursts.jsonl")
    }

    pub fn report_path(&self) -> PathBuf {
        self.data_dir.join("offline_report.log")
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            capture_enabled: self.capture.enabled,
            capture_margin_db: self.capture.margin_db,
            capture_dir: self.data_dir.join("captures"),
            ..Default::default()
        }
    }

    pub fn scan_for(&self, index: DeviceIndex) -> ScanConfig {
        self.scans
            .iter()
            .find(|scan| scan.device_index == index)
            .cloned()
            .unwrap_or_else(|| ScanConfig::for_device(index))
    }
}
