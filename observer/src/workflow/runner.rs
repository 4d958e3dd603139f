use crate::generator::driver::SyntheticDriver;
use crate::workflow::config::ObserverConfig;
use anyhow::Context;
use rfcore::acquisition::{DeviceSnapshot, WorkerState};
use rfcore::hub::SubscriptionHub;
use rfcore::prelude::{Burst, DeviceIndex};
use rfcore::recorder::{BurstRecorder, JsonLinesStore, RecorderStats};
use rfcore::AcquisitionSupervisor;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(10);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const STALL_TIMEOUT: Duration = Duration::from_secs(120);

pub struct RunSummary {
    pub devices: Vec<DeviceSnapshot>,
    /// Newest first.
    pub bursts: Vec<Burst>,
    pub recorder: RecorderStats,
    pub store_path: PathBuf,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for device in &self.devices {
            writeln!(
                f,
                "device={} serial={} status={:?} frames={} bursts={} discarded={} read_errors={} restarts={}",
                device.index,
                device.serial,
                device.status,
                device.metrics.frames,
                device.metrics.bursts,
                device.metrics.discarded,
                device.metrics.read_errors,
                device.restarts
            )?;
        }
        for burst in self.bursts.iter().rev() {
            writeln!(
                f,
                "burst device={} freq={:.0} power={:.1} duration={:.3} bandwidth={:.0} capture={}",
                burst.device_id,
                burst.frequency_hz,
                burst.peak_power_dbfs,
                burst.duration_s,
                burst.bandwidth_hz,
                burst.capture_ref.as_deref().unwrap_or("-")
            )?;
        }
        write!(
            f,
            "persisted={} persistence_failures={} captures={} capture_failures={} store={}",
            self.recorder.persisted,
            self.recorder.persistence_failures,
            self.recorder.captures_written,
            self.recorder.capture_failures,
            self.store_path.display()
        )
    }
}

/// Wires the synthetic fleet, burst store, hub and supervisor together.
pub struct Runner {
    config: ObserverConfig,
    supervisor: Arc<AcquisitionSupervisor>,
}

impl Runner {
    pub fn new(config: ObserverConfig, realtime: bool) -> anyhow::Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
        let store = JsonLinesStore::open(config.store_path())
            .with_context(|| format!("opening burst store {}", config.store_path().display()))?;
        let recorder = BurstRecorder::new(config.recorder_config(), Arc::new(store))
            .context("starting burst recorder")?;
        let driver = SyntheticDriver::new(&config.devices, realtime);
        let supervisor = AcquisitionSupervisor::new(
            Arc::new(driver),
            Arc::new(SubscriptionHub::new(config.hub.clone())),
            Arc::new(recorder),
            config.engine.clone(),
        )
        .context("building acquisition supervisor")?;

        Ok(Self {
            config,
            supervisor: Arc::new(supervisor),
        })
    }

    pub fn supervisor(&self) -> &Arc<AcquisitionSupervisor> {
        &self.supervisor
    }

    /// Starts every listed device with its configured scan.
    pub fn start_all(&self) -> anyhow::Result<Vec<DeviceIndex>> {
        let mut started = Vec::new();
        for device in self.supervisor.list_devices() {
            let index = device.info.index;
            let applied = self
                .supervisor
                .start(index, self.config.scan_for(index))
                .with_context(|| format!("starting device {}", index))?;
            log::info!(
                "device {} scanning {} Hz at {} S/s",
                index,
                applied.center_frequency_hz,
                applied.sample_rate_hz
            );
            started.push(index);
        }
        Ok(started)
    }

    /// Processes `seconds` of signal on every device, then stops them and
    /// waits for the recorder to settle.
    pub fn run_offline(&self, seconds: f64) -> anyhow::Result<RunSummary> {
        let started = self.start_all()?;
        let block_len = self.config.engine.block_len as f64;
        let targets: Vec<(DeviceIndex, u64)> = started
            .iter()
            .map(|&index| {
                let rate = self.config.scan_for(index).sample_rate_hz as f64;
                (index, (seconds * rate / block_len).ceil() as u64)
            })
            .collect();

        for (index, frames) in &targets {
            self.await_frames(*index, *frames);
        }
        for index in &started {
            self.supervisor
                .stop(*index)
                .with_context(|| format!("stopping device {}", index))?;
        }
        if !self.supervisor.recorder().wait_idle(DRAIN_TIMEOUT) {
            log::warn!("capture writer still busy after {:?}", DRAIN_TIMEOUT);
        }
        Ok(self.summary())
    }

    fn await_frames(&self, index: DeviceIndex, frames: u64) {
        let started = Instant::now();
        loop {
            let Ok(status) = self.supervisor.device_status(index) else {
                return;
            };
            let finished = matches!(
                status.worker_state,
                Some(WorkerState::Stopped) | Some(WorkerState::Error)
            );
            if status.metrics.frames >= frames || finished {
                return;
            }
            if started.elapsed() > STALL_TIMEOUT {
                log::warn!("device {} stalled at {} frames", index, status.metrics.frames);
                return;
            }
            thread::sleep(POLL);
        }
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            devices: self.supervisor.snapshot(),
            bursts: self
                .supervisor
                .recorder()
                .recent_bursts(self.supervisor.recorder().config().recent_limit),
            recorder: self.supervisor.recorder().stats(),
            store_path: self.config.store_path(),
        }
    }

    pub fn shutdown(&self) {
        self.supervisor.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::profile::{EmitterProfile, SyntheticDeviceProfile};
    use rfcore::prelude::DeviceStatus;

    fn two_burst_config(data_dir: PathBuf) -> ObserverConfig {
        let mut profile = SyntheticDeviceProfile::numbered(0);
        profile.emitters = vec![EmitterProfile {
            frequency_hz: 434_020_000.0,
            power_dbfs: -20.0,
            burst_s: 0.25,
            period_s: 1.0,
            first_burst_s: 0.5,
        }];
        ObserverConfig {
            devices: vec![profile],
            ..ObserverConfig::from_args(1, data_dir, false)
        }
    }

    #[test]
    fn offline_run_detects_and_persists_each_burst() {
        let dir = tempfile::tempdir().unwrap();
        let config = two_burst_config(dir.path().to_path_buf());
        let runner = Runner::new(config.clone(), false).unwrap();
        let summary = runner.run_offline(2.0).unwrap();

        assert_eq!(summary.bursts.len(), 2, "{}", summary);
        for burst in &summary.bursts {
            assert!((burst.duration_s - 0.25).abs() < 0.05, "{}", summary);
            assert!((burst.frequency_hz - 434_020_000.0).abs() <= 2_000.0);
        }
        assert_eq!(summary.devices[0].status, DeviceStatus::Idle);
        assert_eq!(summary.recorder.persisted, 2);

        runner.shutdown();
        let (devices, rows) = JsonLinesStore::load(config.store_path()).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn unknown_scan_device_is_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = two_burst_config(dir.path().to_path_buf());
        config.scans.push(rfcore::prelude::ScanConfig::for_device(5));
        assert!(Runner::new(config, false).is_err());
    }

    #[test]
    fn summary_lists_every_device() {
        let dir = tempfile::tempdir().unwrap();
        let config = ObserverConfig::from_args(2, dir.path().to_path_buf(), false);
        let runner = Runner::new(config, false).unwrap();
        let summary = runner.summary();
        assert_eq!(summary.devices.len(), 2);
        assert!(summary.bursts.is_empty());
        assert!(summary.to_string().contains("serial=SYN00001"));
    }
}
