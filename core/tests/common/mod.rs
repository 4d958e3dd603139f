#![allow(dead_code)]

use rfcore::driver::{ScriptedDevice, ScriptedDriver, ToneBurst};
use rfcore::hub::SubscriptionHub;
use rfcore::prelude::{DeviceIndex, ScanConfig};
use rfcore::recorder::{BurstRecorder, MemoryStore, RecorderConfig};
use rfcore::{AcquisitionSupervisor, EngineConfig};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 10240 samples at 2.048 MS/s: one frame every 5 ms of stream time.
pub const BLOCK_LEN: usize = 10_240;
pub const BIN_HZ: f64 = 1_000.0;

pub struct Harness {
    pub driver: Arc<ScriptedDriver>,
    pub store: Arc<MemoryStore>,
    pub supervisor: AcquisitionSupervisor,
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        block_len: BLOCK_LEN,
        read_timeout_ms: 200,
        open_timeout_ms: 500,
        stop_timeout_ms: 2_000,
        max_restarts: 0,
        restart_backoff_ms: 10,
        ..Default::default()
    }
}

pub fn harness(driver: ScriptedDriver, engine: EngineConfig, recorder: RecorderConfig) -> Harness {
    let driver = Arc::new(driver);
    let store = Arc::new(MemoryStore::new());
    let recorder = Arc::new(BurstRecorder::new(recorder, store.clone()).unwrap());
    let hub = Arc::new(SubscriptionHub::default());
    let supervisor = AcquisitionSupervisor::new(driver.clone(), hub, recorder, engine).unwrap();
    Harness {
        driver,
        store,
        supervisor,
    }
}

pub fn scan(index: DeviceIndex, center_frequency_hz: u64) -> ScanConfig {
    ScanConfig {
        device_index: index,
        center_frequency_hz,
        threshold_dbfs: -35.0,
        min_burst_duration_s: 0.1,
        ..Default::default()
    }
}

/// A bin-centred carrier at `level_dbfs` for `[0, burst_s)`, then at `floor_dbfs`.
pub fn burst_device(
    index: DeviceIndex,
    frequency_hz: f64,
    level_dbfs: f32,
    burst_s: f64,
    floor_dbfs: f32,
) -> ScriptedDevice {
    ScriptedDevice::new(index)
        .with_tone(ToneBurst::between(frequency_hz, level_dbfs, 0.0, burst_s))
        .with_tone(ToneBurst::between(frequency_hz, floor_dbfs, burst_s, f64::INFINITY))
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn wait_for_frames(supervisor: &AcquisitionSupervisor, index: DeviceIndex, frames: u64) {
    let reached = wait_until(Duration::from_secs(30), || {
        supervisor
            .device_status(index)
            .map(|status| status.metrics.frames >= frames)
            .unwrap_or(false)
    });
    assert!(reached, "device {} never produced {} frames", index, frames);
}
