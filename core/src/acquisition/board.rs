use crate::prelude::{
    Device, DeviceIndex, DeviceInfo, DeviceStatus, EngineError, ScanConfig,
};
use crate::telemetry::{MetricsRecorder, MetricsSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Lifecycle of one acquisition worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Streaming,
    Draining,
    Stopped,
    Error,
}

impl WorkerState {
    pub fn device_status(self) -> DeviceStatus {
        match self {
            WorkerState::Starting | WorkerState::Streaming | WorkerState::Draining => {
                DeviceStatus::Scanning
            }
            WorkerState::Stopped => DeviceStatus::Idle,
            WorkerState::Error => DeviceStatus::Error,
        }
    }
}

/// Status of one known device as reported to polling clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    pub index: DeviceIndex,
    pub name: String,
    pub serial: String,
    pub status: DeviceStatus,
    pub worker_state: Option<WorkerState>,
    pub config: Option<ScanConfig>,
    pub last_error: Option<String>,
    pub restarts: u32,
    pub metrics: MetricsSnapshot,
}

struct DeviceEntry {
    info: DeviceInfo,
    status: DeviceStatus,
    worker_state: Option<WorkerState>,
    active: bool,
    config: Option<Arc<ScanConfig>>,
    last_error: Option<EngineError>,
    restarts: u32,
    metrics: Arc<MetricsRecorder>,
}

impl DeviceEntry {
    fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            status: DeviceStatus::Idle,
            worker_state: None,
            active: false,
            config: None,
            last_error: None,
            restarts: 0,
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            index: self.info.index,
            name: self.info.name.clone(),
            serial: self.info.serial.clone(),
            status: self.status,
            worker_state: self.worker_state,
            config: self.config.as_deref().cloned(),
            last_error: self.last_error.as_ref().map(ToString::to_string),
            restarts: self.restarts,
            metrics: self.metrics.snapshot(),
        }
    }
}

/// Outcome of polling a starting worker.
pub(crate) enum StartProgress {
    Pending,
    Streaming,
    Failed(EngineError),
}

/// Device table shared by the supervisor and its workers.
///
/// Workers only ever touch their own row. Quarantined indices hold a handle
/// that was abandoned and not yet released by the driver.
#[derive(Default)]
pub struct DeviceBoard {
    devices: RwLock<BTreeMap<DeviceIndex, DeviceEntry>>,
    quarantine: Mutex<HashMap<DeviceIndex, usize>>,
}

impl DeviceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entry(&self, index: DeviceIndex, update: impl FnOnce(&mut DeviceEntry)) {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = devices.get_mut(&index) {
            update(entry);
        }
    }

    /// Merges a fresh enumeration: new devices appear idle, vanished ones are
    /// dropped unless a worker still owns them.
    pub fn reconcile(&self, listed: &[DeviceInfo]) {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        for info in listed {
            devices
                .entry(info.index)
                .and_modify(|entry| {
                    entry.info = info.clone();
                    if entry.status == DeviceStatus::Disconnected && !entry.active {
                        entry.status = DeviceStatus::Idle;
                    }
                })
                .or_insert_with(|| DeviceEntry::new(info.clone()));
        }
        devices.retain(|index, entry| entry.active || listed.iter().any(|d| d.index == *index));
    }

    /// Marks a worker as starting with `config`.
    pub fn begin(&self, info: &DeviceInfo, config: Arc<ScanConfig>) -> Arc<MetricsRecorder> {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let entry = devices
            .entry(info.index)
            .or_insert_with(|| DeviceEntry::new(info.clone()));
        entry.status = DeviceStatus::Scanning;
        entry.worker_state = Some(WorkerState::Starting);
        entry.active = true;
        entry.config = Some(config);
        entry.last_error = None;
        entry.restarts = 0;
        Arc::clone(&entry.metrics)
    }

    pub fn set_state(&self, index: DeviceIndex, state: WorkerState) {
        self.with_entry(index, |entry| {
            entry.worker_state = Some(state);
            entry.status = state.device_status();
        });
    }

    pub fn set_config(&self, index: DeviceIndex, config: Arc<ScanConfig>) {
        self.with_entry(index, |entry| entry.config = Some(config));
    }

    /// Records a failure the supervisor is about to retry.
    pub fn note_restart(&self, index: DeviceIndex, error: &EngineError) {
        self.with_entry(index, |entry| {
            entry.restarts += 1;
            entry.last_error = Some(error.clone());
            entry.worker_state = Some(WorkerState::Starting);
            entry.status = DeviceStatus::Scanning;
        });
    }

    /// The worker is gone; `error` is why, if it did not stop on request.
    pub fn finish(&self, index: DeviceIndex, error: Option<EngineError>) {
        self.with_entry(index, |entry| {
            entry.active = false;
            match error {
                Some(error) => {
                    entry.worker_state = Some(WorkerState::Error);
                    entry.status = DeviceStatus::Error;
                    entry.last_error = Some(error);
                }
                None => {
                    entry.worker_state = Some(WorkerState::Stopped);
                    entry.status = DeviceStatus::Idle;
                }
            }
        });
    }

    /// The worker did not acknowledge a stop in time and was abandoned.
    pub fn abandon(&self, index: DeviceIndex) {
        self.with_entry(index, |entry| {
            entry.active = false;
            entry.worker_state = None;
            entry.status = DeviceStatus::Disconnected;
        });
    }

    /// Drops a device whose hardware vanished.
    pub fn remove(&self, index: DeviceIndex) {
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&index);
    }

    pub fn quarantine(&self, index: DeviceIndex) {
        *self
            .quarantine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(index)
            .or_insert(0) += 1;
    }

    /// The driver confirmed one abandoned handle of `index` is closed.
    pub fn release(&self, index: DeviceIndex) {
        let mut quarantine = self.quarantine.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = quarantine.get_mut(&index) {
            *count -= 1;
            if *count == 0 {
                quarantine.remove(&index);
            }
        }
    }

    pub fn is_quarantined(&self, index: DeviceIndex) -> bool {
        self.quarantine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&index)
    }

    pub fn get(&self, index: DeviceIndex) -> Option<DeviceSnapshot> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&index)
            .map(DeviceEntry::snapshot)
    }

    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(DeviceEntry::snapshot)
            .collect()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| Device {
                info: entry.info.clone(),
                status: entry.status,
            })
            .collect()
    }

    pub(crate) fn start_progress(&self, index: DeviceIndex) -> StartProgress {
        let devices = self.devices.read().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = devices.get(&index) else {
            return StartProgress::Failed(EngineError::DeviceUnavailable(index));
        };
        match (entry.worker_state, entry.active) {
            (Some(WorkerState::Streaming), _) => StartProgress::Streaming,
            (_, true) => StartProgress::Pending,
            (_, false) => StartProgress::Failed(
                entry
                    .last_error
                    .clone()
                    .unwrap_or(EngineError::NotRunning(index)),
            ),
        }
    }
}
