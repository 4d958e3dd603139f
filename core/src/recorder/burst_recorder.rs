use crate::recorder::capture::{CaptureJob, CaptureOutcome, CaptureWriter};
use crate::recorder::store::{BurstStore, DeviceRow};
use crate::prelude::{Burst, Complex32, DeviceInfo, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Write raw sample windows of strong bursts.
    pub capture_enabled: bool,
    /// A burst is captured when its peak is at least this far above threshold.
    pub capture_margin_db: f32,
    pub capture_dir: PathBuf,
    /// Bursts kept in memory for `recent_bursts`.
    pub recent_limit: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            capture_enabled: false,
            capture_margin_db: 10.0,
            capture_dir: PathBuf::from("data/captures"),
            recent_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderStats {
    pub persisted: u64,
    pub persistence_failures: u64,
    pub captures_written: u64,
    pub capture_failures: u64,
    pub captures_pending: usize,
}

struct RecorderShared {
    store: Arc<dyn BurstStore>,
    recent: Mutex<VecDeque<Burst>>,
    recent_limit: usize,
    persisted: AtomicU64,
    persistence_failures: AtomicU64,
    captures_written: AtomicU64,
    capture_failures: AtomicU64,
}

impl RecorderShared {
    fn remember(&self, burst: Burst) {
        if let Ok(mut recent) = self.recent.lock() {
            recent.push_back(burst);
            while recent.len() > self.recent_limit {
                recent.pop_front();
            }
        }
    }

    fn complete_capture(&self, outcome: CaptureOutcome) {
        let iq_file = match outcome.result {
            Ok(iq_file) => iq_file,
            Err(err) => {
                self.capture_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("capture of burst {} failed: {}", outcome.burst_id, err);
                return;
            }
        };
        if let Err(err) = self.store.attach_capture(outcome.row_id, &iq_file) {
            self.persistence_failures.fetch_add(1, Ordering::Relaxed);
            log::error!(
                "could not attach capture {} to burst {}: {}",
                iq_file,
                outcome.burst_id,
                err
            );
            return;
        }
        self.captures_written.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut recent) = self.recent.lock() {
            if let Some(burst) = recent.iter_mut().find(|b| b.id == outcome.burst_id) {
                burst.capture_ref = Some(iq_file);
            }
        }
    }
}

/// Persists finished bursts and schedules raw captures for strong ones.
///
/// Persistence is synchronous with the caller; failures are logged and
/// counted, never returned, so detection keeps running.
pub struct BurstRecorder {
    config: RecorderConfig,
    shared: Arc<RecorderShared>,
    capture: Option<CaptureWriter>,
}

impl BurstRecorder {
    pub fn new(config: RecorderConfig, store: Arc<dyn BurstStore>) -> EngineResult<Self> {
        let shared = Arc::new(RecorderShared {
            store,
            recent: Mutex::new(VecDeque::new()),
            recent_limit: config.recent_limit.max(1),
            persisted: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            captures_written: AtomicU64::new(0),
            capture_failures: AtomicU64::new(0),
        });
        let capture = if config.capture_enabled {
            let completion = Arc::clone(&shared);
            Some(CaptureWriter::spawn(&config.capture_dir, move |outcome| {
                completion.complete_capture(outcome)
            })?)
        } else {
            None
        };
        Ok(Self {
            config,
            shared,
            capture,
        })
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BurstStore> {
        &self.shared.store
    }

    pub fn register_device(&self, info: &DeviceInfo) {
        if let Err(err) = self.shared.store.register_device(&DeviceRow::from(info)) {
            self.shared
                .persistence_failures
                .fetch_add(1, Ordering::Relaxed);
            log::error!("could not register device {}: {}", info.index, err);
        }
    }

    /// Stores `burst` and, when it qualifies, queues `samples` for capture.
    pub fn record(&self, burst: Burst, threshold_dbfs: f32, samples: Vec<Complex32>) -> Burst {
        let row_id = match self.shared.store.insert_burst(&burst) {
            Ok(row_id) => {
                self.shared.persisted.fetch_add(1, Ordering::Relaxed);
                Some(row_id)
            }
            Err(err) => {
                self.shared
                    .persistence_failures
                    .fetch_add(1, Ordering::Relaxed);
                log::error!("burst {} was not persisted: {}", burst.id, err);
                None
            }
        };
        self.shared.remember(burst.clone());

        let strong = burst.peak_power_dbfs >= threshold_dbfs + self.config.capture_margin_db;
        if let (Some(row_id), Some(writer), true) = (row_id, &self.capture, strong) {
            if samples.is_empty() {
                log::warn!("burst {} has no retained samples to capture", burst.id);
            } else if let Err(err) = writer.submit(CaptureJob {
                row_id,
                burst: burst.clone(),
                samples,
            }) {
                self.shared.capture_failures.fetch_add(1, Ordering::Relaxed);
                log::error!("capture of burst {} not scheduled: {}", burst.id, err);
            }
        }
        burst
    }

    /// Most recent bursts, newest first.
    pub fn recent_bursts(&self, limit: usize) -> Vec<Burst> {
        self.shared
            .recent
            .lock()
            .map(|recent| recent.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    /// Waits for outstanding captures. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.capture
            .as_ref()
            .map_or(true, |writer| writer.wait_idle(timeout))
    }

    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            persisted: self.shared.persisted.load(Ordering::Relaxed),
            persistence_failures: self.shared.persistence_failures.load(Ordering::Relaxed),
            captures_written: self.shared.captures_written.load(Ordering::Relaxed),
            capture_failures: self.shared.capture_failures.load(Ordering::Relaxed),
            captures_pending: self.capture.as_ref().map_or(0, CaptureWriter::pending),
        }
    }
}
