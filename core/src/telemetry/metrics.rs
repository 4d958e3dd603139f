use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Per-device counters, shared between a worker and status readers.
pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub frames: u64,
    pub bursts: u64,
    pub discarded: u64,
    pub read_errors: u64,
    pub retunes: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut metrics) = self.inner.lock() {
            apply(&mut metrics);
        }
    }

    pub fn record_frame(&self) {
        self.update(|m| m.frames += 1);
    }

    pub fn record_burst(&self) {
        self.update(|m| m.bursts += 1);
    }

    pub fn record_discarded(&self) {
        self.update(|m| m.discarded += 1);
    }

    pub fn record_read_error(&self) {
        self.update(|m| m.read_errors += 1);
    }

    pub fn record_retune(&self) {
        self.update(|m| m.retunes += 1);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|m| *m).unwrap_or_default()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
