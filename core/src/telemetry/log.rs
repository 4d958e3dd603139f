use crate::prelude::DeviceIndex;
use log::{debug, error, info, warn};

/// Log front-end that tags every line with the device it concerns.
pub struct LogManager {
    scope: String,
}

impl LogManager {
    pub fn new() -> Self {
        Self {
            scope: "engine".into(),
        }
    }

    pub fn for_device(index: DeviceIndex) -> Self {
        Self {
            scope: format!("sdr{}", index),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn record(&self, message: &str) {
        info!("[{}] {}", self.scope, message);
    }

    pub fn detail(&self, message: &str) {
        debug!("[{}] {}", self.scope, message);
    }

    pub fn warn(&self, message: &str) {
        warn!("[{}] {}", self.scope, message);
    }

    pub fn error(&self, message: &str) {
        error!("[{}] {}", self.scope, message);
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
