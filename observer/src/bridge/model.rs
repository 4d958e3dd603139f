use rfcore::prelude::{DeviceIndex, EngineError};
use serde::{Deserialize, Serialize};

/// Body of every failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub error: String,
}

impl From<&EngineError> for ErrorBody {
    fn from(err: &EngineError) -> Self {
        let kind = match err {
            EngineError::DeviceUnavailable(_) => "device_unavailable",
            EngineError::AlreadyRunning(_) => "already_running",
            EngineError::NotRunning(_) => "not_running",
            EngineError::DeviceOpenTimeout { .. } => "device_open_timeout",
            EngineError::DeviceReadTimeout { .. } => "device_read_timeout",
            EngineError::OutOfRange { .. } => "out_of_range",
            EngineError::PersistenceFailure(_) => "persistence_failure",
            EngineError::CaptureWriteFailure(_) => "capture_write_failure",
            EngineError::Driver(_) => "driver",
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::Internal(_) => "internal",
        };
        Self {
            kind: kind.to_string(),
            error: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub device_index: DeviceIndex,
    pub status: String,
}

impl Ack {
    pub fn new(device_index: DeviceIndex, status: &str) -> Self {
        Self {
            device_index,
            status: status.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BurstQuery {
    pub limit: Option<usize>,
}

impl BurstQuery {
    pub const DEFAULT_LIMIT: usize = 100;

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}
