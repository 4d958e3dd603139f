use std::time::Duration;

pub use crate::model::{
    Burst, Device, DeviceIndex, DeviceInfo, DeviceStatus, HardwareCaps, ScanConfig,
    SpectrumFrame, TuneRequest,
};
pub use num_complex::Complex32;

/// Common error type for the acquisition engine.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("device {0} is not available")]
    DeviceUnavailable(DeviceIndex),
    #[error("device {0} is already running")]
    AlreadyRunning(DeviceIndex),
    #[error("device {0} is not running")]
    NotRunning(DeviceIndex),
    #[error("device {index} did not open within {timeout:?}")]
    DeviceOpenTimeout { index: DeviceIndex, timeout: Duration },
    #[error("device {index} produced no samples within {timeout:?}")]
    DeviceReadTimeout { index: DeviceIndex, timeout: Duration },
    #[error("{field} out of range: {detail}")]
    OutOfRange { field: &'static str, detail: String },
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
    #[error("capture write failure: {0}")]
    CaptureWriteFailure(String),
    #[error("driver failure: {0}")]
    Driver(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("internal failure: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn out_of_range(field: &'static str, detail: impl Into<String>) -> Self {
        EngineError::OutOfRange {
            field,
            detail: detail.into(),
        }
    }

    /// Hardware responsiveness failures are the only ones the supervisor restarts on.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::DeviceOpenTimeout { .. } | EngineError::DeviceReadTimeout { .. }
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
