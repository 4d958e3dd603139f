//! Multi-device SDR acquisition, spectral processing and burst detection.
//!
//! Each running receiver is owned by one worker thread that reads sample
//! blocks, turns them into spectrum frames, detects bursts and fans both out
//! through the [`hub::SubscriptionHub`]. Finished bursts are persisted by the
//! [`recorder::BurstRecorder`].

pub mod acquisition;
pub mod driver;
pub mod hub;
pub mod math;
pub mod model;
pub mod prelude;
pub mod processing;
pub mod recorder;
pub mod telemetry;

pub use acquisition::{AcquisitionSupervisor, DeviceSnapshot, EngineConfig};
pub use prelude::{EngineError, EngineResult};
