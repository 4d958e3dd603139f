//! Receiver hardware as a replaceable capability.
//!
//! The engine only ever talks to hardware through [`DeviceDriver`] and the
//! exclusively-owned [`DeviceHandle`] it opens, so a replay driver can stand
//! in for real receivers.

pub mod scripted;

use crate::prelude::{Complex32, DeviceIndex, DeviceInfo, EngineResult, HardwareCaps, ScanConfig};
use std::time::Duration;

pub use scripted::{ScriptedDevice, ScriptedDriver, ToneBurst};

/// Enumerates and opens receivers.
pub trait DeviceDriver: Send + Sync {
    /// Receivers currently attached.
    fn enumerate(&self) -> Vec<DeviceInfo>;

    fn capabilities(&self, index: DeviceIndex) -> EngineResult<HardwareCaps>;

    /// Opens `index` for exclusive use. May block for as long as the hardware takes.
    fn open(&self, index: DeviceIndex) -> EngineResult<Box<dyn DeviceHandle>>;
}

/// One open receiver, owned by exactly one acquisition worker.
pub trait DeviceHandle: Send {
    /// Programs frequency, rate, gain and ppm correction.
    fn configure(&mut self, config: &ScanConfig) -> EngineResult<()>;

    /// Fills `buffer` completely, or fails with `DeviceReadTimeout` once `timeout` elapses.
    fn read_block(&mut self, buffer: &mut [Complex32], timeout: Duration) -> EngineResult<()>;

    fn close(&mut self) -> EngineResult<()>;
}
