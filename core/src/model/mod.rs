//! Records shared between the acquisition engine and its external collaborators.

pub mod burst;
pub mod config;
pub mod device;
pub mod frame;

pub use burst::Burst;
pub use config::{ScanConfig, TuneRequest};
pub use device::{Device, DeviceIndex, DeviceInfo, DeviceStatus, HardwareCaps};
pub use frame::SpectrumFrame;
