//! Durable burst records and raw-sample captures.

pub mod burst_recorder;
pub mod capture;
pub mod store;

pub use burst_recorder::{BurstRecorder, RecorderConfig, RecorderStats};
pub use capture::{capture_file_name, read_capture, write_capture, CaptureWriter};
pub use store::{BurstRow, BurstStore, DeviceRow, JsonLinesStore, MemoryStore};
