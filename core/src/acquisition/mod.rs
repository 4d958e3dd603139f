//! Device ownership: one worker thread per running receiver, supervised
//! through a single registry.

pub mod board;
pub mod supervisor;
pub mod tuning;
pub mod worker;

pub use board::{DeviceBoard, DeviceSnapshot, WorkerState};
pub use supervisor::{AcquisitionSupervisor, EngineConfig};
pub use tuning::{Mailbox, TuningController};
pub use worker::WorkerExit;
