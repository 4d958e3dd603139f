pub mod buffer_pool;
pub mod detector;
pub mod history;
pub mod smoothing;
pub mod spectrum;

pub use buffer_pool::BufferPool;
pub use detector::{BurstDetector, BurstEnd, DetectorConfig, DetectorEvent};
pub use history::{SampleHistory, TimedBlock};
pub use smoothing::FrameSmoother;
pub use spectrum::{FrameClock, ProcessorConfig, SpectrumProcessor};
