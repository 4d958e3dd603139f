use crate::acquisition::board::{DeviceBoard, WorkerState};
use crate::acquisition::supervisor::EngineConfig;
use crate::acquisition::tuning::TuningController;
use crate::driver::{DeviceDriver, DeviceHandle};
use crate::hub::SubscriptionHub;
use crate::prelude::{Complex32, DeviceIndex, EngineError, EngineResult, ScanConfig};
use crate::processing::buffer_pool::{peak_magnitude, BufferPool};
use crate::processing::{
    BurstDetector, DetectorEvent, FrameClock, FrameSmoother, SampleHistory, SpectrumProcessor,
    TimedBlock,
};
use crate::recorder::BurstRecorder;
use crate::telemetry::{LogManager, MetricsRecorder};
use chrono::{DateTime, Utc};
use crossbeam::channel::{bounded, Receiver, TryRecvError};
use crossbeam::select;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// How one acquisition session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerExit {
    Stopped,
    Failed(EngineError),
}

/// Everything a worker thread needs; owned by that thread alone.
pub(crate) struct WorkerContext {
    pub index: DeviceIndex,
    pub driver: Arc<dyn DeviceDriver>,
    pub hub: Arc<SubscriptionHub>,
    pub recorder: Arc<BurstRecorder>,
    pub board: Arc<DeviceBoard>,
    pub tuning: Arc<TuningController>,
    pub metrics: Arc<MetricsRecorder>,
    pub config: Arc<EngineConfig>,
    pub stop_rx: Receiver<()>,
    pub log: LogManager,
}

impl WorkerContext {
    fn stop_requested(&self) -> bool {
        // a vanished supervisor counts as a stop request
        !matches!(self.stop_rx.try_recv(), Err(TryRecvError::Empty))
    }
}

/// Per-session processing state, rebuilt on every (re)start.
struct Pipeline {
    processor: SpectrumProcessor,
    smoother: FrameSmoother,
    detector: BurstDetector,
    history: SampleHistory,
    pool: BufferPool,
    scan: Arc<ScanConfig>,
    sequence: u64,
    offset_s: f64,
    started_at: DateTime<Utc>,
}

impl Pipeline {
    fn new(ctx: &WorkerContext, scan: Arc<ScanConfig>) -> EngineResult<Self> {
        let engine = &ctx.config;
        Ok(Self {
            processor: SpectrumProcessor::new(engine.processor.clone())?,
            smoother: FrameSmoother::new(engine.processor.smoothing_width),
            detector: BurstDetector::new(ctx.index, engine.detector.clone()),
            history: SampleHistory::new(engine.history_blocks),
            pool: BufferPool::with_capacity(4),
            scan,
            sequence: 0,
            offset_s: 0.0,
            started_at: Utc::now(),
        })
    }

    fn next_clock(&mut self, samples: usize) -> FrameClock {
        let clock = FrameClock {
            sequence: self.sequence,
            timestamp: self.started_at
                + chrono::Duration::nanoseconds((self.offset_s * 1e9).round() as i64),
            offset_s: self.offset_s,
        };
        self.sequence += 1;
        self.offset_s += samples as f64 / self.scan.sample_rate_hz as f64;
        clock
    }

    /// Drops smoothing and detection state that belongs to the old tuning.
    fn retuned(&mut self) {
        self.smoother.reset();
        self.detector.reset();
        while let Some(block) = self.history.pop_oldest() {
            self.pool.release(block);
        }
    }
}

/// Runs one open → stream → close session of the device.
pub(crate) fn run_session(ctx: &WorkerContext) -> WorkerExit {
    ctx.board.set_state(ctx.index, WorkerState::Starting);
    let scan = ctx.tuning.applied();
    let mut pipeline = match Pipeline::new(ctx, Arc::clone(&scan)) {
        Ok(pipeline) => pipeline,
        Err(err) => return WorkerExit::Failed(err),
    };

    let mut handle = match open_with_timeout(ctx) {
        Ok(Some(handle)) => handle,
        Ok(None) => return WorkerExit::Stopped,
        Err(err) => {
            ctx.log.warn(&format!("open failed: {}", err));
            return WorkerExit::Failed(err);
        }
    };

    if let Err(err) = handle.configure(&scan) {
        let _ = handle.close();
        return WorkerExit::Failed(err);
    }
    ctx.board.set_state(ctx.index, WorkerState::Streaming);
    ctx.log.record(&format!(
        "streaming at {} Hz, {} S/s",
        scan.center_frequency_hz, scan.sample_rate_hz
    ));

    let exit = stream(ctx, handle.as_mut(), &mut pipeline);
    if exit == WorkerExit::Stopped {
        ctx.board.set_state(ctx.index, WorkerState::Draining);
    }
    if pipeline.detector.in_burst() {
        ctx.log.detail("burst in progress dropped at shutdown");
    }
    if let Err(err) = handle.close() {
        ctx.log.warn(&format!("close failed: {}", err));
    }
    exit
}

fn stream(ctx: &WorkerContext, handle: &mut dyn DeviceHandle, pipeline: &mut Pipeline) -> WorkerExit {
    let read_timeout = ctx.config.read_timeout();
    loop {
        if ctx.stop_requested() {
            return WorkerExit::Stopped;
        }
        if let Err(err) = apply_pending(ctx, handle, pipeline) {
            return WorkerExit::Failed(err);
        }

        let mut block = pipeline.pool.checkout(ctx.config.block_len);
        if let Err(err) = handle.read_block(&mut block, read_timeout) {
            pipeline.pool.release(block);
            if matches!(err, EngineError::DeviceReadTimeout { .. }) {
                ctx.metrics.record_read_error();
            }
            ctx.log.warn(&format!("read failed: {}", err));
            return WorkerExit::Failed(err);
        }
        if let Err(err) = process_block(ctx, pipeline, block) {
            return WorkerExit::Failed(err);
        }
    }
}

/// Applies the latest tuning request, if any, between two blocks.
fn apply_pending(
    ctx: &WorkerContext,
    handle: &mut dyn DeviceHandle,
    pipeline: &mut Pipeline,
) -> EngineResult<()> {
    let Some(next) = ctx.tuning.take_pending() else {
        return Ok(());
    };
    if next.rf_differs(&pipeline.scan) {
        if let Err(err) = handle.configure(&next) {
            ctx.log.warn(&format!("retune rejected by hardware: {}", err));
            return handle.configure(&pipeline.scan);
        }
        pipeline.retuned();
        ctx.metrics.record_retune();
        ctx.log.record(&format!(
            "retuned to {} Hz, {} S/s, {} dB",
            next.center_frequency_hz, next.sample_rate_hz, next.gain_db
        ));
    }
    pipeline.scan = Arc::clone(&next);
    ctx.tuning.publish_applied(Arc::clone(&next));
    ctx.board.set_config(ctx.index, next);
    Ok(())
}

fn process_block(
    ctx: &WorkerContext,
    pipeline: &mut Pipeline,
    block: Vec<Complex32>,
) -> EngineResult<()> {
    if log::log_enabled!(log::Level::Debug) && peak_magnitude(&block) >= 1.0 {
        ctx.log.detail(&format!("block {} is clipping", pipeline.sequence));
    }

    let scan = Arc::clone(&pipeline.scan);
    let clock = pipeline.next_clock(block.len());
    let frame = Arc::new(pipeline.processor.process(&block, &scan, clock)?);
    let evicted = pipeline.history.push(TimedBlock {
        offset_s: clock.offset_s,
        sample_rate_hz: scan.sample_rate_hz,
        samples: block,
    });
    if let Some(buffer) = evicted {
        pipeline.pool.release(buffer);
    }

    ctx.hub.publish_spectrum(Arc::clone(&frame));
    ctx.metrics.record_frame();

    let Some(smoothed) = pipeline.smoother.push(frame) else {
        return Ok(());
    };
    let discarded_before = pipeline.detector.discarded();
    match pipeline.detector.on_frame(&smoothed, &scan) {
        Some(DetectorEvent::Began {
            frequency_hz,
            power_dbfs,
            ..
        }) => {
            ctx.log.detail(&format!(
                "burst began at {:.0} Hz, {:.1} dBFS",
                frequency_hz, power_dbfs
            ));
        }
        Some(DetectorEvent::Ended(end)) => {
            let samples = pipeline
                .history
                .window(end.start_offset_s, end.end_offset_s);
            let burst = ctx.recorder.record(end.burst, scan.threshold_dbfs, samples);
            ctx.log.record(&format!(
                "burst {} at {:.0} Hz, {:.1} dBFS, {:.3} s",
                burst.id, burst.frequency_hz, burst.peak_power_dbfs, burst.duration_s
            ));
            ctx.metrics.record_burst();
            ctx.hub.publish_burst(Arc::new(burst));
        }
        None => {}
    }
    if pipeline.detector.discarded() > discarded_before {
        ctx.metrics.record_discarded();
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum OpenWait {
    Waiting,
    Abandoned,
}

/// Opens the device on a helper thread so a hung open can be abandoned.
///
/// `Ok(None)` means a stop arrived first. An abandoned open quarantines the
/// index until the helper returns and closes whatever it got.
fn open_with_timeout(ctx: &WorkerContext) -> EngineResult<Option<Box<dyn DeviceHandle>>> {
    let index = ctx.index;
    let timeout = ctx.config.open_timeout();
    let (result_tx, result_rx) = bounded::<EngineResult<Box<dyn DeviceHandle>>>(1);
    let wait = Arc::new(Mutex::new(OpenWait::Waiting));

    let helper_wait = Arc::clone(&wait);
    let driver = Arc::clone(&ctx.driver);
    let board = Arc::clone(&ctx.board);
    thread::Builder::new()
        .name(format!("rf-open-{}", index))
        .spawn(move || {
            let result = driver.open(index);
            let wait = helper_wait.lock().unwrap_or_else(PoisonError::into_inner);
            if *wait == OpenWait::Abandoned {
                if let Ok(mut handle) = result {
                    let _ = handle.close();
                }
                board.release(index);
                log::info!("[sdr{}] abandoned open returned; handle released", index);
            } else {
                let _ = result_tx.send(result);
            }
        })
        .map_err(|err| EngineError::Internal(format!("spawn open thread: {}", err)))?;

    let abandon = || {
        let mut state = wait.lock().unwrap_or_else(PoisonError::into_inner);
        match result_rx.try_recv() {
            Ok(Ok(mut handle)) => {
                let _ = handle.close();
            }
            Ok(Err(_)) => {}
            Err(_) => {
                *state = OpenWait::Abandoned;
                ctx.board.quarantine(index);
            }
        }
    };

    select! {
        recv(result_rx) -> result => match result {
            Ok(opened) => opened.map(Some),
            Err(_) => Err(EngineError::Internal("open thread exited without a result".into())),
        },
        recv(ctx.stop_rx) -> _ => {
            abandon();
            Ok(None)
        },
        default(timeout) => {
            abandon();
            Err(EngineError::DeviceOpenTimeout { index, timeout })
        },
    }
}
