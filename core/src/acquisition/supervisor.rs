use crate::acquisition::board::{DeviceBoard, DeviceSnapshot, StartProgress};
use crate::acquisition::tuning::TuningController;
use crate::acquisition::worker::{run_session, WorkerContext, WorkerExit};
use crate::driver::DeviceDriver;
use crate::hub::SubscriptionHub;
use crate::prelude::{
    Device, DeviceIndex, EngineError, EngineResult, ScanConfig, TuneRequest,
};
use crate::processing::{DetectorConfig, ProcessorConfig};
use crate::recorder::BurstRecorder;
use crate::telemetry::LogManager;
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Engine-wide acquisition settings, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Samples pulled from the driver per read; a multiple of the FFT size.
    pub block_len: usize,
    /// Raw blocks retained per device for burst captures.
    pub history_blocks: usize,
    pub read_timeout_ms: u64,
    pub open_timeout_ms: u64,
    pub stop_timeout_ms: u64,
    /// Automatic restarts after a hardware timeout before the error is surfaced.
    pub max_restarts: u32,
    /// First restart delay; doubles on every further attempt.
    pub restart_backoff_ms: u64,
    pub processor: ProcessorConfig,
    pub detector: DetectorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_len: 16_384,
            history_blocks: 128,
            read_timeout_ms: 1_000,
            open_timeout_ms: 5_000,
            stop_timeout_ms: 2_000,
            max_restarts: 3,
            restart_backoff_ms: 250,
            processor: ProcessorConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.processor.validate()?;
        let fft_size = self.processor.fft_size;
        if self.block_len == 0 || self.block_len % fft_size != 0 {
            return Err(EngineError::InvalidInput(format!(
                "block_len {} must be a positive multiple of fft_size {}",
                self.block_len, fft_size
            )));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Delay before restart number `attempt` (starting at 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.restart_backoff_ms.saturating_mul(factor))
    }
}

#[derive(Default)]
struct SlotFate {
    finished: bool,
    abandoned: bool,
}

struct WorkerSlot {
    generation: u64,
    tuning: Arc<TuningController>,
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    fate: Arc<Mutex<SlotFate>>,
}

type Registry = Arc<Mutex<HashMap<DeviceIndex, WorkerSlot>>>;

fn lock_registry(registry: &Registry) -> MutexGuard<'_, HashMap<DeviceIndex, WorkerSlot>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

fn remove_slot(registry: &Registry, index: DeviceIndex, generation: u64) {
    let mut slots = lock_registry(registry);
    if slots.get(&index).is_some_and(|slot| slot.generation == generation) {
        slots.remove(&index);
    }
}

/// Registry of acquisition workers, at most one per device index.
///
/// The registry lock is held only while a slot is inserted, looked up or
/// removed; opening, streaming and stopping happen outside it.
pub struct AcquisitionSupervisor {
    driver: Arc<dyn DeviceDriver>,
    hub: Arc<SubscriptionHub>,
    recorder: Arc<BurstRecorder>,
    config: Arc<EngineConfig>,
    board: Arc<DeviceBoard>,
    registry: Registry,
    generation: AtomicU64,
    log: LogManager,
}

impl AcquisitionSupervisor {
    pub fn new(
        driver: Arc<dyn DeviceDriver>,
        hub: Arc<SubscriptionHub>,
        recorder: Arc<BurstRecorder>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;
        let supervisor = Self {
            driver,
            hub,
            recorder,
            config: Arc::new(config),
            board: Arc::new(DeviceBoard::new()),
            registry: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(1),
            log: LogManager::new(),
        };
        supervisor.board.reconcile(&supervisor.driver.enumerate());
        Ok(supervisor)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    pub fn recorder(&self) -> &Arc<BurstRecorder> {
        &self.recorder
    }

    /// Spawns a worker for `index` and returns the validated config it will
    /// scan with. The hardware open happens on the worker, after this returns.
    pub fn start(&self, index: DeviceIndex, config: ScanConfig) -> EngineResult<Arc<ScanConfig>> {
        let listed = self.driver.enumerate();
        self.board.reconcile(&listed);
        if lock_registry(&self.registry).contains_key(&index) {
            return Err(EngineError::AlreadyRunning(index));
        }
        let info = listed
            .into_iter()
            .find(|device| device.index == index)
            .ok_or(EngineError::DeviceUnavailable(index))?;
        if self.board.is_quarantined(index) {
            self.log.warn(&format!(
                "device {} still holds an abandoned handle; refusing to start",
                index
            ));
            return Err(EngineError::DeviceUnavailable(index));
        }

        let caps = self.driver.capabilities(index)?;
        let scan = Arc::new(
            ScanConfig {
                device_index: index,
                ..config
            }
            .validate(&caps)?,
        );
        let tuning = Arc::new(TuningController::new(index, caps, Arc::clone(&scan)));
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(0);
        let fate = Arc::new(Mutex::new(SlotFate::default()));
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut slots = lock_registry(&self.registry);
            if slots.contains_key(&index) {
                return Err(EngineError::AlreadyRunning(index));
            }
            slots.insert(
                index,
                WorkerSlot {
                    generation,
                    tuning: Arc::clone(&tuning),
                    stop_tx,
                    done_rx,
                    fate: Arc::clone(&fate),
                },
            );
        }

        let metrics = self.board.begin(&info, Arc::clone(&scan));
        self.recorder.register_device(&info);
        let ctx = WorkerContext {
            index,
            driver: Arc::clone(&self.driver),
            hub: Arc::clone(&self.hub),
            recorder: Arc::clone(&self.recorder),
            board: Arc::clone(&self.board),
            tuning,
            metrics,
            config: Arc::clone(&self.config),
            stop_rx,
            log: LogManager::for_device(index),
        };
        let registry = Arc::clone(&self.registry);
        let spawned = thread::Builder::new()
            .name(format!("rf-worker-{}", index))
            .spawn(move || supervise(ctx, registry, generation, fate, done_tx));
        if let Err(err) = spawned {
            remove_slot(&self.registry, index, generation);
            let err = EngineError::Internal(format!("spawn worker: {}", err));
            self.board.finish(index, Some(err.clone()));
            return Err(err);
        }

        self.log.record(&format!(
            "started device {} at {} Hz",
            index, scan.center_frequency_hz
        ));
        Ok(scan)
    }

    /// Stops the worker of `index`. Unknown or stopped devices succeed silently.
    ///
    /// A worker that does not acknowledge within the stop timeout is
    /// abandoned and its index quarantined until its handle is released.
    pub fn stop(&self, index: DeviceIndex) -> EngineResult<()> {
        let slot = lock_registry(&self.registry).get(&index).map(|slot| {
            (
                slot.generation,
                slot.stop_tx.clone(),
                slot.done_rx.clone(),
                Arc::clone(&slot.fate),
            )
        });
        let Some((generation, stop_tx, done_rx, fate)) = slot else {
            return Ok(());
        };

        let _ = stop_tx.try_send(());
        match done_rx.recv_timeout(self.config.stop_timeout()) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.log.record(&format!("stopped device {}", index));
            }
            Err(RecvTimeoutError::Timeout) => {
                let mut fate = fate.lock().unwrap_or_else(PoisonError::into_inner);
                if !fate.finished {
                    fate.abandoned = true;
                    self.board.quarantine(index);
                    self.board.abandon(index);
                    self.log.warn(&format!(
                        "device {} did not stop within {:?}; handle abandoned",
                        index,
                        self.config.stop_timeout()
                    ));
                }
            }
        }
        remove_slot(&self.registry, index, generation);
        Ok(())
    }

    /// Forwards a partial config change to the running worker of `index`.
    pub fn tune(&self, index: DeviceIndex, request: &TuneRequest) -> EngineResult<Arc<ScanConfig>> {
        let tuning = lock_registry(&self.registry)
            .get(&index)
            .map(|slot| Arc::clone(&slot.tuning))
            .ok_or(EngineError::NotRunning(index))?;
        tuning.request(request)
    }

    /// Status and config of every known device.
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        self.board.snapshot()
    }

    /// Re-enumerates the driver and returns the reconciled device list.
    pub fn list_devices(&self) -> Vec<Device> {
        self.board.reconcile(&self.driver.enumerate());
        self.board.devices()
    }

    pub fn device_status(&self, index: DeviceIndex) -> EngineResult<DeviceSnapshot> {
        self.board
            .get(index)
            .ok_or(EngineError::DeviceUnavailable(index))
    }

    /// Indices that currently own a worker.
    pub fn running(&self) -> Vec<DeviceIndex> {
        let mut running: Vec<DeviceIndex> =
            lock_registry(&self.registry).keys().copied().collect();
        running.sort_unstable();
        running
    }

    /// Blocks until the worker of `index` streams, or returns the error that
    /// ended its start attempts.
    pub fn await_streaming(&self, index: DeviceIndex, timeout: Duration) -> EngineResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.board.start_progress(index) {
                StartProgress::Streaming => return Ok(()),
                StartProgress::Failed(err) => return Err(err),
                StartProgress::Pending => {}
            }
            if Instant::now() >= deadline {
                return Err(EngineError::DeviceOpenTimeout { index, timeout });
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Stops every worker.
    pub fn shutdown(&self) {
        for index in self.running() {
            let _ = self.stop(index);
        }
    }
}

impl Drop for AcquisitionSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Body of a worker thread: runs sessions and applies the restart policy.
fn supervise(
    ctx: WorkerContext,
    registry: Registry,
    generation: u64,
    fate: Arc<Mutex<SlotFate>>,
    done_tx: Sender<()>,
) {
    let index = ctx.index;
    let mut attempt = 0u32;
    let exit = loop {
        let err = match run_session(&ctx) {
            WorkerExit::Stopped => break WorkerExit::Stopped,
            WorkerExit::Failed(err) => err,
        };
        if !err.is_retryable() || attempt >= ctx.config.max_restarts {
            break WorkerExit::Failed(err);
        }
        attempt += 1;
        let delay = ctx.config.backoff(attempt);
        ctx.log.warn(&format!(
            "{}; restart {}/{} in {:?}",
            err, attempt, ctx.config.max_restarts, delay
        ));
        ctx.board.note_restart(index, &err);
        match ctx.stop_rx.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break WorkerExit::Stopped,
        }
        if !ctx.driver.enumerate().iter().any(|d| d.index == index) {
            break WorkerExit::Failed(EngineError::DeviceUnavailable(index));
        }
        if ctx.board.is_quarantined(index) {
            break WorkerExit::Failed(err);
        }
    };

    let mut fate = fate.lock().unwrap_or_else(PoisonError::into_inner);
    fate.finished = true;
    let vanished = match &exit {
        WorkerExit::Stopped => {
            ctx.board.finish(index, None);
            false
        }
        WorkerExit::Failed(err) => {
            ctx.log.error(&format!("giving up: {}", err));
            ctx.board.finish(index, Some(err.clone()));
            !ctx.driver.enumerate().iter().any(|d| d.index == index)
        }
    };
    if vanished {
        ctx.board.remove(index);
    }
    if fate.abandoned {
        ctx.board.release(index);
        ctx.log.record("abandoned worker returned; handle released");
    }
    drop(fate);

    remove_slot(&registry, index, generation);
    drop(done_tx);
}
