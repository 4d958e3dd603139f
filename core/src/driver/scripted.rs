use crate::driver::{DeviceDriver, DeviceHandle};
use crate::prelude::{
    Complex32, DeviceIndex, DeviceInfo, EngineError, EngineResult, HardwareCaps, ScanConfig,
};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// A carrier present at an absolute frequency for a span of stream time.
#[derive(Debug, Clone, PartialEq)]
pub struct ToneBurst {
    pub frequency_hz: f64,
    pub power_dbfs: f32,
    pub start_s: f64,
    pub end_s: f64,
}

impl ToneBurst {
    pub fn continuous(frequency_hz: f64, power_dbfs: f32) -> Self {
        Self::between(frequency_hz, power_dbfs, 0.0, f64::INFINITY)
    }

    pub fn between(frequency_hz: f64, power_dbfs: f32, start_s: f64, end_s: f64) -> Self {
        Self {
            frequency_hz,
            power_dbfs,
            start_s,
            end_s,
        }
    }

    fn amplitude(&self) -> f64 {
        10f64.powf(self.power_dbfs as f64 / 20.0)
    }
}

/// Behaviour of one replayed receiver.
#[derive(Debug, Clone)]
pub struct ScriptedDevice {
    pub info: DeviceInfo,
    pub caps: HardwareCaps,
    pub tones: Vec<ToneBurst>,
    /// Time `open` takes to return.
    pub open_delay: Duration,
    /// Time every read takes, regardless of the requested timeout.
    pub read_delay: Duration,
    /// Reads time out once this many blocks were delivered by one handle.
    pub fail_after_blocks: Option<u64>,
}

impl ScriptedDevice {
    pub fn new(index: DeviceIndex) -> Self {
        Self {
            info: DeviceInfo::new(index, "Scripted RTL2832U", format!("SCRIPT{:04}", index)),
            caps: HardwareCaps::rtl_sdr(),
            tones: Vec::new(),
            open_delay: Duration::ZERO,
            read_delay: Duration::ZERO,
            fail_after_blocks: None,
        }
    }

    pub fn with_tone(mut self, tone: ToneBurst) -> Self {
        self.tones.push(tone);
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn failing_after(mut self, blocks: u64) -> Self {
        self.fail_after_blocks = Some(blocks);
        self
    }
}

struct Slot {
    device: ScriptedDevice,
    present: Arc<AtomicBool>,
}

/// Deterministic replay driver: noiseless tones rendered from a script.
///
/// Stream time restarts at zero for every handle.
#[derive(Default)]
pub struct ScriptedDriver {
    slots: Mutex<BTreeMap<DeviceIndex, Slot>>,
    open_handles: Arc<AtomicUsize>,
    opens: AtomicUsize,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(self, device: ScriptedDevice) -> Self {
        self.attach(device);
        self
    }

    /// Plugs in (or replaces) a receiver.
    pub fn attach(&self, device: ScriptedDevice) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.insert(
                device.info.index,
                Slot {
                    device,
                    present: Arc::new(AtomicBool::new(true)),
                },
            );
        }
    }

    /// Pulls the receiver: it vanishes from enumeration and open handles stop delivering.
    pub fn unplug(&self, index: DeviceIndex) {
        if let Ok(mut slots) = self.slots.lock() {
            if let Some(slot) = slots.remove(&index) {
                slot.present.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Handles opened and not yet closed or dropped.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// Successful `open` calls so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn lookup(&self, index: DeviceIndex) -> EngineResult<(ScriptedDevice, Arc<AtomicBool>)> {
        let slots = self
            .slots
            .lock()
            .map_err(|_| EngineError::Internal("scripted driver lock poisoned".into()))?;
        slots
            .get(&index)
            .map(|slot| (slot.device.clone(), Arc::clone(&slot.present)))
            .ok_or(EngineError::DeviceUnavailable(index))
    }
}

impl DeviceDriver for ScriptedDriver {
    fn enumerate(&self) -> Vec<DeviceInfo> {
        self.slots
            .lock()
            .map(|slots| slots.values().map(|slot| slot.device.info.clone()).collect())
            .unwrap_or_default()
    }

    fn capabilities(&self, index: DeviceIndex) -> EngineResult<HardwareCaps> {
        self.lookup(index).map(|(device, _)| device.caps)
    }

    fn open(&self, index: DeviceIndex) -> EngineResult<Box<dyn DeviceHandle>> {
        let (device, present) = self.lookup(index)?;
        if !device.open_delay.is_zero() {
            thread::sleep(device.open_delay);
        }
        if !present.load(Ordering::SeqCst) {
            return Err(EngineError::DeviceUnavailable(index));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedHandle {
            device,
            present,
            open_handles: Arc::clone(&self.open_handles),
            config: None,
            stream_time_s: 0.0,
            delivered: 0,
            closed: false,
        }))
    }
}

struct ScriptedHandle {
    device: ScriptedDevice,
    present: Arc<AtomicBool>,
    open_handles: Arc<AtomicUsize>,
    config: Option<ScanConfig>,
    stream_time_s: f64,
    delivered: u64,
    closed: bool,
}

impl ScriptedHandle {
    fn index(&self) -> DeviceIndex {
        self.device.info.index
    }

    fn render(&self, config: &ScanConfig, buffer: &mut [Complex32]) {
        let rate = config.sample_rate_hz as f64;
        let center = config.center_frequency_hz as f64;
        let nyquist = rate / 2.0;
        let audible: Vec<&ToneBurst> = self
            .device
            .tones
            .iter()
            .filter(|tone| (tone.frequency_hz - center).abs() < nyquist)
            .collect();

        for (n, sample) in buffer.iter_mut().enumerate() {
            let t = self.stream_time_s + n as f64 / rate;
            let (mut re, mut im) = (0.0f64, 0.0f64);
            for tone in &audible {
                if t < tone.start_s || t >= tone.end_s {
                    continue;
                }
                let phase = 2.0 * PI * (tone.frequency_hz - center) * t;
                re += tone.amplitude() * phase.cos();
                im += tone.amplitude() * phase.sin();
            }
            *sample = Complex32::new(re as f32, im as f32);
        }
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl DeviceHandle for ScriptedHandle {
    fn configure(&mut self, config: &ScanConfig) -> EngineResult<()> {
        if self.closed {
            return Err(EngineError::Driver("configure on a closed handle".into()));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn read_block(&mut self, buffer: &mut [Complex32], timeout: Duration) -> EngineResult<()> {
        let index = self.index();
        let unplugged = !self.present.load(Ordering::SeqCst);
        let exhausted = self
            .device
            .fail_after_blocks
            .is_some_and(|limit| self.delivered >= limit);
        if unplugged || exhausted {
            thread::sleep(timeout.min(Duration::from_millis(10)));
            return Err(EngineError::DeviceReadTimeout { index, timeout });
        }
        if !self.device.read_delay.is_zero() {
            thread::sleep(self.device.read_delay);
        }

        let config = self
            .config
            .clone()
            .ok_or_else(|| EngineError::Driver("read before configure".into()))?;
        self.render(&config, buffer);
        self.stream_time_s += buffer.len() as f64 / config.sample_rate_hz as f64;
        self.delivered += 1;
        Ok(())
    }

    fn close(&mut self) -> EngineResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for ScriptedHandle {
    fn drop(&mut self) {
        self.release();
    }
}
