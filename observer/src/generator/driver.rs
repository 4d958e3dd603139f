use crate::generator::profile::SyntheticDeviceProfile;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rfcore::driver::{DeviceDriver, DeviceHandle};
use rfcore::prelude::{
    Complex32, DeviceIndex, DeviceInfo, EngineError, EngineResult, HardwareCaps, ScanConfig,
};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::thread;
use std::time::{Duration, Instant};

/// Receivers generated from profiles, paced at the configured sample rate
/// when `realtime` is set and as fast as the engine reads otherwise.
pub struct SyntheticDriver {
    profiles: BTreeMap<DeviceIndex, SyntheticDeviceProfile>,
    realtime: bool,
}

impl SyntheticDriver {
    pub fn new(profiles: &[SyntheticDeviceProfile], realtime: bool) -> Self {
        Self {
            profiles: profiles
                .iter()
                .map(|profile| (profile.index, profile.clone()))
                .collect(),
            realtime,
        }
    }

    fn profile(&self, index: DeviceIndex) -> EngineResult<&SyntheticDeviceProfile> {
        self.profiles
            .get(&index)
            .ok_or(EngineError::DeviceUnavailable(index))
    }
}

impl DeviceDriver for SyntheticDriver {
    fn enumerate(&self) -> Vec<DeviceInfo> {
        self.profiles.values().map(SyntheticDeviceProfile::info).collect()
    }

    fn capabilities(&self, index: DeviceIndex) -> EngineResult<HardwareCaps> {
        self.profile(index).map(|_| HardwareCaps::rtl_sdr())
    }

    fn open(&self, index: DeviceIndex) -> EngineResult<Box<dyn DeviceHandle>> {
        let profile = self.profile(index)?.clone();
        log::debug!("opening synthetic receiver {} ({})", index, profile.serial);
        Ok(Box::new(SyntheticHandle {
            rng: StdRng::seed_from_u64(profile.seed),
            profile,
            realtime: self.realtime,
            config: None,
            stream_time_s: 0.0,
            phase: Vec::new(),
            started: None,
            open: true,
        }))
    }
}

struct SyntheticHandle {
    profile: SyntheticDeviceProfile,
    rng: StdRng,
    realtime: bool,
    config: Option<ScanConfig>,
    stream_time_s: f64,
    /// Carrier phase per emitter, kept continuous across blocks and retunes.
    phase: Vec<f64>,
    started: Option<Instant>,
    open: bool,
}

impl SyntheticHandle {
    fn render(&mut self, config: &ScanConfig, buffer: &mut [Complex32]) {
        let rate = config.sample_rate_hz as f64;
        let center = config.center_frequency_hz as f64;
        // ppm error shifts every emitter as seen by the tuner
        let tuned = center * (1.0 + config.ppm_correction as f64 * 1e-6);
        let half_width = self.profile.noise_half_width();

        for (n, sample) in buffer.iter_mut().enumerate() {
            let t = self.stream_time_s + n as f64 / rate;
            let (mut re, mut im) = (0.0f64, 0.0f64);
            for (emitter, phase) in self.profile.emitters.iter().zip(self.phase.iter_mut()) {
                let offset = emitter.frequency_hz - tuned;
                *phase = (*phase + 2.0 * PI * offset / rate) % (2.0 * PI);
                if offset.abs() >= rate / 2.0 || !emitter.is_keyed(t) {
                    continue;
                }
                re += emitter.amplitude() * phase.cos();
                im += emitter.amplitude() * phase.sin();
            }
            let noise_re = self.rng.gen_range(-half_width..=half_width);
            let noise_im = self.rng.gen_range(-half_width..=half_width);
            *sample = Complex32::new(re as f32 + noise_re, im as f32 + noise_im);
        }
    }

    fn pace(&mut self) {
        if !self.realtime {
            return;
        }
        let started = *self.started.get_or_insert_with(Instant::now);
        let due = started + Duration::from_secs_f64(self.stream_time_s);
        let now = Instant::now();
        if due > now {
            thread::sleep(due - now);
        }
    }
}

impl DeviceHandle for SyntheticHandle {
    fn configure(&mut self, config: &ScanConfig) -> EngineResult<()> {
        if !self.open {
            return Err(EngineError::Driver("configure on a closed handle".into()));
        }
        self.phase.resize(self.profile.emitters.len(), 0.0);
        self.config = Some(config.clone());
        Ok(())
    }

    fn read_block(&mut self, buffer: &mut [Complex32], _timeout: Duration) -> EngineResult<()> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| EngineError::Driver("read before configure".into()))?;
        self.render(&config, buffer);
        self.stream_time_s += buffer.len() as f64 / config.sample_rate_hz as f64;
        self.pace();
        Ok(())
    }

    fn close(&mut self) -> EngineResult<()> {
        if self.open {
            self.open = false;
            log::debug!("closed synthetic receiver {}", self.profile.index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::profile::EmitterProfile;

    fn quiet_profile(index: DeviceIndex) -> SyntheticDeviceProfile {
        SyntheticDeviceProfile {
            emitters: vec![EmitterProfile {
                frequency_hz: 433_970_000.0,
                power_dbfs: -6.0,
                burst_s: 0.01,
                period_s: 0.02,
                first_burst_s: 0.0,
            }],
            noise_dbfs: -80.0,
            ..SyntheticDeviceProfile::numbered(index)
        }
    }

    fn read(driver: &SyntheticDriver, index: DeviceIndex, len: usize) -> Vec<Complex32> {
        let mut handle = driver.open(index).unwrap();
        handle.configure(&ScanConfig::for_device(index)).unwrap();
        let mut buffer = vec![Complex32::new(0.0, 0.0); len];
        handle
            .read_block(&mut buffer, Duration::from_secs(1))
            .unwrap();
        handle.close().unwrap();
        buffer
    }

    #[test]
    fn enumerates_profiles_in_index_order() {
        let driver = SyntheticDriver::new(
            &[SyntheticDeviceProfile::numbered(2), SyntheticDeviceProfile::numbered(0)],
            false,
        );
        let listed: Vec<DeviceIndex> = driver.enumerate().iter().map(|info| info.index).collect();
        assert_eq!(listed, vec![0, 2]);
        assert!(driver.capabilities(2).is_ok());
        assert_eq!(
            driver.capabilities(1).unwrap_err(),
            EngineError::DeviceUnavailable(1)
        );
        assert!(driver.open(1).is_err());
    }

    #[test]
    fn same_seed_replays_the_same_samples() {
        let driver = SyntheticDriver::new(&[quiet_profile(0)], false);
        assert_eq!(read(&driver, 0, 4096), read(&driver, 0, 4096));
    }

    #[test]
    fn emitter_is_gated_by_its_schedule() {
        let driver = SyntheticDriver::new(&[quiet_profile(0)], false);
        // 2.048 MS/s: 20480 samples are the first keyed 10 ms, the next 20480 are silent
        let samples = read(&driver, 0, 40_960);
        let keyed = samples[..20_480].iter().map(|s| s.norm()).sum::<f32>() / 20_480.0;
        let silent = samples[20_480..].iter().map(|s| s.norm()).sum::<f32>() / 20_480.0;
        assert!(keyed > 0.4, "keyed level {}", keyed);
        assert!(silent < 0.01, "silent level {}", silent);
    }

    #[test]
    fn read_requires_configure() {
        let driver = SyntheticDriver::new(&[quiet_profile(0)], false);
        let mut handle = driver.open(0).unwrap();
        let mut buffer = vec![Complex32::new(0.0, 0.0); 16];
        assert!(matches!(
            handle.read_block(&mut buffer, Duration::from_millis(10)),
            Err(EngineError::Driver(_))
        ));
    }

    #[test]
    fn realtime_handle_is_paced_by_sample_rate() {
        let driver = SyntheticDriver::new(&[quiet_profile(0)], true);
        let started = Instant::now();
        // 40960 samples at 2.048 MS/s is 20 ms of signal
        read(&driver, 0, 40_960);
        assert!(started.elapsed() >= Duration::from_millis(19));
    }
}
