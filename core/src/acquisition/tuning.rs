use crate::prelude::{DeviceIndex, EngineError, EngineResult, HardwareCaps, ScanConfig, TuneRequest};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Single-slot mailbox: a new post overwrites whatever was not yet taken.
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Stores `value`, returning the unconsumed value it replaced.
    pub fn post(&self, value: T) -> Option<T> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(value)
    }

    /// Builds the next value from the unconsumed one, if any, and stores it
    /// under the same lock. An error leaves the slot as it was.
    pub fn post_with<E>(
        &self,
        build: impl FnOnce(Option<&T>) -> Result<T, E>,
    ) -> Result<(T, Option<T>), E>
    where
        T: Clone,
    {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let next = build(slot.as_ref())?;
        let replaced = slot.replace(next.clone());
        Ok((next, replaced))
    }

    pub fn take(&self) -> Option<T> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Validates tuning requests for one device and hands them to its worker.
///
/// Requests are merged against the last posted config (the unapplied one if
/// the worker has not picked it up yet, else the applied one), validated in
/// full and posted as one immutable snapshot, so a request either lands
/// completely on a frame boundary or is rejected.
pub struct TuningController {
    device_index: DeviceIndex,
    caps: HardwareCaps,
    mailbox: Mailbox<Arc<ScanConfig>>,
    applied: RwLock<Arc<ScanConfig>>,
}

impl TuningController {
    pub fn new(device_index: DeviceIndex, caps: HardwareCaps, initial: Arc<ScanConfig>) -> Self {
        Self {
            device_index,
            caps,
            mailbox: Mailbox::new(),
            applied: RwLock::new(initial),
        }
    }

    pub fn device_index(&self) -> DeviceIndex {
        self.device_index
    }

    pub fn caps(&self) -> &HardwareCaps {
        &self.caps
    }

    /// Config the worker is currently scanning with.
    pub fn applied(&self) -> Arc<ScanConfig> {
        Arc::clone(&self.applied.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn request(&self, request: &TuneRequest) -> EngineResult<Arc<ScanConfig>> {
        if request.is_empty() {
            return Err(EngineError::InvalidInput("tune request changes nothing".into()));
        }
        let (validated, replaced) = self.mailbox.post_with(|pending| {
            let base = pending.cloned().unwrap_or_else(|| self.applied());
            let mut merged = base.apply(request);
            merged.device_index = self.device_index;
            merged.validate(&self.caps).map(Arc::new)
        })?;
        if replaced.is_some() {
            log::debug!(
                "device {} tune request folded into an unapplied one",
                self.device_index
            );
        }
        Ok(validated)
    }

    pub(crate) fn take_pending(&self) -> Option<Arc<ScanConfig>> {
        self.mailbox.take()
    }

    pub(crate) fn publish_applied(&self, config: Arc<ScanConfig>) {
        *self.applied.write().unwrap_or_else(PoisonError::into_inner) = config;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> TuningController {
        let initial = ScanConfig::for_device(2)
            .validate(&HardwareCaps::rtl_sdr())
            .unwrap();
        TuningController::new(2, HardwareCaps::rtl_sdr(), Arc::new(initial))
    }

    #[test]
    fn last_request_wins() {
        let tuning = controller();
        for mhz in [100u64, 200, 300] {
            tuning
                .request(&TuneRequest {
                    center_frequency_hz: Some(mhz * 1_000_000),
                    ..Default::default()
                })
                .unwrap();
        }
        let pending = tuning.take_pending().unwrap();
        assert_eq!(pending.center_frequency_hz, 300_000_000);
        assert!(tuning.take_pending().is_none());
    }

    #[test]
    fn invalid_request_leaves_mailbox_untouched() {
        let tuning = controller();
        tuning
            .request(&TuneRequest {
                gain_db: Some(20.0),
                ..Default::default()
            })
            .unwrap();
        let err = tuning
            .request(&TuneRequest {
                center_frequency_hz: Some(5_000_000_000),
                gain_db: Some(10.0),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::OutOfRange {
                field: "center_frequency_hz",
                ..
            }
        ));
        let pending = tuning.take_pending().unwrap();
        assert_eq!(pending.gain_db, 19.7);
    }

    #[test]
    fn requests_merge_against_applied_config() {
        let tuning = controller();
        let mut applied = ScanConfig::clone(&tuning.applied());
        applied.threshold_dbfs = -50.0;
        tuning.publish_applied(Arc::new(applied));

        let merged = tuning
            .request(&TuneRequest {
                ppm_correction: Some(12),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(merged.threshold_dbfs, -50.0);
        assert_eq!(merged.ppm_correction, 12);
        assert_eq!(merged.device_index, 2);
    }

    #[test]
    fn partial_requests_build_on_the_unapplied_one() {
        let tuning = controller();
        let first = tuning
            .request(&TuneRequest {
                center_frequency_hz: Some(100_000_000),
                ..Default::default()
            })
            .unwrap();
        let second = tuning
            .request(&TuneRequest {
                gain_db: Some(20.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(first.center_frequency_hz, 100_000_000);
        assert_eq!(second.center_frequency_hz, 100_000_000);

        let pending = tuning.take_pending().unwrap();
        assert_eq!(pending.center_frequency_hz, 100_000_000);
        assert_eq!(pending.gain_db, 19.7);
        assert!(Arc::ptr_eq(&pending, &second));
    }

    #[test]
    fn post_with_keeps_slot_on_error() {
        let mailbox = Mailbox::new();
        mailbox.post(1u32);
        let err = mailbox.post_with(|_| Err::<u32, _>("rejected"));
        assert_eq!(err, Err("rejected"));
        let (next, replaced) = mailbox
            .post_with(|current| Ok::<_, ()>(current.copied().unwrap_or(0) + 1))
            .unwrap();
        assert_eq!((next, replaced), (2, Some(1)));
        assert_eq!(mailbox.take(), Some(2));
    }

    #[test]
    fn empty_request_is_rejected() {
        assert!(controller().request(&TuneRequest::default()).is_err());
    }
}
