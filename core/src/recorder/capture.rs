use crate::prelude::{Burst, Complex32, EngineError, EngineResult};
use crossbeam::channel::{unbounded, Sender};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Raw samples of one persisted burst, waiting to be written.
pub struct CaptureJob {
    pub row_id: u64,
    pub burst: Burst,
    pub samples: Vec<Complex32>,
}

/// Result of one capture job, handed to the completion callback.
pub struct CaptureOutcome {
    pub row_id: u64,
    pub burst_id: Uuid,
    pub result: EngineResult<String>,
}

/// `{YYYYmmdd_HHMMSS}_{burst id}.iq`, stamped with the burst start.
pub fn capture_file_name(burst: &Burst) -> String {
    format!("{}_{}.iq", burst.timestamp.format("%Y%m%d_%H%M%S"), burst.id)
}

/// Writes samples as interleaved little-endian `f32` I/Q pairs.
pub fn write_capture(path: &Path, samples: &[Complex32]) -> EngineResult<()> {
    let failure =
        |err: std::io::Error| EngineError::CaptureWriteFailure(format!("{}: {}", path.display(), err));
    let file = File::create(path).map_err(failure)?;
    let mut writer = BufWriter::new(file);
    for sample in samples {
        writer.write_all(&sample.re.to_le_bytes()).map_err(failure)?;
        writer.write_all(&sample.im.to_le_bytes()).map_err(failure)?;
    }
    let file = writer
        .into_inner()
        .map_err(|err| failure(err.into_error()))?;
    file.sync_all().map_err(failure)
}

pub fn read_capture(path: &Path) -> EngineResult<Vec<Complex32>> {
    let mut bytes = Vec::new();
    File::open(path)
        .map(BufReader::new)
        .and_then(|mut reader| reader.read_to_end(&mut bytes))
        .map_err(|err| EngineError::CaptureWriteFailure(format!("{}: {}", path.display(), err)))?;
    Ok(bytes
        .chunks_exact(8)
        .map(|pair| {
            let re = f32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]);
            let im = f32::from_le_bytes([pair[4], pair[5], pair[6], pair[7]]);
            Complex32::new(re, im)
        })
        .collect())
}

/// Background thread that writes capture jobs in submission order.
pub struct CaptureWriter {
    directory: PathBuf,
    sender: Option<Sender<CaptureJob>>,
    handle: Option<JoinHandle<()>>,
    pending: Arc<AtomicUsize>,
}

impl CaptureWriter {
    pub fn spawn<F>(directory: impl Into<PathBuf>, on_complete: F) -> EngineResult<Self>
    where
        F: Fn(CaptureOutcome) + Send + 'static,
    {
        let directory = directory.into();
        fs::create_dir_all(&directory).map_err(|err| {
            EngineError::CaptureWriteFailure(format!("create {}: {}", directory.display(), err))
        })?;

        let (sender, receiver) = unbounded::<CaptureJob>();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker_pending = Arc::clone(&pending);
        let worker_dir = directory.clone();
        let handle = thread::Builder::new()
            .name("rf-capture".into())
            .spawn(move || {
                for job in receiver.iter() {
                    let name = capture_file_name(&job.burst);
                    let result = write_capture(&worker_dir.join(&name), &job.samples).map(|_| name);
                    on_complete(CaptureOutcome {
                        row_id: job.row_id,
                        burst_id: job.burst.id,
                        result,
                    });
                    worker_pending.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .map_err(|err| EngineError::Internal(format!("spawn capture thread: {}", err)))?;

        Ok(Self {
            directory,
            sender: Some(sender),
            handle: Some(handle),
            pending,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn submit(&self, job: CaptureJob) -> EngineResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| EngineError::CaptureWriteFailure("capture writer stopped".into()))?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        sender.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            EngineError::CaptureWriteFailure("capture thread exited".into())
        })
    }

    /// Jobs submitted and not yet completed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Waits until every submitted job has completed. Returns false on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.pending() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
        true
    }
}

impl Drop for CaptureWriter {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    fn burst() -> Burst {
        Burst {
            id: Uuid::new_v4(),
            device_id: 0,
            frequency_hz: 433_920_000.0,
            peak_power_dbfs: -20.0,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 12).unwrap(),
            duration_s: 0.2,
            bandwidth_hz: 1_000.0,
            capture_ref: None,
        }
    }

    #[test]
    fn file_name_carries_start_time_and_id() {
        let burst = burst();
        assert_eq!(
            capture_file_name(&burst),
            format!("20240517_083012_{}.iq", burst.id)
        );
    }

    #[test]
    fn samples_are_interleaved_little_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.iq");
        let samples = vec![Complex32::new(0.5, -0.25), Complex32::new(-1.0, 1.0)];
        write_capture(&path, &samples).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..4], &0.5f32.to_le_bytes());
        assert_eq!(&bytes[4..8], &(-0.25f32).to_le_bytes());
        assert_eq!(read_capture(&path).unwrap(), samples);
    }

    #[test]
    fn writer_reports_every_job() {
        let dir = tempfile::tempdir().unwrap();
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&outcomes);
        let writer = CaptureWriter::spawn(dir.path().join("captures"), move |outcome| {
            sink.lock().unwrap().push(outcome.result);
        })
        .unwrap();

        for row_id in 1..=3 {
            writer
                .submit(CaptureJob {
                    row_id,
                    burst: burst(),
                    samples: vec![Complex32::new(0.1, 0.2); 64],
                })
                .unwrap();
        }
        assert!(writer.wait_idle(Duration::from_secs(5)));

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 3);
        for result in outcomes.iter() {
            let name = result.as_ref().unwrap();
            assert_eq!(fs::metadata(writer.directory().join(name)).unwrap().len(), 512);
        }
    }
}
