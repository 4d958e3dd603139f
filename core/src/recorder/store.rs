use crate::prelude::{Burst, DeviceIndex, DeviceInfo, EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Row of the `devices` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRow {
    pub device_index: DeviceIndex,
    pub name: String,
    pub serial: String,
}

impl From<&DeviceInfo> for DeviceRow {
    fn from(info: &DeviceInfo) -> Self {
        Self {
            device_index: info.index,
            name: info.name.clone(),
            serial: info.serial.clone(),
        }
    }
}

/// Row of the `bursts` table, keyed by a surrogate id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstRow {
    pub id: u64,
    pub external_id: Uuid,
    pub device_id: DeviceIndex,
    pub frequency: f64,
    pub power: f32,
    pub timestamp: DateTime<Utc>,
    pub duration: f64,
    pub bandwidth: f64,
    pub iq_file: Option<String>,
}

impl BurstRow {
    pub fn new(id: u64, burst: &Burst) -> Self {
        Self {
            id,
            external_id: burst.id,
            device_id: burst.device_id,
            frequency: burst.frequency_hz,
            power: burst.peak_power_dbfs,
            timestamp: burst.timestamp,
            duration: burst.duration_s,
            bandwidth: burst.bandwidth_hz,
            iq_file: burst.capture_ref.clone(),
        }
    }

    pub fn to_burst(&self) -> Burst {
        Burst {
            id: self.external_id,
            device_id: self.device_id,
            frequency_hz: self.frequency,
            peak_power_dbfs: self.power,
            timestamp: self.timestamp,
            duration_s: self.duration,
            bandwidth_hz: self.bandwidth,
            capture_ref: self.iq_file.clone(),
        }
    }
}

/// Durable home of burst records. Writes return only once the data is stored.
pub trait BurstStore: Send + Sync {
    /// Inserts or refreshes a device row.
    fn register_device(&self, device: &DeviceRow) -> EngineResult<()>;

    /// Inserts a burst and returns its surrogate id. The device must be registered.
    fn insert_burst(&self, burst: &Burst) -> EngineResult<u64>;

    /// Sets `iq_file` of an existing burst row.
    fn attach_capture(&self, burst_id: u64, iq_file: &str) -> EngineResult<()>;

    fn bursts(&self) -> EngineResult<Vec<BurstRow>>;
}

fn unknown_device(device: DeviceIndex) -> EngineError {
    EngineError::PersistenceFailure(format!("device {} is not registered", device))
}

fn unknown_burst(burst_id: u64) -> EngineError {
    EngineError::PersistenceFailure(format!("burst row {} does not exist", burst_id))
}

#[derive(Default)]
struct Tables {
    devices: BTreeMap<DeviceIndex, DeviceRow>,
    bursts: Vec<BurstRow>,
}

impl Tables {
    fn next_burst_id(&self) -> u64 {
        self.bursts.last().map_or(1, |row| row.id + 1)
    }

    fn capture_target(&mut self, burst_id: u64) -> EngineResult<&mut BurstRow> {
        self.bursts
            .iter_mut()
            .find(|row| row.id == burst_id)
            .ok_or_else(|| unknown_burst(burst_id))
    }
}

/// In-process store; can be switched unavailable to exercise failure paths.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn devices(&self) -> Vec<DeviceRow> {
        self.tables
            .lock()
            .map(|tables| tables.devices.values().cloned().collect())
            .unwrap_or_default()
    }

    fn tables(&self) -> EngineResult<std::sync::MutexGuard<'_, Tables>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(EngineError::PersistenceFailure("store unavailable".into()));
        }
        self.tables
            .lock()
            .map_err(|_| EngineError::PersistenceFailure("store lock poisoned".into()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BurstStore for MemoryStore {
    fn register_device(&self, device: &DeviceRow) -> EngineResult<()> {
        self.tables()?
            .devices
            .insert(device.device_index, device.clone());
        Ok(())
    }

    fn insert_burst(&self, burst: &Burst) -> EngineResult<u64> {
        let mut tables = self.tables()?;
        if !tables.devices.contains_key(&burst.device_id) {
            return Err(unknown_device(burst.device_id));
        }
        let id = tables.next_burst_id();
        tables.bursts.push(BurstRow::new(id, burst));
        Ok(id)
    }

    fn attach_capture(&self, burst_id: u64, iq_file: &str) -> EngineResult<()> {
        let mut tables = self.tables()?;
        tables.capture_target(burst_id)?.iq_file = Some(iq_file.to_string());
        Ok(())
    }

    fn bursts(&self) -> EngineResult<Vec<BurstRow>> {
        Ok(self.tables()?.bursts.clone())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
enum Record {
    Device(DeviceRow),
    Burst(BurstRow),
    Capture { burst_id: u64, iq_file: String },
}

struct JsonLinesState {
    file: File,
    tables: Tables,
}

/// Append-only JSON-lines file; every write is synced before it returns.
pub struct JsonLinesStore {
    path: PathBuf,
    state: Mutex<JsonLinesState>,
}

impl JsonLinesStore {
    /// Opens (or creates) the log at `path`, replaying what is already there.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                EngineError::PersistenceFailure(format!("create {}: {}", parent.display(), err))
            })?;
        }
        let tables = if path.exists() {
            Self::replay(&path)?
        } else {
            Tables::default()
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| {
                EngineError::PersistenceFailure(format!("open {}: {}", path.display(), err))
            })?;
        log::info!(
            "burst store {} holds {} devices and {} bursts",
            path.display(),
            tables.devices.len(),
            tables.bursts.len()
        );
        Ok(Self {
            path,
            state: Mutex::new(JsonLinesState { file, tables }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads a log back into its device and burst tables.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<(Vec<DeviceRow>, Vec<BurstRow>)> {
        let tables = Self::replay(path.as_ref())?;
        Ok((tables.devices.into_values().collect(), tables.bursts))
    }

    fn replay(path: &Path) -> EngineResult<Tables> {
        let file = File::open(path).map_err(|err| {
            EngineError::PersistenceFailure(format!("read {}: {}", path.display(), err))
        })?;
        let mut tables = Tables::default();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|err| EngineError::PersistenceFailure(err.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(&line).map_err(|err| {
                EngineError::PersistenceFailure(format!(
                    "{} line {}: {}",
                    path.display(),
                    number + 1,
                    err
                ))
            })?;
            match record {
                Record::Device(row) => {
                    tables.devices.insert(row.device_index, row);
                }
                Record::Burst(row) => tables.bursts.push(row),
                Record::Capture { burst_id, iq_file } => {
                    tables.capture_target(burst_id)?.iq_file = Some(iq_file);
                }
            }
        }
        Ok(tables)
    }

    fn append(file: &mut File, record: &Record) -> EngineResult<()> {
        let mut line = serde_json::to_string(record)
            .map_err(|err| EngineError::PersistenceFailure(err.to_string()))?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|err| EngineError::PersistenceFailure(err.to_string()))
    }

    fn state(&self) -> EngineResult<std::sync::MutexGuard<'_, JsonLinesState>> {
        self.state
            .lock()
            .map_err(|_| EngineError::PersistenceFailure("store lock poisoned".into()))
    }
}

impl BurstStore for JsonLinesStore {
    fn register_device(&self, device: &DeviceRow) -> EngineResult<()> {
        let mut state = self.state()?;
        if state.tables.devices.get(&device.device_index) == Some(device) {
            return Ok(());
        }
        Self::append(&mut state.file, &Record::Device(device.clone()))?;
        state.tables.devices.insert(device.device_index, device.clone());
        Ok(())
    }

    fn insert_burst(&self, burst: &Burst) -> EngineResult<u64> {
        let mut state = self.state()?;
        if !state.tables.devices.contains_key(&burst.device_id) {
            return Err(unknown_device(burst.device_id));
        }
        let row = BurstRow::new(state.tables.next_burst_id(), burst);
        Self::append(&mut state.file, &Record::Burst(row.clone()))?;
        let id = row.id;
        state.tables.bursts.push(row);
        Ok(id)
    }

    fn attach_capture(&self, burst_id: u64, iq_file: &str) -> EngineResult<()> {
        let mut state = self.state()?;
        state.tables.capture_target(burst_id)?;
        Self::append(
            &mut state.file,
            &Record::Capture {
                burst_id,
                iq_file: iq_file.to_string(),
            },
        )?;
        state.tables.capture_target(burst_id)?.iq_file = Some(iq_file.to_string());
        Ok(())
    }

    fn bursts(&self) -> EngineResult<Vec<BurstRow>> {
        Ok(self.state()?.tables.bursts.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burst(device_id: DeviceIndex) -> Burst {
        Burst {
            id: Uuid::new_v4(),
            device_id,
            frequency_hz: 433_920_000.0,
            peak_power_dbfs: -28.5,
            timestamp: Utc::now(),
            duration_s: 0.3,
            bandwidth_hz: 12_000.0,
            capture_ref: None,
        }
    }

    fn device(index: DeviceIndex) -> DeviceRow {
        DeviceRow::from(&DeviceInfo::new(index, "RTL2838", format!("0000000{}", index)))
    }

    #[test]
    fn memory_store_enforces_device_foreign_key() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.insert_burst(&burst(0)),
            Err(EngineError::PersistenceFailure(_))
        ));
        store.register_device(&device(0)).unwrap();
        assert_eq!(store.insert_burst(&burst(0)).unwrap(), 1);
        assert_eq!(store.insert_burst(&burst(0)).unwrap(), 2);
        assert_eq!(store.devices().len(), 1);
    }

    #[test]
    fn unavailable_memory_store_fails_writes() {
        let store = MemoryStore::new();
        store.register_device(&device(0)).unwrap();
        store.set_available(false);
        assert!(store.insert_burst(&burst(0)).is_err());
        store.set_available(true);
        assert!(store.bursts().unwrap().is_empty());
    }

    #[test]
    fn json_lines_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("bursts.jsonl");
        let inserted = burst(1);
        {
            let store = JsonLinesStore::open(&path).unwrap();
            store.register_device(&device(1)).unwrap();
            let id = store.insert_burst(&inserted).unwrap();
            store.attach_capture(id, "20240101_000000_x.iq").unwrap();
            assert!(store.attach_capture(99, "missing.iq").is_err());
        }

        let reopened = JsonLinesStore::open(&path).unwrap();
        let rows = reopened.bursts().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].external_id, inserted.id);
        assert_eq!(rows[0].iq_file.as_deref(), Some("20240101_000000_x.iq"));
        assert_eq!(reopened.insert_burst(&burst(1)).unwrap(), 2);

        let (devices, bursts) = JsonLinesStore::load(&path).unwrap();
        assert_eq!(devices, vec![device(1)]);
        assert_eq!(bursts.len(), 2);
        assert_eq!(bursts[0].to_burst().capture_ref.as_deref(), Some("20240101_000000_x.iq"));
    }
}
