use crate::model::device::DeviceIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A finalized detection. Never updated once emitted; a new burst is a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Burst {
    pub id: Uuid,
    pub device_id: DeviceIndex,
    pub frequency_hz: f64,
    pub peak_power_dbfs: f32,
    /// Start of the burst.
    pub timestamp: DateTime<Utc>,
    pub duration_s: f64,
    pub bandwidth_hz: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_ref: Option<String>,
}

impl Burst {
    pub fn end_time(&self) -> DateTime<Utc> {
        self.timestamp + chrono::Duration::nanoseconds((self.duration_s * 1e9) as i64)
    }
}
