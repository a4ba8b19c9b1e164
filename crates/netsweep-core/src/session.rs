//! Scan session state and the published snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::DeviceRecord;
use crate::subnet::{SubnetPrefix, TOTAL_HOSTS};

/// Lifecycle state of the current scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// No scan has been started
    #[default]
    Idle,
    /// A sweep is in progress
    Running,
    /// The last sweep visited every host
    Completed,
    /// The last scan was cancelled before finishing
    Cancelled,
}

/// State of one sweep over a subnet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSession {
    /// Unique session identifier
    pub id: Uuid,
    /// Generation counter; events tagged with an older generation are stale
    pub generation: u64,
    /// First three octets of the scanned network
    pub subnet_prefix: SubnetPrefix,
    /// When the scan was started
    pub started_at: DateTime<Utc>,
    /// Whether the scan was cancelled
    pub cancelled: bool,
    /// Hosts whose probes have finished
    pub completed_hosts: usize,
    /// Hosts in the sweep (always 254)
    pub total_hosts: usize,
}

impl ScanSession {
    pub fn new(generation: u64, subnet_prefix: SubnetPrefix) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation,
            subnet_prefix,
            started_at: Utc::now(),
            cancelled: false,
            completed_hosts: 0,
            total_hosts: TOTAL_HOSTS,
        }
    }

    /// Fraction of hosts completed, in `0.0..=1.0`
    pub fn progress_fraction(&self) -> f32 {
        if self.total_hosts == 0 {
            return 0.0;
        }
        (self.completed_hosts.min(self.total_hosts) as f32) / (self.total_hosts as f32)
    }

    /// Seconds since the session started
    pub fn elapsed_secs(&self) -> f64 {
        let elapsed = Utc::now() - self.started_at;
        elapsed.num_milliseconds().max(0) as f64 / 1000.0
    }
}

/// Everything the presentation layer can observe about scanning
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanSnapshot {
    pub status: ScanStatus,
    pub session: Option<ScanSession>,
    /// Merged device list, sorted by address string
    pub devices: Vec<DeviceRecord>,
    /// Completed fraction of the sweep
    pub progress: f32,
    /// Total duration of the last completed scan (0 otherwise)
    pub duration_secs: f64,
}
