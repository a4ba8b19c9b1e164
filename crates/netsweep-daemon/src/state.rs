//! Application state management

use netsweep_core::{display_name, DeviceKind, DeviceRecord};
use netsweep_discovery::{DiscoveryEvent, DiscoveryScanner};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Discovery scanner
    pub scanner: Arc<DiscoveryScanner>,
    /// Configuration as loaded at startup
    pub config: Config,
}

/// A merged device with its derived classification
#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    #[serde(flatten)]
    pub record: DeviceRecord,
    pub kind: DeviceKind,
    pub display_name: String,
}

impl From<DeviceRecord> for DeviceView {
    fn from(record: DeviceRecord) -> Self {
        Self {
            kind: DeviceKind::classify(&record),
            display_name: display_name(&record),
            record,
        }
    }
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config) -> Arc<Self> {
        let scanner = Arc::new(DiscoveryScanner::new(config.to_scanner_config()));
        Arc::new(Self { scanner, config })
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.scanner.subscribe()
    }

    /// Published devices with classification
    pub async fn devices(&self) -> Vec<DeviceView> {
        self.scanner
            .devices()
            .await
            .into_iter()
            .map(DeviceView::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_device_view_serialization() {
        let record = DeviceRecord::reachable(Ipv4Addr::new(192, 168, 1, 30), [9100], 4.2);
        let view = DeviceView::from(record);
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["ip"], "192.168.1.30");
        assert_eq!(json["kind"], "printer");
        assert_eq!(json["display_name"], "Printer");
        assert_eq!(json["open_ports"], serde_json::json!([9100]));
    }
}
