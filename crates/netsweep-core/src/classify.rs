//! Device classification from observed signals
//!
//! Gives each merged record a coarse kind and a human-readable name based on
//! its open ports, advertised service type and SSDP text.

use serde::{Deserialize, Serialize};

use crate::device::DeviceRecord;

/// Ports used by network printers (JetDirect, LPR, IPP)
pub const PRINTER_PORTS: &[u16] = &[9100, 515, 631];
/// Ports used by web interfaces
pub const WEB_PORTS: &[u16] = &[80, 443];
/// Ports used by SMB/NetBIOS
pub const WINDOWS_PORTS: &[u16] = &[139, 445];

/// Coarse device category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Printer,
    WebDevice,
    UnixHost,
    WindowsHost,
    Workstation,
    AirPlay,
    GameConsole,
    SmartTv,
    Unknown,
}

impl DeviceKind {
    /// Classify a record; the first matching rule wins
    pub fn classify(record: &DeviceRecord) -> Self {
        if record.has_any_port(PRINTER_PORTS) {
            return Self::Printer;
        }
        if record.has_any_port(WEB_PORTS) {
            return Self::WebDevice;
        }
        if record.has_open_port(22) {
            return Self::UnixHost;
        }
        if record.has_any_port(WINDOWS_PORTS) {
            return Self::WindowsHost;
        }

        if let Some(service_type) = &record.service_type {
            let service_type = service_type.to_ascii_lowercase();
            if service_type.contains("workstation") {
                return Self::Workstation;
            }
            if service_type.contains("airplay") {
                return Self::AirPlay;
            }
            if service_type.contains("printer") || service_type.contains("ipp") {
                return Self::Printer;
            }
        }

        if let Some(ssdp) = &record.ssdp_info {
            if ssdp.contains("Xbox") {
                return Self::GameConsole;
            }
            if ssdp.contains("DLNA") {
                return Self::SmartTv;
            }
        }

        Self::Unknown
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Printer => "Printer",
            Self::WebDevice => "Router/Web Device",
            Self::UnixHost => "Linux/Unix Device",
            Self::WindowsHost => "Windows PC",
            Self::Workstation => "Mac/PC",
            Self::AirPlay => "Apple TV/AirPlay",
            Self::GameConsole => "Xbox",
            Self::SmartTv => "Smart TV",
            Self::Unknown => "Unknown Device",
        }
    }
}

/// Name to show for a device: its hostname if it has a real one, else its kind
pub fn display_name(record: &DeviceRecord) -> String {
    match &record.hostname {
        Some(hostname) if !hostname.is_empty() && *hostname != record.ip.to_string() => {
            hostname.clone()
        }
        _ => DeviceKind::classify(record).label().to_string(),
    }
}
