//! Device types for tracking discovered hosts

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// A device on the local subnet, keyed by its IPv4 address
///
/// Each discovery source fills in the fields it knows about. The merge engine
/// combines the per-source views into one record per address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// IPv4 address of the device (unique key)
    pub ip: Ipv4Addr,
    /// Time from first probe dispatch to last port result, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    /// Hostname from reverse DNS or service resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// TCP ports that accepted a connection
    #[serde(default)]
    pub open_ports: BTreeSet<u16>,
    /// Advertised mDNS service instance name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// Advertised mDNS service type (e.g. `_ipp._tcp`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    /// Raw SSDP response text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssdp_info: Option<String>,
}

impl DeviceRecord {
    /// Create an empty record for an address
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            response_time_ms: None,
            hostname: None,
            open_ports: BTreeSet::new(),
            service_name: None,
            service_type: None,
            ssdp_info: None,
        }
    }

    /// Create a record for a host that answered on one or more ports
    pub fn reachable(ip: Ipv4Addr, open_ports: impl IntoIterator<Item = u16>, response_time_ms: f64) -> Self {
        Self {
            open_ports: open_ports.into_iter().collect(),
            response_time_ms: Some(response_time_ms),
            ..Self::new(ip)
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Whether any port on this device accepted a connection
    pub fn has_open_port(&self, port: u16) -> bool {
        self.open_ports.contains(&port)
    }

    /// Whether any of the given ports is open
    pub fn has_any_port(&self, ports: &[u16]) -> bool {
        ports.iter().any(|p| self.open_ports.contains(p))
    }
}

/// What service discovery knows about an address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Service instance name (e.g. "Office Printer")
    pub name: String,
    /// Service type without the domain (e.g. `_ipp._tcp`)
    pub service_type: String,
    /// Host the service resolved to (e.g. `printer.local`)
    pub hostname: Option<String>,
}
