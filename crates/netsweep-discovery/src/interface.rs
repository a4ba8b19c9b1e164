//! Local interface lookup
//!
//! Finds the IPv4 address of the interface used for scanning. The scan range
//! is always the /24 around that address; the netmask is reported but not used
//! to size the range.

use netsweep_core::SubnetPrefix;
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use serde::Serialize;
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("No usable IPv4 network interface found")]
    NotFound,
    #[error("Interface {0} not found or has no IPv4 address")]
    NamedNotFound(String),
    #[error("Failed to enumerate network interfaces: {0}")]
    Query(#[from] network_interface::Error),
}

/// An IPv4 address assigned to a local interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddr {
    pub name: String,
    pub ip: Ipv4Addr,
    pub netmask: Option<Ipv4Addr>,
}

/// The local network a scan will cover
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalSubnet {
    /// Interface name (e.g. `en0`, `eth0`)
    pub interface: String,
    /// Address of this host on that interface
    pub ip: Ipv4Addr,
    /// Netmask as reported by the OS
    pub netmask: Option<Ipv4Addr>,
}

impl LocalSubnet {
    /// First three octets of the local address
    pub fn prefix(&self) -> SubnetPrefix {
        SubnetPrefix::of(self.ip)
    }

    /// Netmask length in bits, if known
    pub fn prefix_len(&self) -> Option<u8> {
        self.netmask.map(|m| u32::from(m).count_ones() as u8)
    }
}

impl From<InterfaceAddr> for LocalSubnet {
    fn from(addr: InterfaceAddr) -> Self {
        Self {
            interface: addr.name,
            ip: addr.ip,
            netmask: addr.netmask,
        }
    }
}

/// Query the OS for the interface to scan
///
/// With `preferred` set, only that interface is considered.
pub fn resolve_local_subnet(preferred: Option<&str>) -> Result<LocalSubnet, InterfaceError> {
    let candidates = list_ipv4_addrs()?;
    debug!(count = candidates.len(), "Enumerated IPv4 interface addresses");
    select_interface(&candidates, preferred).map(LocalSubnet::from)
}

/// All IPv4 addresses on local interfaces
pub fn list_ipv4_addrs() -> Result<Vec<InterfaceAddr>, InterfaceError> {
    let interfaces = NetworkInterface::show()?;
    Ok(interfaces
        .into_iter()
        .flat_map(|iface| {
            let name = iface.name;
            iface.addr.into_iter().filter_map(move |addr| match addr {
                Addr::V4(v4) => Some(InterfaceAddr {
                    name: name.clone(),
                    ip: v4.ip,
                    netmask: v4.netmask,
                }),
                Addr::V6(_) => None,
            })
        })
        .collect())
}

/// Pick the interface to scan from a list of candidates
pub fn select_interface(
    candidates: &[InterfaceAddr],
    preferred: Option<&str>,
) -> Result<InterfaceAddr, InterfaceError> {
    if let Some(name) = preferred {
        return candidates
            .iter()
            .find(|c| c.name == name && !c.ip.is_unspecified())
            .cloned()
            .ok_or_else(|| InterfaceError::NamedNotFound(name.to_string()));
    }

    candidates
        .iter()
        .find(|c| is_scannable(c))
        .cloned()
        .ok_or(InterfaceError::NotFound)
}

/// Whether an address belongs to an interface worth scanning from
pub fn is_scannable(addr: &InterfaceAddr) -> bool {
    // Skip loopback and container bridges
    !addr.ip.is_loopback()
        && !addr.ip.is_unspecified()
        && !addr.ip.is_link_local()
        && !addr.name.starts_with("lo")
        && !addr.name.starts_with("docker")
        && !addr.name.starts_with("br-")
        && !addr.name.starts_with("veth")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(name: &str, ip: [u8; 4], mask: Option<[u8; 4]>) -> InterfaceAddr {
        InterfaceAddr {
            name: name.to_string(),
            ip: Ipv4Addr::from(ip),
            netmask: mask.map(Ipv4Addr::from),
        }
    }

    #[test]
    fn test_select_skips_loopback_and_bridges() {
        let candidates = vec![
            addr("lo", [127, 0, 0, 1], Some([255, 0, 0, 0])),
            addr("docker0", [172, 17, 0, 1], Some([255, 255, 0, 0])),
            addr("veth12ab", [172, 18, 0, 2], None),
            addr("eth0", [192, 168, 1, 42], Some([255, 255, 255, 0])),
        ];
        let selected = select_interface(&candidates, None).unwrap();
        assert_eq!(selected.name, "eth0");
        assert_eq!(selected.ip, Ipv4Addr::new(192, 168, 1, 42));
    }

    #[test]
    fn test_select_preferred() {
        let candidates = vec![
            addr("eth0", [192, 168, 1, 42], None),
            addr("en0", [10, 0, 0, 7], Some([255, 255, 255, 0])),
        ];
        let selected = select_interface(&candidates, Some("en0")).unwrap();
        assert_eq!(selected.ip, Ipv4Addr::new(10, 0, 0, 7));

        let missing = select_interface(&candidates, Some("wlan0"));
        assert!(matches!(missing, Err(InterfaceError::NamedNotFound(name)) if name == "wlan0"));
    }

    #[test]
    fn test_no_interface() {
        let candidates = vec![addr("lo", [127, 0, 0, 1], None)];
        assert!(matches!(
            select_interface(&candidates, None),
            Err(InterfaceError::NotFound)
        ));
        assert!(matches!(select_interface(&[], None), Err(InterfaceError::NotFound)));
    }

    #[test]
    fn test_local_subnet_prefix() {
        let subnet = LocalSubnet::from(addr("en0", [192, 168, 1, 42], Some([255, 255, 254, 0])));
        assert_eq!(subnet.prefix().to_string(), "192.168.1");
        // /23 netmask is reported but the scan range stays a /24
        assert_eq!(subnet.prefix_len(), Some(23));
    }
}
