//! Device merge engine
//!
//! Combines the port-scan, service-discovery and SSDP views of the network
//! into one record per address. The merge is recomputed from scratch on every
//! update, so the result only depends on the current contents of the three
//! source maps.

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;

use crate::device::{DeviceRecord, ServiceRecord};

/// Merge the three per-source maps into a list sorted by address string
///
/// Field priority:
/// - `open_ports` and `response_time_ms` only come from the port scan
/// - `hostname` comes from the port scan, falling back to service discovery
/// - `service_name` and `service_type` only come from service discovery
/// - `ssdp_info` comes from SSDP, falling back to a value already carried by
///   the port-scan record
pub fn merge_devices(
    ports: &HashMap<Ipv4Addr, DeviceRecord>,
    services: &HashMap<Ipv4Addr, ServiceRecord>,
    ssdp: &HashMap<Ipv4Addr, String>,
) -> Vec<DeviceRecord> {
    let addresses: BTreeSet<Ipv4Addr> = ports
        .keys()
        .chain(services.keys())
        .chain(ssdp.keys())
        .copied()
        .collect();

    let mut merged: Vec<DeviceRecord> = addresses
        .into_iter()
        .map(|ip| merge_one(ip, ports.get(&ip), services.get(&ip), ssdp.get(&ip)))
        .collect();

    sort_by_address(&mut merged);
    merged
}

fn merge_one(
    ip: Ipv4Addr,
    scanned: Option<&DeviceRecord>,
    service: Option<&ServiceRecord>,
    ssdp: Option<&String>,
) -> DeviceRecord {
    let mut record = DeviceRecord::new(ip);

    if let Some(scanned) = scanned {
        record.open_ports = scanned.open_ports.clone();
        record.response_time_ms = scanned.response_time_ms;
        record.hostname = scanned.hostname.clone();
        record.ssdp_info = scanned.ssdp_info.clone();
    }

    if let Some(service) = service {
        if record.hostname.is_none() {
            record.hostname = service.hostname.clone();
        }
        record.service_name = Some(service.name.clone());
        record.service_type = Some(service.service_type.clone());
    }

    if let Some(raw) = ssdp {
        record.ssdp_info = Some(raw.clone());
    }

    record
}

/// Sort records by the dotted-quad string of their address
///
/// The ordering is lexicographic, so `10.0.0.10` sorts before `10.0.0.2`.
pub fn sort_by_address(records: &mut [DeviceRecord]) {
    records.sort_by_cached_key(|r| r.ip.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn service(name: &str, ty: &str, hostname: Option<&str>) -> ServiceRecord {
        ServiceRecord {
            name: name.to_string(),
            service_type: ty.to_string(),
            hostname: hostname.map(str::to_string),
        }
    }

    #[test]
    fn test_hostname_falls_back_to_service_discovery() {
        let mut ports = HashMap::new();
        ports.insert(ip(5), DeviceRecord::reachable(ip(5), [631], 4.0));
        let mut services = HashMap::new();
        services.insert(ip(5), service("Office", "_ipp._tcp", Some("printer.local")));

        let merged = merge_devices(&ports, &services, &HashMap::new());

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].hostname.as_deref(), Some("printer.local"));
        assert_eq!(merged[0].service_name.as_deref(), Some("Office"));
        assert_eq!(merged[0].service_type.as_deref(), Some("_ipp._tcp"));
        assert!(merged[0].has_open_port(631));
    }

    #[test]
    fn test_port_scan_hostname_wins() {
        let mut ports = HashMap::new();
        ports.insert(ip(5), DeviceRecord::reachable(ip(5), [22], 1.0).with_hostname("nas.lan"));
        let mut services = HashMap::new();
        services.insert(ip(5), service("NAS", "_smb._tcp", Some("nas.local")));

        let merged = merge_devices(&ports, &services, &HashMap::new());
        assert_eq!(merged[0].hostname.as_deref(), Some("nas.lan"));
    }

    #[test]
    fn test_passive_only_devices_are_listed() {
        let mut services = HashMap::new();
        services.insert(ip(7), service("Living Room", "_airplay._tcp", None));
        let mut ssdp = HashMap::new();
        ssdp.insert(ip(8), "SERVER: TestDevice/1.0".to_string());

        let merged = merge_devices(&HashMap::new(), &services, &ssdp);

        assert_eq!(merged.len(), 2);
        assert!(merged[0].open_ports.is_empty());
        assert!(merged[0].response_time_ms.is_none());
        assert_eq!(merged[1].ssdp_info.as_deref(), Some("SERVER: TestDevice/1.0"));
    }

    #[test]
    fn test_ssdp_preserved_from_port_record() {
        let mut scanned = DeviceRecord::reachable(ip(9), [80], 2.0);
        scanned.ssdp_info = Some("SERVER: Old/1.0".to_string());
        let mut ports = HashMap::new();
        ports.insert(ip(9), scanned);

        let merged = merge_devices(&ports, &HashMap::new(), &HashMap::new());
        assert_eq!(merged[0].ssdp_info.as_deref(), Some("SERVER: Old/1.0"));

        let mut ssdp = HashMap::new();
        ssdp.insert(ip(9), "SERVER: New/2.0".to_string());
        let merged = merge_devices(&ports, &HashMap::new(), &ssdp);
        assert_eq!(merged[0].ssdp_info.as_deref(), Some("SERVER: New/2.0"));
    }

    #[test]
    fn test_one_record_per_address() {
        let mut ports = HashMap::new();
        ports.insert(ip(3), DeviceRecord::reachable(ip(3), [80], 1.0));
        let mut services = HashMap::new();
        services.insert(ip(3), service("Router", "_http._tcp", None));
        let mut ssdp = HashMap::new();
        ssdp.insert(ip(3), "SERVER: Router".to_string());

        let merged = merge_devices(&ports, &services, &ssdp);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].ip, ip(3));
        assert_eq!(merged[0].service_name.as_deref(), Some("Router"));
        assert_eq!(merged[0].ssdp_info.as_deref(), Some("SERVER: Router"));
    }

    #[test]
    fn test_sorted_lexicographically() {
        let mut ports = HashMap::new();
        for last in [2, 10, 1, 100] {
            ports.insert(ip(last), DeviceRecord::reachable(ip(last), [80], 1.0));
        }

        let merged = merge_devices(&ports, &HashMap::new(), &HashMap::new());
        let order: Vec<String> = merged.iter().map(|r| r.ip.to_string()).collect();
        assert_eq!(order, vec!["10.0.0.1", "10.0.0.10", "10.0.0.100", "10.0.0.2"]);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut ports = HashMap::new();
        ports.insert(ip(4), DeviceRecord::reachable(ip(4), [445, 139], 7.5));
        let mut services = HashMap::new();
        services.insert(ip(6), service("Mac", "_workstation._tcp", Some("mac.local")));
        let mut ssdp = HashMap::new();
        ssdp.insert(ip(4), "ST: upnp:rootdevice".to_string());

        let first = merge_devices(&ports, &services, &ssdp);
        let second = merge_devices(&ports, &services, &ssdp);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_inputs() {
        let merged = merge_devices(&HashMap::new(), &HashMap::new(), &HashMap::new());
        assert!(merged.is_empty());
    }
}
