//! Helpers for reading raw SSDP responses
//!
//! Discovery keeps SSDP replies verbatim; these functions pull individual
//! headers out for display and classification.

/// SSDP multicast group
pub const SSDP_MULTICAST_ADDR: std::net::Ipv4Addr = std::net::Ipv4Addr::new(239, 255, 255, 250);
/// SSDP port
pub const SSDP_PORT: u16 = 1900;

/// Look up a header value (case-insensitive name match)
pub fn header<'a>(raw: &'a str, name: &str) -> Option<&'a str> {
    raw.lines().skip_while(|line| is_start_line(line)).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(value.trim())
        } else {
            None
        }
    })
}

/// The `SERVER` header, which usually names the device's OS and UPnP stack
pub fn server(raw: &str) -> Option<&str> {
    header(raw, "SERVER")
}

/// The search target the device answered for
pub fn search_target(raw: &str) -> Option<&str> {
    header(raw, "ST").or_else(|| header(raw, "NT"))
}

/// URL of the device description document
pub fn location(raw: &str) -> Option<&str> {
    header(raw, "LOCATION")
}

fn is_start_line(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("HTTP/") || line.starts_with("NOTIFY") || line.starts_with("M-SEARCH")
}
