//! Reverse DNS lookups

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::{debug, trace};

/// Default bound on a single reverse lookup
pub const DEFAULT_HOSTNAME_TIMEOUT: Duration = Duration::from_secs(2);

/// Something that can map an address back to a name
pub trait HostnameResolver: Send + Sync + 'static {
    /// Name for `ip`, or `None` if there is no usable one
    fn resolve(&self, ip: Ipv4Addr) -> impl Future<Output = Option<String>> + Send;
}

/// System resolver PTR lookup, run on the blocking pool
#[derive(Debug, Clone, Copy)]
pub struct ReverseDns {
    timeout: Duration,
}

impl ReverseDns {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ReverseDns {
    fn default() -> Self {
        Self::new(DEFAULT_HOSTNAME_TIMEOUT)
    }
}

impl HostnameResolver for ReverseDns {
    async fn resolve(&self, ip: Ipv4Addr) -> Option<String> {
        let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&IpAddr::V4(ip)));

        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(Ok(name))) => usable_hostname(ip, name),
            Ok(Ok(Err(e))) => {
                trace!(ip = %ip, error = %e, "No PTR record");
                None
            }
            Ok(Err(e)) => {
                debug!(ip = %ip, error = %e, "Reverse lookup task failed");
                None
            }
            Err(_) => {
                debug!(ip = %ip, "Reverse lookup timed out");
                None
            }
        }
    }
}

/// Drop empty names and resolvers that echo the numeric address back
fn usable_hostname(ip: Ipv4Addr, name: String) -> Option<String> {
    let name = name.trim_end_matches('.');
    if name.is_empty() || name == ip.to_string() {
        None
    } else {
        Some(name.to_string())
    }
}
