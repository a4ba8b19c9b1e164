//! TCP port probing for host liveness

use std::collections::BTreeSet;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tracing::{debug, trace};

/// Ports probed when no explicit list is configured
pub const DEFAULT_PORTS: &[u16] = &[
    80, 443, 22, 139, 445, 3389, 9100, 21, 23, 53, 515, 631, 548, 554, 8000, 8080, 8443, 5353,
    1900,
];

/// Something that can tell whether a TCP port accepts connections
pub trait PortProber: Send + Sync + 'static {
    /// `true` if a connection to `addr` completes within `timeout`
    fn probe(&self, addr: SocketAddrV4, timeout: Duration) -> impl Future<Output = bool> + Send;
}

/// Probes ports with a plain TCP connect
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProber;

impl PortProber for TcpProber {
    async fn probe(&self, addr: SocketAddrV4, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => {
                trace!(addr = %addr, "Port open");
                true
            }
            Ok(Err(e)) => {
                trace!(addr = %addr, error = %e, "Connect failed");
                false
            }
            Err(_) => false,
        }
    }
}

/// Result of probing every port on one host
#[derive(Debug, Clone, PartialEq)]
pub struct HostProbe {
    pub ip: Ipv4Addr,
    pub open_ports: BTreeSet<u16>,
    /// Wall time from first dispatch to last result, in milliseconds
    pub elapsed_ms: f64,
}

impl HostProbe {
    pub fn is_alive(&self) -> bool {
        !self.open_ports.is_empty()
    }
}

/// Probe all `ports` on `ip` in parallel
pub async fn probe_host<P: PortProber>(
    prober: &Arc<P>,
    ip: Ipv4Addr,
    ports: &[u16],
    timeout: Duration,
) -> HostProbe {
    let started = Instant::now();
    let mut tasks = JoinSet::new();

    for &port in ports {
        let prober = Arc::clone(prober);
        tasks.spawn(async move {
            let open = prober.probe(SocketAddrV4::new(ip, port), timeout).await;
            (port, open)
        });
    }

    let mut open_ports = BTreeSet::new();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok((port, true)) => {
                open_ports.insert(port);
            }
            Ok((_, false)) => {}
            Err(e) => debug!(ip = %ip, error = %e, "Probe task failed"),
        }
    }

    HostProbe {
        ip,
        open_ports,
        elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
    }
}
