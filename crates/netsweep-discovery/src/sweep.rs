//! Host sweep over a /24
//!
//! Probes every host suffix 1..=254 with a bounded number of host pipelines
//! in flight. Alive hosts are reported in batches so consumers see steady
//! progress, and reverse lookups run in the background without holding up
//! the sweep. Lookups that finish after their host was already reported are
//! sent as separate [`SweepEvent::Hostname`] follow-ups.

use netsweep_core::{DeviceRecord, SubnetPrefix, TOTAL_HOSTS};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

use crate::hostname::HostnameResolver;
use crate::probe::{probe_host, HostProbe, PortProber, DEFAULT_PORTS};

/// Sweep tuning
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Ports probed on every host
    pub ports: Vec<u16>,
    /// Maximum host pipelines in flight
    pub concurrency: usize,
    /// Connect timeout per port
    pub probe_timeout: Duration,
    /// Completed hosts per progress batch
    pub batch_size: usize,
    /// Start a reverse lookup for every alive host
    pub resolve_hostnames: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            ports: DEFAULT_PORTS.to_vec(),
            concurrency: 16,
            probe_timeout: Duration::from_secs(1),
            batch_size: 40,
            resolve_hostnames: true,
        }
    }
}

/// How a sweep ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed,
    Cancelled,
}

/// Progress reported by a running sweep
#[derive(Debug, Clone, PartialEq)]
pub enum SweepEvent {
    /// Hosts completed so far and the alive hosts finished since the last batch
    Batch {
        completed: usize,
        total: usize,
        devices: Vec<DeviceRecord>,
    },
    /// A hostname for a host that was already reported
    Hostname { ip: Ipv4Addr, hostname: String },
    /// Always the last event
    Finished(SweepOutcome),
}

/// A running sweep
///
/// Dropping it cancels the sweep.
pub struct Sweep {
    events: mpsc::Receiver<SweepEvent>,
    _cancel_on_drop: DropGuard,
}

impl Sweep {
    /// Next event, or `None` once [`SweepEvent::Finished`] has been delivered
    pub async fn next(&mut self) -> Option<SweepEvent> {
        self.events.recv().await
    }
}

/// Start sweeping `prefix`; must be called inside a tokio runtime
pub fn sweep<P, R>(
    prefix: SubnetPrefix,
    config: SweepConfig,
    prober: Arc<P>,
    resolver: Arc<R>,
    cancel: CancellationToken,
) -> Sweep
where
    P: PortProber,
    R: HostnameResolver,
{
    let (tx, rx) = mpsc::channel(64);
    let token = cancel.child_token();

    let driver = SweepDriver {
        prefix,
        config,
        prober,
        resolver,
        cancel: token.clone(),
        events: tx,
    };
    tokio::spawn(driver.run());

    Sweep {
        events: rx,
        _cancel_on_drop: token.drop_guard(),
    }
}

struct SweepDriver<P, R> {
    prefix: SubnetPrefix,
    config: SweepConfig,
    prober: Arc<P>,
    resolver: Arc<R>,
    cancel: CancellationToken,
    events: mpsc::Sender<SweepEvent>,
}

/// Alive hosts between batches, plus the ones already sent
#[derive(Default)]
struct BatchState {
    pending: Vec<DeviceRecord>,
    flushed: HashSet<Ipv4Addr>,
    completed: usize,
    last_reported: usize,
}

impl<P: PortProber, R: HostnameResolver> SweepDriver<P, R> {
    async fn run(self) {
        let concurrency = self.config.concurrency.max(1);
        let batch_size = self.config.batch_size.max(1);
        let ports: Arc<[u16]> = self.config.ports.clone().into();

        info!(
            prefix = %self.prefix,
            ports = ports.len(),
            concurrency,
            "Starting sweep"
        );

        let prefix = self.prefix;
        let mut hosts = prefix.hosts();
        let mut exhausted = false;
        let mut cancelled = false;
        let mut probes: JoinSet<HostProbe> = JoinSet::new();
        let mut lookups: JoinSet<(Ipv4Addr, Option<String>)> = JoinSet::new();
        let mut state = BatchState::default();

        loop {
            while !cancelled && !exhausted && probes.len() < concurrency {
                match hosts.next() {
                    Some(ip) => {
                        let prober = Arc::clone(&self.prober);
                        let ports = Arc::clone(&ports);
                        let timeout = self.config.probe_timeout;
                        probes.spawn(async move { probe_host(&prober, ip, &ports, timeout).await });
                    }
                    None => exhausted = true,
                }
            }

            if probes.is_empty() && (exhausted || cancelled) {
                break;
            }

            tokio::select! {
                biased;

                _ = self.cancel.cancelled(), if !cancelled => {
                    debug!(prefix = %self.prefix, in_flight = probes.len(), "Sweep cancelled, draining probes");
                    cancelled = true;
                    lookups.abort_all();
                }
                Some(result) = probes.join_next() => {
                    state.completed += 1;
                    match result {
                        Ok(probe) if probe.is_alive() => {
                            debug!(ip = %probe.ip, ports = ?probe.open_ports, "Host alive");
                            if self.config.resolve_hostnames && !cancelled {
                                let resolver = Arc::clone(&self.resolver);
                                let ip = probe.ip;
                                lookups.spawn(async move { (ip, resolver.resolve(ip).await) });
                            }
                            state.pending.push(DeviceRecord::reachable(
                                probe.ip,
                                probe.open_ports,
                                probe.elapsed_ms,
                            ));
                        }
                        Ok(_) => {}
                        Err(e) => debug!(error = %e, "Host pipeline failed"),
                    }

                    if !cancelled
                        && (state.completed - state.last_reported >= batch_size
                            || state.completed == TOTAL_HOSTS)
                        && !self.flush(&mut state).await
                    {
                        cancelled = true;
                        lookups.abort_all();
                    }
                }
                Some(result) = lookups.join_next(), if !lookups.is_empty() => {
                    if let Ok((ip, Some(hostname))) = result {
                        if !self.attach_hostname(&mut state, ip, hostname).await {
                            cancelled = true;
                            lookups.abort_all();
                        }
                    }
                }
            }
        }

        // Hosts are done; wait for outstanding lookups, each bounded by its own timeout
        while !cancelled && !lookups.is_empty() {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    cancelled = true;
                    lookups.abort_all();
                }
                Some(result) = lookups.join_next() => {
                    if let Ok((ip, Some(hostname))) = result {
                        if !self.attach_hostname(&mut state, ip, hostname).await {
                            cancelled = true;
                        }
                    }
                }
            }
        }

        let outcome = if cancelled {
            SweepOutcome::Cancelled
        } else {
            SweepOutcome::Completed
        };
        info!(
            prefix = %self.prefix,
            completed = state.completed,
            alive = state.flushed.len(),
            outcome = ?outcome,
            "Sweep finished"
        );
        let _ = self.events.send(SweepEvent::Finished(outcome)).await;
    }

    /// Send the pending batch; `false` if the consumer is gone
    async fn flush(&self, state: &mut BatchState) -> bool {
        let devices = std::mem::take(&mut state.pending);
        state.flushed.extend(devices.iter().map(|d| d.ip));
        state.last_reported = state.completed;

        let event = SweepEvent::Batch {
            completed: state.completed,
            total: TOTAL_HOSTS,
            devices,
        };
        self.events.send(event).await.is_ok()
    }

    /// Attach a hostname to a pending record or send a follow-up for a flushed one
    async fn attach_hostname(&self, state: &mut BatchState, ip: Ipv4Addr, hostname: String) -> bool {
        if let Some(record) = state.pending.iter_mut().find(|d| d.ip == ip) {
            record.hostname = Some(hostname);
            return true;
        }
        if state.flushed.contains(&ip) {
            return self
                .events
                .send(SweepEvent::Hostname { ip, hostname })
                .await
                .is_ok();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::SocketAddrV4;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Opens a fixed set of (suffix, port) pairs and counts probes per host
    #[derive(Default)]
    struct FakeProber {
        open: Vec<(u8, u16)>,
        delay: Option<Duration>,
        calls: Mutex<HashMap<(Ipv4Addr, u16), usize>>,
        total: AtomicUsize,
    }

    impl FakeProber {
        fn open(open: &[(u8, u16)]) -> Self {
            Self {
                open: open.to_vec(),
                ..Default::default()
            }
        }
    }

    impl PortProber for FakeProber {
        async fn probe(&self, addr: SocketAddrV4, _timeout: Duration) -> bool {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            *self.calls.lock().unwrap().entry((*addr.ip(), addr.port())).or_default() += 1;
            self.total.fetch_add(1, Ordering::SeqCst);
            let suffix = addr.ip().octets()[3];
            self.open.contains(&(suffix, addr.port()))
        }
    }

    struct FixedResolver {
        names: HashMap<Ipv4Addr, String>,
        delay: Duration,
    }

    impl HostnameResolver for FixedResolver {
        async fn resolve(&self, ip: Ipv4Addr) -> Option<String> {
            tokio::time::sleep(self.delay).await;
            self.names.get(&ip).cloned()
        }
    }

    fn no_names() -> Arc<FixedResolver> {
        Arc::new(FixedResolver {
            names: HashMap::new(),
            delay: Duration::ZERO,
        })
    }

    fn config(ports: &[u16]) -> SweepConfig {
        SweepConfig {
            ports: ports.to_vec(),
            probe_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    async fn collect(mut sweep: Sweep) -> Vec<SweepEvent> {
        let mut events = Vec::new();
        while let Some(event) = sweep.next().await {
            events.push(event);
        }
        events
    }

    fn devices(events: &[SweepEvent]) -> Vec<DeviceRecord> {
        events
            .iter()
            .flat_map(|e| match e {
                SweepEvent::Batch { devices, .. } => devices.clone(),
                _ => Vec::new(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_single_open_port() {
        let prefix: SubnetPrefix = "192.168.1".parse().unwrap();
        let prober = Arc::new(FakeProber::open(&[(10, 80)]));
        let events = collect(sweep(prefix, config(&[80, 22]), prober, no_names(), CancellationToken::new())).await;

        let found = devices(&events);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].ip, Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(found[0].open_ports.iter().copied().collect::<Vec<_>>(), vec![80]);
        assert!(found[0].response_time_ms.unwrap() > 0.0);
        assert_eq!(events.last(), Some(&SweepEvent::Finished(SweepOutcome::Completed)));
    }

    #[tokio::test]
    async fn test_every_host_visited_once() {
        let prefix = SubnetPrefix::new(10, 0, 0);
        let prober = Arc::new(FakeProber::open(&[]));
        let events = collect(sweep(prefix, config(&[80, 22]), Arc::clone(&prober), no_names(), CancellationToken::new())).await;

        let calls = prober.calls.lock().unwrap();
        assert_eq!(calls.len(), TOTAL_HOSTS * 2);
        assert!(calls.values().all(|&n| n == 1));
        for suffix in 1..=254u8 {
            assert!(calls.contains_key(&(prefix.host(suffix), 80)));
        }
        assert!(!calls.contains_key(&(prefix.host(0), 80)));
        assert!(!calls.contains_key(&(prefix.host(255), 80)));

        let last_batch = events.iter().rev().find_map(|e| match e {
            SweepEvent::Batch { completed, .. } => Some(*completed),
            _ => None,
        });
        assert_eq!(last_batch, Some(TOTAL_HOSTS));
    }

    #[tokio::test]
    async fn test_batch_boundaries() {
        let prefix = SubnetPrefix::new(10, 0, 0);
        let prober = Arc::new(FakeProber::open(&[(1, 80), (77, 80), (254, 80)]));
        let events = collect(sweep(prefix, config(&[80]), prober, no_names(), CancellationToken::new())).await;

        let completed: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                SweepEvent::Batch { completed, total, .. } => {
                    assert_eq!(*total, TOTAL_HOSTS);
                    Some(*completed)
                }
                _ => None,
            })
            .collect();
        assert_eq!(completed, vec![40, 80, 120, 160, 200, 240, 254]);
        assert_eq!(devices(&events).len(), 3);
    }

    #[tokio::test]
    async fn test_hostname_follow_up() {
        let prefix = SubnetPrefix::new(10, 0, 0);
        let ip = prefix.host(5);
        let prober = Arc::new(FakeProber::open(&[(5, 631)]));
        let resolver = Arc::new(FixedResolver {
            names: HashMap::from([(ip, "printer.local".to_string())]),
            delay: Duration::from_millis(100),
        });
        let config = SweepConfig {
            batch_size: 1,
            ..config(&[631])
        };

        let events = collect(sweep(prefix, config, prober, resolver, CancellationToken::new())).await;

        let flushed = devices(&events);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].hostname, None);

        let finished = events.iter().position(|e| matches!(e, SweepEvent::Finished(_)));
        let follow_up = events.iter().position(|e| {
            matches!(e, SweepEvent::Hostname { ip: i, hostname } if *i == ip && hostname == "printer.local")
        });
        assert!(follow_up.is_some());
        assert!(follow_up < finished);
    }

    #[tokio::test]
    async fn test_hostname_attached_or_followed_up() {
        let prefix = SubnetPrefix::new(10, 0, 0);
        let ip = prefix.host(200);
        let prober = Arc::new(FakeProber::open(&[(200, 22)]));
        let resolver = Arc::new(FixedResolver {
            names: HashMap::from([(ip, "nas.lan".to_string())]),
            delay: Duration::ZERO,
        });

        let events = collect(sweep(prefix, config(&[22]), prober, resolver, CancellationToken::new())).await;

        let attached = devices(&events).iter().any(|d| d.hostname.as_deref() == Some("nas.lan"));
        let followed = events
            .iter()
            .any(|e| matches!(e, SweepEvent::Hostname { hostname, .. } if hostname == "nas.lan"));
        assert!(attached ^ followed);
    }

    #[tokio::test]
    async fn test_cancel_mid_sweep() {
        let prefix = SubnetPrefix::new(10, 0, 0);
        let prober = Arc::new(FakeProber {
            open: (1..=254).map(|s| (s, 80)).collect(),
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        let config = SweepConfig {
            concurrency: 4,
            ..config(&[80])
        };
        let mut sweep = sweep(prefix, config, Arc::clone(&prober), no_names(), cancel.clone());

        match sweep.next().await {
            Some(SweepEvent::Batch { completed, .. }) => assert_eq!(completed, 40),
            other => panic!("expected first batch, got {other:?}"),
        }
        cancel.cancel();

        let mut rest = Vec::new();
        while let Some(event) = sweep.next().await {
            rest.push(event);
        }
        assert_eq!(rest, vec![SweepEvent::Finished(SweepOutcome::Cancelled)]);
        assert!(prober.total.load(Ordering::SeqCst) < TOTAL_HOSTS);
    }

    #[tokio::test]
    async fn test_dropped_consumer_stops_sweep() {
        let prefix = SubnetPrefix::new(10, 0, 0);
        let prober = Arc::new(FakeProber {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let parent = CancellationToken::new();
        let config = SweepConfig {
            concurrency: 2,
            ..config(&[80])
        };
        let sweep = sweep(prefix, config, Arc::clone(&prober), no_names(), parent.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(sweep);
        tokio::time::sleep(Duration::from_millis(100)).await;
        let after_drop = prober.total.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(prober.total.load(Ordering::SeqCst), after_drop);
        assert!(after_drop < TOTAL_HOSTS);
        assert!(!parent.is_cancelled());
    }
}
