//! Discovery scanner that combines the sweep, mDNS and SSDP
//!
//! Each scan runs three producers. The sweep reports reachable hosts, the
//! service listener reports advertised services and the SSDP search reports
//! UPnP replies. Every producer writes only its own map in [`SourceMaps`] and
//! every write republishes the merged device list. Writes carry the
//! generation they were started with and are dropped once a newer scan or a
//! cancel has bumped the generation.

use netsweep_core::{
    merge_devices, DeviceRecord, ScanSession, ScanSnapshot, ScanStatus, ServiceRecord,
    SubnetPrefix,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::hostname::{HostnameResolver, ReverseDns};
use crate::interface::{resolve_local_subnet, InterfaceError, LocalSubnet};
use crate::mdns::{BrowseError, MdnsBrowser, ServiceBrowser, ServiceListener};
use crate::probe::{PortProber, TcpProber, DEFAULT_PORTS};
use crate::ssdp::{SsdpConfig, SsdpSearch};
use crate::sweep::{sweep, SweepConfig, SweepEvent, SweepOutcome};

/// Creates a fresh service browser for each scan
pub type BrowserFactory =
    Arc<dyn Fn() -> Result<Arc<dyn ServiceBrowser>, BrowseError> + Send + Sync>;

/// Longest SSDP response window a scan will wait out
pub const MAX_SSDP_WINDOW_SECS: f64 = 300.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("SSDP window must be between 0 and {max} seconds, got {0}", max = MAX_SSDP_WINDOW_SECS)]
    SsdpWindow(f64),
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("No local subnet to scan: {0}")]
    NoSubnet(#[from] InterfaceError),
    #[error("Invalid scanner configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Interface whose address defines the subnet (first usable if unset)
    pub interface: Option<String>,
    /// Fixed subnet prefix; overrides interface lookup
    pub subnet_prefix: Option<SubnetPrefix>,
    /// TCP ports probed on every host
    pub ports: Vec<u16>,
    /// Maximum hosts probed at once
    pub concurrency: usize,
    /// Connect timeout per port in milliseconds
    pub probe_timeout_ms: u64,
    /// Completed hosts per progress update
    pub batch_size: usize,
    /// Reverse-resolve alive hosts
    pub resolve_hostnames: bool,
    /// Reverse lookup timeout in milliseconds
    pub hostname_timeout_ms: u64,
    /// Browse mDNS services during scans
    pub mdns_enabled: bool,
    /// Send an SSDP search during scans
    pub ssdp_enabled: bool,
    /// Where the SSDP search is sent
    pub ssdp_target: SocketAddr,
    /// How long SSDP replies are collected in seconds
    pub ssdp_window_secs: f64,
    /// SSDP MX header
    pub ssdp_mx: u8,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        let sweep = SweepConfig::default();
        let ssdp = SsdpConfig::default();
        Self {
            interface: None,
            subnet_prefix: None,
            ports: DEFAULT_PORTS.to_vec(),
            concurrency: sweep.concurrency,
            probe_timeout_ms: sweep.probe_timeout.as_millis() as u64,
            batch_size: sweep.batch_size,
            resolve_hostnames: sweep.resolve_hostnames,
            hostname_timeout_ms: 2000,
            mdns_enabled: true,
            ssdp_enabled: true,
            ssdp_target: ssdp.target,
            ssdp_window_secs: ssdp.window.as_secs_f64(),
            ssdp_mx: ssdp.mx,
        }
    }
}

impl ScannerConfig {
    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            ports: self.ports.clone(),
            concurrency: self.concurrency,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            batch_size: self.batch_size,
            resolve_hostnames: self.resolve_hostnames,
        }
    }

    pub fn ssdp_config(&self) -> Result<SsdpConfig, ConfigError> {
        let secs = self.ssdp_window_secs;
        if !(0.0..=MAX_SSDP_WINDOW_SECS).contains(&secs) {
            return Err(ConfigError::SsdpWindow(secs));
        }
        let window = Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::SsdpWindow(secs))?;

        Ok(SsdpConfig {
            target: self.ssdp_target,
            window,
            mx: self.ssdp_mx,
            ..Default::default()
        })
    }

    /// Check values that would otherwise only fail once a scan is running
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ssdp_config().map(|_| ())
    }
}

/// Discovery channel that can fail independently of the sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryChannel {
    Mdns,
    Ssdp,
}

impl fmt::Display for DiscoveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mdns => write!(f, "mdns"),
            Self::Ssdp => write!(f, "ssdp"),
        }
    }
}

/// Discovery event for real-time updates
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A new scan replaced whatever was published before
    ScanStarted(ScanSession),
    /// Sweep progress
    Progress { completed: usize, total: usize },
    /// The merged device list changed
    DevicesUpdated(Vec<DeviceRecord>),
    /// A passive channel could not be used for this scan
    ChannelFailed {
        channel: DiscoveryChannel,
        error: String,
    },
    /// Scan completed
    ScanCompleted {
        generation: u64,
        devices: usize,
        duration_secs: f64,
    },
    /// Scan cancelled and published state reset
    ScanCancelled { generation: u64 },
}

/// Per-scan observations, one map per producer
#[derive(Debug, Clone, Default)]
pub struct SourceMaps {
    pub ports: HashMap<Ipv4Addr, DeviceRecord>,
    pub services: HashMap<Ipv4Addr, ServiceRecord>,
    pub ssdp: HashMap<Ipv4Addr, String>,
}

impl SourceMaps {
    pub fn merge(&self) -> Vec<DeviceRecord> {
        merge_devices(&self.ports, &self.services, &self.ssdp)
    }
}

#[derive(Default)]
struct ScanState {
    generation: u64,
    snapshot: ScanSnapshot,
    sources: SourceMaps,
    cancel: Option<CancellationToken>,
}

/// Generation-checked access to the published state
#[derive(Clone)]
struct Publisher {
    state: Arc<RwLock<ScanState>>,
    event_tx: broadcast::Sender<DiscoveryEvent>,
}

impl Publisher {
    /// Apply a producer update and republish; `false` if the scan is stale
    async fn apply<F>(&self, generation: u64, update: F) -> bool
    where
        F: FnOnce(&mut SourceMaps, &mut ScanSnapshot),
    {
        let mut state = self.state.write().await;
        if state.generation != generation {
            trace!(generation, current = state.generation, "Dropping stale update");
            return false;
        }

        let ScanState {
            sources, snapshot, ..
        } = &mut *state;
        update(sources, snapshot);
        snapshot.devices = sources.merge();
        let _ = self
            .event_tx
            .send(DiscoveryEvent::DevicesUpdated(snapshot.devices.clone()));
        true
    }

    async fn complete(&self, generation: u64) {
        let mut state = self.state.write().await;
        if state.generation != generation {
            return;
        }

        let ScanState {
            sources,
            snapshot,
            cancel,
            ..
        } = &mut *state;
        *cancel = None;
        snapshot.devices = sources.merge();
        snapshot.status = ScanStatus::Completed;
        snapshot.progress = 1.0;
        snapshot.duration_secs = snapshot
            .session
            .as_ref()
            .map(ScanSession::elapsed_secs)
            .unwrap_or_default();

        info!(
            generation,
            devices = snapshot.devices.len(),
            duration_secs = snapshot.duration_secs,
            "Scan complete"
        );
        let _ = self.event_tx.send(DiscoveryEvent::ScanCompleted {
            generation,
            devices: snapshot.devices.len(),
            duration_secs: snapshot.duration_secs,
        });
    }

    fn channel_failed(&self, channel: DiscoveryChannel, error: impl fmt::Display) {
        warn!(channel = %channel, error = %error, "Discovery channel unavailable");
        let _ = self.event_tx.send(DiscoveryEvent::ChannelFailed {
            channel,
            error: error.to_string(),
        });
    }
}

/// Discovery scanner service
pub struct DiscoveryScanner<P = TcpProber, R = ReverseDns> {
    config: Arc<RwLock<ScannerConfig>>,
    publisher: Publisher,
    prober: Arc<P>,
    resolver: Arc<R>,
    browsers: BrowserFactory,
}

impl DiscoveryScanner {
    /// Create a scanner that uses real sockets and the system resolver
    pub fn new(config: ScannerConfig) -> Self {
        let resolver = ReverseDns::new(Duration::from_millis(config.hostname_timeout_ms));
        let browsers: BrowserFactory = Arc::new(|| -> Result<Arc<dyn ServiceBrowser>, BrowseError> {
            let browser: Arc<dyn ServiceBrowser> = Arc::new(MdnsBrowser::new()?);
            Ok(browser)
        });
        Self::with_backends(config, TcpProber, resolver, browsers)
    }
}

impl<P: PortProber, R: HostnameResolver> DiscoveryScanner<P, R> {
    /// Create a scanner with explicit probing, lookup and browsing backends
    pub fn with_backends(
        config: ScannerConfig,
        prober: P,
        resolver: R,
        browsers: BrowserFactory,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config: Arc::new(RwLock::new(config)),
            publisher: Publisher {
                state: Arc::new(RwLock::new(ScanState::default())),
                event_tx,
            },
            prober: Arc::new(prober),
            resolver: Arc::new(resolver),
            browsers,
        }
    }

    /// Pin scans to a subnet prefix, or go back to interface lookup with `None`
    pub async fn update_subnet_prefix(&self, prefix: Option<SubnetPrefix>) {
        let mut config = self.config.write().await;
        config.subnet_prefix = prefix;
        match prefix {
            Some(prefix) => info!(prefix = %prefix, "Scan subnet updated"),
            None => info!("Scan subnet follows local interface"),
        }
    }

    /// Get current config
    pub async fn get_config(&self) -> ScannerConfig {
        self.config.read().await.clone()
    }

    /// Subscribe to discovery events
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.publisher.event_tx.subscribe()
    }

    /// Current published state
    pub async fn snapshot(&self) -> ScanSnapshot {
        self.publisher.state.read().await.snapshot.clone()
    }

    /// Current merged device list
    pub async fn devices(&self) -> Vec<DeviceRecord> {
        self.publisher.state.read().await.snapshot.devices.clone()
    }

    /// Get a specific device
    pub async fn get_device(&self, ip: Ipv4Addr) -> Option<DeviceRecord> {
        self.publisher
            .state
            .read()
            .await
            .snapshot
            .devices
            .iter()
            .find(|d| d.ip == ip)
            .cloned()
    }

    /// Look up the local interface scans would use
    pub async fn local_subnet(&self) -> Result<LocalSubnet, InterfaceError> {
        let interface = self.config.read().await.interface.clone();
        resolve_local_subnet(interface.as_deref())
    }

    async fn scan_prefix(&self, config: &ScannerConfig) -> Result<SubnetPrefix, ScanError> {
        if let Some(prefix) = config.subnet_prefix {
            return Ok(prefix);
        }
        let subnet = resolve_local_subnet(config.interface.as_deref())?;
        info!(
            interface = %subnet.interface,
            ip = %subnet.ip,
            prefix_len = ?subnet.prefix_len(),
            "Resolved local subnet"
        );
        Ok(subnet.prefix())
    }

    /// Start a scan, superseding any scan in progress
    ///
    /// `prefix` overrides the configured subnet for this scan only.
    pub async fn start_scan(&self, prefix: Option<SubnetPrefix>) -> Result<ScanSession, ScanError> {
        let config = self.config.read().await.clone();
        let ssdp = if config.ssdp_enabled {
            Some(config.ssdp_config()?)
        } else {
            None
        };
        let prefix = match prefix {
            Some(prefix) => prefix,
            None => self.scan_prefix(&config).await?,
        };

        let token = CancellationToken::new();
        let session = {
            let mut state = self.publisher.state.write().await;
            if let Some(previous) = state.cancel.take() {
                debug!(generation = state.generation, "Superseding running scan");
                previous.cancel();
            }
            state.generation += 1;
            let session = ScanSession::new(state.generation, prefix);
            state.sources = SourceMaps::default();
            state.snapshot = ScanSnapshot {
                status: ScanStatus::Running,
                session: Some(session.clone()),
                ..Default::default()
            };
            state.cancel = Some(token.clone());
            let _ = self
                .publisher
                .event_tx
                .send(DiscoveryEvent::ScanStarted(session.clone()));
            session
        };

        info!(
            prefix = %prefix,
            generation = session.generation,
            session = %session.id,
            "Starting scan"
        );

        let run = ScanRun {
            generation: session.generation,
            prefix,
            config,
            ssdp,
            cancel: token,
            publisher: self.publisher.clone(),
            prober: Arc::clone(&self.prober),
            resolver: Arc::clone(&self.resolver),
            browsers: Arc::clone(&self.browsers),
        };
        tokio::spawn(run.run());

        Ok(session)
    }

    /// Cancel the running scan and reset published state
    pub async fn cancel_scan(&self) -> ScanSnapshot {
        let mut state = self.publisher.state.write().await;
        let Some(token) = state.cancel.take() else {
            debug!("No scan to cancel");
            return state.snapshot.clone();
        };
        token.cancel();

        state.generation += 1;
        let generation = state.generation;
        let session = state.snapshot.session.take().map(|mut session| {
            session.cancelled = true;
            session
        });
        state.sources = SourceMaps::default();
        state.snapshot = ScanSnapshot {
            status: ScanStatus::Cancelled,
            session,
            ..Default::default()
        };

        info!(generation, "Scan cancelled");
        let _ = self
            .publisher
            .event_tx
            .send(DiscoveryEvent::ScanCancelled { generation });
        state.snapshot.clone()
    }

    /// Run one scan to the end and return the final snapshot
    pub async fn scan_once(&self, prefix: Option<SubnetPrefix>) -> Result<ScanSnapshot, ScanError> {
        let mut events = self.subscribe();
        let session = self.start_scan(prefix).await?;

        loop {
            match events.recv().await {
                Ok(DiscoveryEvent::ScanCompleted { generation, .. })
                    if generation == session.generation =>
                {
                    break
                }
                Ok(DiscoveryEvent::ScanCancelled { generation })
                    if generation > session.generation =>
                {
                    break
                }
                Ok(DiscoveryEvent::ScanStarted(other)) if other.generation > session.generation => {
                    break
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!(skipped, "Scan event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        Ok(self.snapshot().await)
    }
}

/// Everything one scan's producers need
struct ScanRun<P, R> {
    generation: u64,
    prefix: SubnetPrefix,
    config: ScannerConfig,
    ssdp: Option<SsdpConfig>,
    cancel: CancellationToken,
    publisher: Publisher,
    prober: Arc<P>,
    resolver: Arc<R>,
    browsers: BrowserFactory,
}

impl<P: PortProber, R: HostnameResolver> ScanRun<P, R> {
    async fn run(self) {
        let mdns_stop = self.cancel.child_token();
        let mdns = self
            .config
            .mdns_enabled
            .then(|| tokio::spawn(self.run_mdns(mdns_stop.clone())));
        let ssdp = self
            .ssdp
            .clone()
            .map(|config| tokio::spawn(self.run_ssdp(config)));

        let outcome = self.run_sweep().await;

        mdns_stop.cancel();
        if outcome == SweepOutcome::Cancelled {
            return;
        }

        join_producer(mdns, DiscoveryChannel::Mdns).await;
        // SSDP ends on its own when the response window closes
        join_producer(ssdp, DiscoveryChannel::Ssdp).await;
        self.publisher.complete(self.generation).await;
    }

    async fn run_sweep(&self) -> SweepOutcome {
        let generation = self.generation;
        let mut sweep = sweep(
            self.prefix,
            self.config.sweep_config(),
            Arc::clone(&self.prober),
            Arc::clone(&self.resolver),
            self.cancel.clone(),
        );

        while let Some(event) = sweep.next().await {
            match event {
                SweepEvent::Batch {
                    completed,
                    total,
                    devices,
                } => {
                    let applied = self
                        .publisher
                        .apply(generation, |sources, snapshot| {
                            for device in devices {
                                sources.ports.insert(device.ip, device);
                            }
                            if let Some(session) = snapshot.session.as_mut() {
                                session.completed_hosts = completed;
                            }
                            snapshot.progress = completed as f32 / total as f32;
                        })
                        .await;
                    if applied {
                        let _ = self
                            .publisher
                            .event_tx
                            .send(DiscoveryEvent::Progress { completed, total });
                    }
                }
                SweepEvent::Hostname { ip, hostname } => {
                    self.publisher
                        .apply(generation, |sources, _| {
                            if let Some(record) = sources.ports.get_mut(&ip) {
                                record.hostname = Some(hostname);
                            }
                        })
                        .await;
                }
                SweepEvent::Finished(outcome) => return outcome,
            }
        }

        SweepOutcome::Cancelled
    }

    fn run_mdns(&self, stop: CancellationToken) -> impl std::future::Future<Output = ()> + Send + 'static {
        let generation = self.generation;
        let publisher = self.publisher.clone();
        let browsers = Arc::clone(&self.browsers);

        async move {
            let browser = match browsers() {
                Ok(browser) => browser,
                Err(e) => return publisher.channel_failed(DiscoveryChannel::Mdns, e),
            };
            let mut listener = match ServiceListener::start(browser) {
                Ok(listener) => listener,
                Err(e) => return publisher.channel_failed(DiscoveryChannel::Mdns, e),
            };

            loop {
                let fragment = tokio::select! {
                    _ = stop.cancelled() => break,
                    fragment = listener.next() => match fragment {
                        Some(fragment) => fragment,
                        None => break,
                    },
                };

                let record = ServiceRecord {
                    name: fragment.name,
                    service_type: fragment.service_type,
                    hostname: fragment.hostname,
                };
                let applied = publisher
                    .apply(generation, |sources, _| {
                        sources.services.insert(fragment.ip, record);
                    })
                    .await;
                if !applied {
                    break;
                }
            }

            listener.stop().await;
        }
    }

    fn run_ssdp(&self, config: SsdpConfig) -> impl std::future::Future<Output = ()> + Send + 'static {
        let generation = self.generation;
        let publisher = self.publisher.clone();
        let cancel = self.cancel.clone();

        async move {
            let mut search = match SsdpSearch::start(config, cancel).await {
                Ok(search) => search,
                Err(e) => return publisher.channel_failed(DiscoveryChannel::Ssdp, e),
            };

            while let Some(fragment) = search.next().await {
                let applied = publisher
                    .apply(generation, |sources, _| {
                        sources.ssdp.insert(fragment.ip, fragment.raw);
                    })
                    .await;
                if !applied {
                    break;
                }
            }

            search.close();
        }
    }
}

async fn join_producer(handle: Option<JoinHandle<()>>, channel: DiscoveryChannel) {
    if let Some(handle) = handle {
        if let Err(e) = handle.await {
            warn!(channel = %channel, error = %e, "Discovery task failed");
        }
    }
}
