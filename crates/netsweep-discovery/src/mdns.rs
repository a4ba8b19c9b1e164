//! mDNS / DNS-SD service discovery
//!
//! Browsing is two-phase: the DNS-SD meta query enumerates the service types
//! advertised on the segment, and every newly seen type gets its own instance
//! browse. Each resolved instance becomes one [`ServiceFragment`] per IPv4
//! address.
//!
//! The mDNS machinery sits behind [`ServiceBrowser`] so the listener can be
//! driven by a fake in tests. [`MdnsBrowser`] is the real implementation on
//! top of `mdns-sd`.

use mdns_sd::{ServiceDaemon, ServiceEvent};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// DNS-SD meta query listing every advertised service type
pub const META_QUERY: &str = "_services._dns-sd._udp.local.";

#[derive(Error, Debug)]
pub enum BrowseError {
    #[error("mDNS daemon error: {0}")]
    Daemon(#[from] mdns_sd::Error),
}

/// A resolved service instance as reported by the browser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    /// Full instance name (e.g. `Office Printer._ipp._tcp.local.`)
    pub fullname: String,
    /// Service type (e.g. `_ipp._tcp.local.`)
    pub service_type: String,
    /// Target host (e.g. `printer.local.`)
    pub hostname: String,
    pub addresses: Vec<Ipv4Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowseEvent {
    /// A service type answered the meta query
    TypeFound(String),
    /// A service instance was resolved
    Resolved(ResolvedService),
}

/// Browsing capability the listener is built on
pub trait ServiceBrowser: Send + Sync {
    /// Start browsing `service_type`, delivering results to `sink`
    fn browse(
        &self,
        service_type: &str,
        sink: mpsc::UnboundedSender<BrowseEvent>,
    ) -> Result<(), BrowseError>;

    fn stop_browse(&self, service_type: &str);

    /// Release all browser resources
    fn shutdown(&self);
}

/// [`ServiceBrowser`] backed by an `mdns-sd` daemon
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
}

impl MdnsBrowser {
    pub fn new() -> Result<Self, BrowseError> {
        let daemon = ServiceDaemon::new()?;
        debug!("mDNS daemon started");
        Ok(Self { daemon })
    }
}

impl ServiceBrowser for MdnsBrowser {
    fn browse(
        &self,
        service_type: &str,
        sink: mpsc::UnboundedSender<BrowseEvent>,
    ) -> Result<(), BrowseError> {
        let receiver = self.daemon.browse(service_type)?;
        let is_meta = service_type == META_QUERY;
        let service_type = service_type.to_string();

        tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                let forwarded = match event {
                    ServiceEvent::ServiceFound(_, fullname) if is_meta => {
                        BrowseEvent::TypeFound(fullname)
                    }
                    ServiceEvent::ServiceResolved(info) => {
                        let addresses = info
                            .get_addresses()
                            .iter()
                            .filter_map(|addr| match addr {
                                IpAddr::V4(v4) => Some(*v4),
                                IpAddr::V6(_) => None,
                            })
                            .collect();
                        BrowseEvent::Resolved(ResolvedService {
                            fullname: info.get_fullname().to_string(),
                            service_type: info.get_type().to_string(),
                            hostname: info.get_hostname().to_string(),
                            addresses,
                        })
                    }
                    ServiceEvent::SearchStopped(_) => break,
                    other => {
                        trace!(service_type = %service_type, event = ?other, "Ignoring mDNS event");
                        continue;
                    }
                };
                if sink.send(forwarded).is_err() {
                    break;
                }
            }
            trace!(service_type = %service_type, "mDNS browse ended");
        });

        Ok(())
    }

    fn stop_browse(&self, service_type: &str) {
        if let Err(e) = self.daemon.stop_browse(service_type) {
            debug!(service_type = %service_type, error = %e, "Failed to stop browse");
        }
    }

    fn shutdown(&self) {
        if let Err(e) = self.daemon.shutdown() {
            debug!(error = %e, "Failed to shut down mDNS daemon");
        }
    }
}

/// One address of a resolved service instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFragment {
    pub ip: Ipv4Addr,
    /// Instance label (e.g. `Office Printer`)
    pub name: String,
    /// Service type without the domain (e.g. `_ipp._tcp`)
    pub service_type: String,
    /// Target host without the trailing dot (e.g. `printer.local`)
    pub hostname: Option<String>,
}

impl ServiceFragment {
    /// One fragment per IPv4 address; none if the instance has no address
    pub fn from_resolved(service: &ResolvedService) -> Vec<Self> {
        let service_type = strip_local_domain(&service.service_type);
        let name = instance_label(&service.fullname, &service.service_type);
        let hostname = service.hostname.trim_end_matches('.');
        let hostname = (!hostname.is_empty()).then(|| hostname.to_string());

        service
            .addresses
            .iter()
            .map(|&ip| Self {
                ip,
                name: name.clone(),
                service_type: service_type.clone(),
                hostname: hostname.clone(),
            })
            .collect()
    }
}

/// `_ipp._tcp.local.` -> `_ipp._tcp`
fn strip_local_domain(service_type: &str) -> String {
    let trimmed = service_type.trim_end_matches('.');
    trimmed
        .strip_suffix(".local")
        .unwrap_or(trimmed)
        .to_string()
}

/// `Office Printer._ipp._tcp.local.` -> `Office Printer`
fn instance_label(fullname: &str, service_type: &str) -> String {
    let suffix = format!(".{}", service_type.trim_end_matches('.'));
    let fullname = fullname.trim_end_matches('.');
    match fullname.strip_suffix(suffix.as_str()) {
        Some(label) => label.to_string(),
        None => fullname.split('.').next().unwrap_or(fullname).to_string(),
    }
}

/// Long-lived two-phase service browse
///
/// Dropping the listener stops it; [`ServiceListener::stop`] additionally
/// waits until every browse has been torn down.
pub struct ServiceListener {
    fragments: mpsc::UnboundedReceiver<ServiceFragment>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ServiceListener {
    /// Start the meta browse; must be called inside a tokio runtime
    pub fn start(browser: Arc<dyn ServiceBrowser>) -> Result<Self, BrowseError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (fragment_tx, fragment_rx) = mpsc::unbounded_channel();

        browser.browse(META_QUERY, event_tx.clone())?;
        info!("Started mDNS service type browse");

        let stop = CancellationToken::new();
        let task = tokio::spawn(run_listener(
            browser,
            event_tx,
            event_rx,
            fragment_tx,
            stop.clone(),
        ));

        Ok(Self {
            fragments: fragment_rx,
            stop,
            task: Some(task),
        })
    }

    /// Next discovered fragment, or `None` once the listener has stopped
    pub async fn next(&mut self) -> Option<ServiceFragment> {
        self.fragments.recv().await
    }

    /// Stop all browses and shut the browser down
    pub async fn stop(&mut self) {
        self.stop.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "mDNS listener task failed");
            }
        }
    }
}

impl Drop for ServiceListener {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn run_listener(
    browser: Arc<dyn ServiceBrowser>,
    event_tx: mpsc::UnboundedSender<BrowseEvent>,
    mut events: mpsc::UnboundedReceiver<BrowseEvent>,
    fragments: mpsc::UnboundedSender<ServiceFragment>,
    stop: CancellationToken,
) {
    let mut browsed: HashSet<String> = HashSet::new();

    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            BrowseEvent::TypeFound(service_type) => {
                if browsed.contains(&service_type) {
                    continue;
                }
                debug!(service_type = %service_type, "Browsing service type");
                match browser.browse(&service_type, event_tx.clone()) {
                    Ok(()) => {
                        browsed.insert(service_type);
                    }
                    Err(e) => warn!(service_type = %service_type, error = %e, "Failed to browse service type"),
                }
            }
            BrowseEvent::Resolved(service) => {
                let found = ServiceFragment::from_resolved(&service);
                if found.is_empty() {
                    trace!(fullname = %service.fullname, "Resolved service has no IPv4 address");
                }
                for fragment in found {
                    debug!(ip = %fragment.ip, name = %fragment.name, service_type = %fragment.service_type, "Service resolved");
                    let _ = fragments.send(fragment);
                }
            }
        }
    }

    for service_type in &browsed {
        browser.stop_browse(service_type);
    }
    browser.stop_browse(META_QUERY);
    browser.shutdown();
    info!(types = browsed.len(), "Stopped mDNS service browse");
}
