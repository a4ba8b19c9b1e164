//! netsweep Discovery - Local network device discovery
//!
//! This crate provides the discovery channels and the scanner that drives them:
//! - TCP connect sweep over the local /24 with reverse DNS
//! - Two-phase mDNS / DNS-SD browsing
//! - SSDP M-SEARCH
//! - A scanner that merges all three into one published device list

pub mod hostname;
pub mod interface;
pub mod mdns;
pub mod probe;
pub mod scanner;
pub mod ssdp;
pub mod sweep;

pub use hostname::{HostnameResolver, ReverseDns};
pub use interface::{resolve_local_subnet, InterfaceError, LocalSubnet};
pub use mdns::{BrowseError, MdnsBrowser, ServiceBrowser, ServiceFragment, ServiceListener};
pub use probe::{PortProber, TcpProber, DEFAULT_PORTS};
pub use scanner::{
    BrowserFactory, ConfigError, DiscoveryChannel, DiscoveryEvent, DiscoveryScanner, ScanError,
    ScannerConfig, MAX_SSDP_WINDOW_SECS,
};
pub use ssdp::{SsdpConfig, SsdpFragment, SsdpSearch};
pub use sweep::{sweep, Sweep, SweepConfig, SweepEvent, SweepOutcome};
