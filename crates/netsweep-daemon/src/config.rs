//! Configuration loading

use anyhow::Result;
use netsweep_core::SubnetPrefix;
use netsweep_discovery::{ScannerConfig, DEFAULT_PORTS};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub mdns: MdnsConfig,
    #[serde(default)]
    pub ssdp: SsdpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for web server
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Start a scan as soon as the server is up
    #[serde(default)]
    pub scan_on_start: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            scan_on_start: false,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Interface to scan from (first usable interface if unset)
    #[serde(default)]
    pub interface: Option<String>,
    /// Fixed /24 prefix such as "192.168.1" (overrides the interface)
    #[serde(default)]
    pub prefix: Option<SubnetPrefix>,
    /// TCP ports probed on every host
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    /// Hosts probed at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Connect timeout per port
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Completed hosts per progress update
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Reverse-resolve alive hosts
    #[serde(default = "default_true")]
    pub resolve_hostnames: bool,
    #[serde(default = "default_hostname_timeout")]
    pub hostname_timeout_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interface: None,
            prefix: None,
            ports: default_ports(),
            concurrency: default_concurrency(),
            probe_timeout_ms: default_probe_timeout(),
            batch_size: default_batch_size(),
            resolve_hostnames: true,
            hostname_timeout_ms: default_hostname_timeout(),
        }
    }
}

fn default_ports() -> Vec<u16> {
    DEFAULT_PORTS.to_vec()
}

fn default_concurrency() -> usize {
    16
}

fn default_probe_timeout() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    40
}

fn default_hostname_timeout() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdnsConfig {
    /// Browse mDNS services during scans
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MdnsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsdpConfig {
    /// Send an SSDP search during scans
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Search destination
    #[serde(default = "default_ssdp_target")]
    pub target: SocketAddr,
    /// Seconds to collect replies
    #[serde(default = "default_ssdp_window")]
    pub window_secs: f64,
    #[serde(default = "default_ssdp_mx")]
    pub mx: u8,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target: default_ssdp_target(),
            window_secs: default_ssdp_window(),
            mx: default_ssdp_mx(),
        }
    }
}

fn default_ssdp_target() -> SocketAddr {
    SocketAddr::from(([239, 255, 255, 250], 1900))
}

fn default_ssdp_window() -> f64 {
    5.0
}

fn default_ssdp_mx() -> u8 {
    2
}

impl Config {
    /// Convert to ScannerConfig
    pub fn to_scanner_config(&self) -> ScannerConfig {
        ScannerConfig {
            interface: self.scan.interface.clone(),
            subnet_prefix: self.scan.prefix,
            ports: self.scan.ports.clone(),
            concurrency: self.scan.concurrency,
            probe_timeout_ms: self.scan.probe_timeout_ms,
            batch_size: self.scan.batch_size,
            resolve_hostnames: self.scan.resolve_hostnames,
            hostname_timeout_ms: self.scan.hostname_timeout_ms,
            mdns_enabled: self.mdns.enabled,
            ssdp_enabled: self.ssdp.enabled,
            ssdp_target: self.ssdp.target,
            ssdp_window_secs: self.ssdp.window_secs,
            ssdp_mx: self.ssdp.mx,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.to_scanner_config().validate()?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("netsweep.toml")).unwrap();

        assert_eq!(config.daemon.bind, "0.0.0.0:8080");
        assert!(config.scan.prefix.is_none());
        assert_eq!(config.scan.ports.len(), 19);
        assert!(config.mdns.enabled);
        assert_eq!(config.ssdp.target.to_string(), "239.255.255.250:1900");
    }

    #[test]
    fn test_toml_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[daemon]
bind = "127.0.0.1:9000"

[scan]
prefix = "10.0.0"
ports = [22, 80]
concurrency = 8

[mdns]
enabled = false

[ssdp]
window_secs = 2.5
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.daemon.bind, "127.0.0.1:9000");
        assert_eq!(config.scan.prefix, Some(SubnetPrefix::new(10, 0, 0)));
        assert_eq!(config.scan.batch_size, 40);

        let scanner = config.to_scanner_config();
        assert_eq!(scanner.ports, vec![22, 80]);
        assert_eq!(scanner.concurrency, 8);
        assert!(!scanner.mdns_enabled);
        assert!(scanner.ssdp_enabled);
        assert_eq!(scanner.ssdp_window_secs, 2.5);
        assert_eq!(scanner.subnet_prefix, Some(SubnetPrefix::new(10, 0, 0)));
    }

    #[test]
    fn test_unbounded_ssdp_window_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[ssdp]\nwindow_secs = inf").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("SSDP window"));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[ssdp]\nwindow_secs = 1e300").unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_invalid_prefix_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[scan]\nprefix = \"10.0.300\"").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
