//! netsweep Daemon - Main entry point
//!
//! Serves the scan API and WebSocket events, or runs a single scan from the
//! command line.

mod api;
mod config;
mod server;
mod state;
mod ws;

use anyhow::Result;
use clap::Parser;
use netsweep_core::{ssdp, ScanSnapshot, SubnetPrefix};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::state::DeviceView;

#[derive(Parser, Debug)]
#[command(name = "netsweep")]
#[command(about = "Local network device discovery daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "netsweep.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Run a single scan, print the results and exit
    #[arg(long)]
    scan_once: bool,

    /// Network interface to scan from
    #[arg(short, long)]
    interface: Option<String>,

    /// Scan this /24 prefix (e.g. 192.168.1) instead of the interface's
    #[arg(short, long)]
    prefix: Option<SubnetPrefix>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("netsweep v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    // Command line overrides
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }
    if let Some(interface) = args.interface {
        config.scan.interface = Some(interface);
    }
    if let Some(prefix) = args.prefix {
        config.scan.prefix = Some(prefix);
    }

    info!(
        interface = ?config.scan.interface,
        prefix = ?config.scan.prefix,
        ports = config.scan.ports.len(),
        "Configuration loaded"
    );

    let state = state::AppState::new(config.clone());

    if args.scan_once {
        info!("Running single discovery scan");
        let snapshot = state.scanner.scan_once(None).await?;
        print_snapshot(&snapshot);
    } else {
        server::run(state, &config.daemon.bind).await?;
    }

    Ok(())
}

fn print_snapshot(snapshot: &ScanSnapshot) {
    let prefix = snapshot
        .session
        .as_ref()
        .map(|s| s.subnet_prefix.to_string())
        .unwrap_or_default();
    println!(
        "Discovered {} devices on {}.0/24 in {:.1}s:",
        snapshot.devices.len(),
        prefix,
        snapshot.duration_secs
    );

    for device in snapshot.devices.iter().cloned().map(DeviceView::from) {
        let record = &device.record;
        println!("  - {} ({})", record.ip, device.display_name);
        if !record.open_ports.is_empty() {
            let ports: Vec<String> = record.open_ports.iter().map(u16::to_string).collect();
            println!("    Ports: {}", ports.join(", "));
        }
        if let Some(ms) = record.response_time_ms {
            println!("    Response: {:.1} ms", ms);
        }
        if let (Some(name), Some(service_type)) = (&record.service_name, &record.service_type) {
            println!("    Service: {} ({})", name, service_type);
        }
        if let Some(server) = record.ssdp_info.as_deref().and_then(ssdp::server) {
            println!("    UPnP: {}", server);
        }
    }
}
