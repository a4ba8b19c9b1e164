//! netsweep Core - Device model, merge engine and scan session types
//!
//! This crate provides the foundational types for netsweep:
//! - Device records keyed by IPv4 address
//! - The merge engine that unifies port-scan, mDNS and SSDP observations
//! - Scan session and published snapshot types
//! - Device classification and SSDP header helpers

pub mod classify;
pub mod device;
pub mod merge;
pub mod session;
pub mod ssdp;
pub mod subnet;

pub use classify::{display_name, DeviceKind};
pub use device::{DeviceRecord, ServiceRecord};
pub use merge::{merge_devices, sort_by_address};
pub use session::{ScanSession, ScanSnapshot, ScanStatus};
pub use subnet::{PrefixError, SubnetPrefix, TOTAL_HOSTS};
