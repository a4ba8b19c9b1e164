//! Subnet prefix handling
//!
//! Scans always cover a /24: the prefix is the first three octets of the
//! local address and hosts are the suffixes 1..=254.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// First host suffix probed in a sweep
pub const FIRST_HOST: u8 = 1;
/// Last host suffix probed in a sweep
pub const LAST_HOST: u8 = 254;
/// Number of candidate hosts in one sweep
pub const TOTAL_HOSTS: usize = (LAST_HOST - FIRST_HOST + 1) as usize;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrefixError {
    #[error("Subnet prefix must have three octets, got {0:?}")]
    WrongOctetCount(String),
    #[error("Invalid octet {octet:?} in subnet prefix {prefix:?}")]
    InvalidOctet { prefix: String, octet: String },
}

/// The first three octets of a /24 network (e.g. `192.168.1`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubnetPrefix([u8; 3]);

impl SubnetPrefix {
    pub fn new(a: u8, b: u8, c: u8) -> Self {
        Self([a, b, c])
    }

    /// Prefix of the /24 that contains `ip`
    pub fn of(ip: Ipv4Addr) -> Self {
        let [a, b, c, _] = ip.octets();
        Self([a, b, c])
    }

    /// Address of a host in this prefix
    pub fn host(&self, suffix: u8) -> Ipv4Addr {
        let [a, b, c] = self.0;
        Ipv4Addr::new(a, b, c, suffix)
    }

    /// Iterate over every candidate host address (suffixes 1..=254)
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        (FIRST_HOST..=LAST_HOST).map(move |suffix| self.host(suffix))
    }
}

impl fmt::Display for SubnetPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{}.{}.{}", a, b, c)
    }
}

impl FromStr for SubnetPrefix {
    type Err = PrefixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(PrefixError::WrongOctetCount(s.to_string()));
        }

        let mut octets = [0u8; 3];
        for (slot, part) in octets.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| PrefixError::InvalidOctet {
                prefix: s.to_string(),
                octet: part.to_string(),
            })?;
        }
        Ok(Self(octets))
    }
}

impl TryFrom<String> for SubnetPrefix {
    type Error = PrefixError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SubnetPrefix> for String {
    fn from(prefix: SubnetPrefix) -> Self {
        prefix.to_string()
    }
}
