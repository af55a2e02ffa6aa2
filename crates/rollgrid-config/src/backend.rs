//! Backend addresses.
//!
//! Every address in a rollout config (the load balancer and each backend)
//! must be an IP literal plus a port in `1..=65534`. Hostnames are not
//! resolved.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Highest port accepted in an address.
pub const MAX_PORT: u16 = 65534;

/// A backend registered with the load balancer, keyed by IP and port.
///
/// The same value identifies the rollout target and its pool membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Backend {
    pub ip: IpAddr,
    pub port: u16,
}

impl Backend {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{ip}:{}", self.port),
            IpAddr::V6(ip) => write!(f, "[{ip}]:{}", self.port),
        }
    }
}

impl FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, port) = check_ip_port(s)?;
        Ok(Self { ip, port })
    }
}

/// Split a `host:port` string and verify both halves.
///
/// IPv6 hosts must be bracketed (`[::1]:8080`).
pub fn check_ip_port(addr: &str) -> ConfigResult<(IpAddr, u16)> {
    let invalid = |reason: &str| ConfigError::Address {
        addr: addr.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| invalid("missing port"))?;

    let host = match host.strip_prefix('[') {
        Some(inner) => inner
            .strip_suffix(']')
            .ok_or_else(|| invalid("unterminated IPv6 bracket"))?,
        None if host.contains(':') => return Err(invalid("too many colons in address")),
        None => host,
    };

    let ip: IpAddr = host
        .parse()
        .map_err(|_| invalid("host is not an IP address"))?;

    // Non-numeric ports are reported the same way as out-of-range ones.
    let port: u32 = port.parse().unwrap_or(0);
    if !(1..=u32::from(MAX_PORT)).contains(&port) {
        return Err(invalid(&format!("invalid port: {port}")));
    }

    Ok((ip, port as u16))
}
