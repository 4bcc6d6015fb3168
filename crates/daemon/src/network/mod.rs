//! LAN address discovery and listener binding.
//!
//! This module provides:
//! - Selection of the address shown in the share URL
//! - Binding of the HTTP listener on a fixed port or the first free port of
//!   a range

pub mod listener;

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use perimeter::AddressRange;
use tracing::debug;

pub use listener::{bind_listener, NetworkError};

/// Private ranges, most likely home or office LAN first.
const PREFERRED_RANGES: [(Ipv4Addr, u8); 3] = [
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
];

/// Remote addresses used to learn which local address routes where.
///
/// Connecting a UDP socket sends nothing; it only selects a source address.
const ROUTE_PROBES: [Ipv4Addr; 4] = [
    Ipv4Addr::new(192, 168, 0, 1),
    Ipv4Addr::new(10, 0, 0, 1),
    Ipv4Addr::new(172, 16, 0, 1),
    Ipv4Addr::new(1, 1, 1, 1),
];

/// Pick the address to advertise: `192.168/16`, then `10/8`, then
/// `172.16/12`, else the first candidate.
pub fn select_primary(candidates: &[Ipv4Addr]) -> Option<Ipv4Addr> {
    PREFERRED_RANGES
        .iter()
        .filter_map(|(network, prefix)| AddressRange::new(*network, *prefix))
        .find_map(|range| candidates.iter().copied().find(|ip| range.contains(*ip)))
        .or_else(|| candidates.first().copied())
}

/// Non-loopback IPv4 addresses this host would use to reach common LAN
/// gateways and the internet, deduplicated in probe order.
pub fn local_ipv4_addresses() -> Vec<Ipv4Addr> {
    let mut found = Vec::new();
    for probe in ROUTE_PROBES {
        match probe_source_address(probe) {
            Some(ip) if !ip.is_loopback() && !ip.is_unspecified() && !found.contains(&ip) => {
                found.push(ip)
            }
            Some(_) => {}
            None => debug!(%probe, "No route for address probe"),
        }
    }
    found
}

fn probe_source_address(probe: Ipv4Addr) -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((probe, 9)).ok()?;
    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) => Some(ip),
        IpAddr::V6(_) => None,
    }
}

/// Host to show in the share URL for a listener bound to `bind`.
///
/// A specific bind address is used as is; a wildcard bind advertises the
/// primary LAN address, falling back to `localhost`.
pub fn advertised_host(bind: IpAddr) -> String {
    if !bind.is_unspecified() {
        return bind.to_string();
    }
    select_primary(&local_ipv4_addresses())
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    #[test]
    fn test_prefers_192_168() {
        let candidates = [ip("10.0.0.5"), ip("172.16.3.4"), ip("192.168.1.20")];
        assert_eq!(select_primary(&candidates), Some(ip("192.168.1.20")));
    }

    #[test]
    fn test_prefers_10_over_172() {
        let candidates = [ip("172.20.0.2"), ip("10.1.2.3")];
        assert_eq!(select_primary(&candidates), Some(ip("10.1.2.3")));
    }

    #[test]
    fn test_172_only_within_16_to_31() {
        let candidates = [ip("172.32.0.1"), ip("172.31.255.1")];
        assert_eq!(select_primary(&candidates), Some(ip("172.31.255.1")));
    }

    #[test]
    fn test_falls_back_to_first() {
        let candidates = [ip("100.64.0.1"), ip("8.8.8.8")];
        assert_eq!(select_primary(&candidates), Some(ip("100.64.0.1")));
        assert_eq!(select_primary(&[]), None);
    }

    #[test]
    fn test_local_addresses_exclude_loopback() {
        assert!(local_ipv4_addresses().iter().all(|ip| !ip.is_loopback()));
    }

    #[test]
    fn test_advertised_host_specific_bind() {
        let bind: IpAddr = "192.168.5.5".parse().unwrap();
        assert_eq!(advertised_host(bind), "192.168.5.5");
    }
}
