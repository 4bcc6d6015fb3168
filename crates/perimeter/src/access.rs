//! Network access control.
//!
//! An [`AllowList`] decides whether a client address may talk to the server
//! at all. It is built once at startup from a comma-separated list of IPv4
//! CIDR ranges and is read-only afterwards.
//!
//! Rules, in order:
//!
//! 1. An empty list allows every address.
//! 2. A missing client address is denied.
//! 3. IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) are treated as IPv4.
//! 4. Loopback addresses are always allowed.
//! 5. Otherwise the address must fall inside at least one range.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::error::{PerimeterError, Result};

/// An IPv4 network in CIDR form with its host bits cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl AddressRange {
    /// Build a range from an address and prefix length.
    ///
    /// Host bits of `address` are masked away, so `192.168.1.77/24` and
    /// `192.168.1.0/24` produce the same range.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Option<Self> {
        if prefix_len > 32 {
            return None;
        }
        let network = Ipv4Addr::from(u32::from(address) & mask(prefix_len));
        Some(Self {
            network,
            prefix_len,
        })
    }

    /// The network address.
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// The prefix length in bits.
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Whether `addr` lies inside this range.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let m = mask(self.prefix_len);
        u32::from(addr) & m == u32::from(self.network) & m
    }

    /// Like [`contains`](Self::contains) but accepts any IP address.
    ///
    /// IPv6 addresses only match when they are IPv4-mapped.
    pub fn contains_ip(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(v4) => self.contains(v4),
            IpAddr::V6(v6) => v6.to_ipv4_mapped().is_some_and(|v4| self.contains(v4)),
        }
    }
}

fn mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

impl FromStr for AddressRange {
    type Err = PerimeterError;

    fn from_str(s: &str) -> Result<Self> {
        let input = s.trim();
        let parts: Vec<&str> = input.split('/').collect();
        if parts.len() != 2 {
            return Err(PerimeterError::MalformedRange {
                input: input.to_string(),
            });
        }

        let address: Ipv4Addr =
            parts[0]
                .parse()
                .map_err(|_| PerimeterError::InvalidRangeAddress {
                    input: input.to_string(),
                    address: parts[0].to_string(),
                })?;

        let prefix_len = parts[1]
            .parse::<u8>()
            .ok()
            .filter(|p| *p <= 32)
            .ok_or_else(|| PerimeterError::InvalidPrefixLength {
                input: input.to_string(),
            })?;

        AddressRange::new(address, prefix_len).ok_or_else(|| PerimeterError::InvalidPrefixLength {
            input: input.to_string(),
        })
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Set of address ranges permitted to reach the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    ranges: Vec<AddressRange>,
}

impl AllowList {
    /// An allow list with no restrictions.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Build an allow list from already-parsed ranges.
    pub fn from_ranges(ranges: Vec<AddressRange>) -> Self {
        Self { ranges }
    }

    /// Parse a comma-separated list such as `"192.168.1.0/24, 10.0.0.0/8"`.
    ///
    /// `None` or a blank string yields an unrestricted list. Empty entries are
    /// skipped. Any malformed entry fails the whole list.
    pub fn parse(spec: Option<&str>) -> Result<Self> {
        let Some(spec) = spec else {
            return Ok(Self::unrestricted());
        };

        let ranges = spec
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(AddressRange::from_str)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { ranges })
    }

    /// Whether any range restricts access.
    pub fn has_restrictions(&self) -> bool {
        !self.ranges.is_empty()
    }

    /// The configured ranges, in the order they were given.
    pub fn ranges(&self) -> &[AddressRange] {
        &self.ranges
    }

    /// Decide whether a client at `addr` may connect.
    pub fn is_allowed(&self, addr: Option<IpAddr>) -> bool {
        if self.ranges.is_empty() {
            return true;
        }

        let Some(addr) = addr else {
            return false;
        };

        let addr = match addr {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
            v4 => v4,
        };

        if addr.is_loopback() {
            return true;
        }

        match addr {
            IpAddr::V4(v4) => self.ranges.iter().any(|range| range.contains(v4)),
            IpAddr::V6(_) => false,
        }
    }
}

impl fmt::Display for AllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ranges.is_empty() {
            return f.write_str("all");
        }
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    fn v4(s: &str) -> Ipv4Addr {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    // ========================================================================
    // AddressRange parsing
    // ========================================================================

    #[test]
    fn test_parse_valid_range() {
        let range: AddressRange = "192.168.1.0/24".parse().unwrap();
        assert_eq!(range.network(), v4("192.168.1.0"));
        assert_eq!(range.prefix_len(), 24);
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let range: AddressRange = "  10.0.0.0/8 ".parse().unwrap();
        assert_eq!(range.to_string(), "10.0.0.0/8");
    }

    #[test]
    fn test_parse_masks_host_bits() {
        let range: AddressRange = "192.168.1.77/24".parse().unwrap();
        assert_eq!(range.to_string(), "192.168.1.0/24");
    }

    #[test]
    fn test_parse_rejects_missing_prefix() {
        let err = "192.168.1.0".parse::<AddressRange>().unwrap_err();
        assert!(matches!(err, PerimeterError::MalformedRange { .. }));
    }

    #[test]
    fn test_parse_rejects_extra_slash() {
        let err = "192.168.1.0/24/1".parse::<AddressRange>().unwrap_err();
        assert!(matches!(err, PerimeterError::MalformedRange { .. }));
    }

    #[test]
    fn test_parse_rejects_ipv6() {
        let err = "fe80::/10".parse::<AddressRange>().unwrap_err();
        assert!(matches!(err, PerimeterError::InvalidRangeAddress { .. }));
    }

    #[test]
    fn test_parse_rejects_bad_prefix() {
        for input in ["10.0.0.0/33", "10.0.0.0/-1", "10.0.0.0/x", "10.0.0.0/"] {
            let err = input.parse::<AddressRange>().unwrap_err();
            assert!(
                matches!(err, PerimeterError::InvalidPrefixLength { .. }),
                "{input} should fail on the prefix"
            );
        }
    }

    // ========================================================================
    // AddressRange matching
    // ========================================================================

    #[test]
    fn test_prefix_zero_matches_everything() {
        let range: AddressRange = "0.0.0.0/0".parse().unwrap();
        assert!(range.contains(v4("1.2.3.4")));
        assert!(range.contains(v4("255.255.255.255")));
        assert!(range.contains(v4("0.0.0.0")));
    }

    #[test]
    fn test_prefix_32_matches_exactly_one() {
        let range: AddressRange = "192.168.1.10/32".parse().unwrap();
        assert!(range.contains(v4("192.168.1.10")));
        assert!(!range.contains(v4("192.168.1.11")));
        assert!(!range.contains(v4("192.168.1.9")));
    }

    #[test]
    fn test_prefix_matches_top_bits() {
        let range: AddressRange = "172.16.0.0/12".parse().unwrap();
        assert!(range.contains(v4("172.16.0.1")));
        assert!(range.contains(v4("172.31.255.254")));
        assert!(!range.contains(v4("172.32.0.1")));
        assert!(!range.contains(v4("172.15.255.255")));
    }

    #[test]
    fn test_contains_ip_handles_mapped_ipv6() {
        let range: AddressRange = "192.168.1.0/24".parse().unwrap();
        let mapped = IpAddr::V6(v4("192.168.1.5").to_ipv6_mapped());
        assert!(range.contains_ip(mapped));
        assert!(!range.contains_ip(IpAddr::V6(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1))));
    }

    // ========================================================================
    // AllowList
    // ========================================================================

    #[test]
    fn test_empty_list_allows_everything() {
        let list = AllowList::parse(None).unwrap();
        assert!(!list.has_restrictions());
        assert!(list.is_allowed(ip("8.8.8.8")));
        assert!(list.is_allowed(None));
    }

    #[test]
    fn test_blank_spec_is_unrestricted() {
        let list = AllowList::parse(Some(" , ,")).unwrap();
        assert!(!list.has_restrictions());
    }

    #[test]
    fn test_list_skips_empty_entries() {
        let list = AllowList::parse(Some("192.168.1.0/24,, 10.0.0.0/8 ,")).unwrap();
        assert_eq!(list.ranges().len(), 2);
        assert_eq!(list.to_string(), "192.168.1.0/24, 10.0.0.0/8");
    }

    #[test]
    fn test_list_fails_on_any_bad_entry() {
        assert!(AllowList::parse(Some("192.168.1.0/24,garbage")).is_err());
    }

    #[test]
    fn test_restricted_list_filters() {
        let list = AllowList::parse(Some("192.168.1.0/24")).unwrap();
        assert!(list.is_allowed(ip("192.168.1.42")));
        assert!(!list.is_allowed(ip("192.168.2.42")));
        assert!(!list.is_allowed(ip("10.0.0.1")));
    }

    #[test]
    fn test_missing_address_is_denied_when_restricted() {
        let list = AllowList::parse(Some("192.168.1.0/24")).unwrap();
        assert!(!list.is_allowed(None));
    }

    #[test]
    fn test_loopback_always_allowed() {
        let list = AllowList::parse(Some("10.0.0.0/8")).unwrap();
        assert!(list.is_allowed(ip("127.0.0.1")));
        assert!(list.is_allowed(ip("127.10.20.30")));
        assert!(list.is_allowed(ip("::1")));
    }

    #[test]
    fn test_mapped_ipv6_is_normalized() {
        let list = AllowList::parse(Some("192.168.1.0/24")).unwrap();
        assert!(list.is_allowed(ip("::ffff:192.168.1.9")));
        assert!(!list.is_allowed(ip("::ffff:192.168.9.9")));
        assert!(list.is_allowed(ip("::ffff:127.0.0.1")));
    }

    #[test]
    fn test_native_ipv6_denied_when_restricted() {
        let list = AllowList::parse(Some("0.0.0.0/0")).unwrap();
        assert!(!list.is_allowed(ip("fe80::1")));
        assert!(list.is_allowed(ip("203.0.113.7")));
    }

    #[test]
    fn test_display_unrestricted() {
        assert_eq!(AllowList::unrestricted().to_string(), "all");
    }
}
