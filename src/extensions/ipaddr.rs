//! IPv4/IPv6 addresses and networks.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

use super::ExtensionParseError;

/// An address together with a prefix length. A bare address carries the
/// full-length prefix (`/32` or `/128`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IpAddress {
    net: IpNet,
}

impl IpAddress {
    pub fn addr(&self) -> IpAddr {
        self.net.addr()
    }

    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    pub fn is_ipv4(&self) -> bool {
        matches!(self.net, IpNet::V4(_))
    }

    pub fn is_ipv6(&self) -> bool {
        matches!(self.net, IpNet::V6(_))
    }

    /// The whole range lies inside `127.0.0.0/8` or equals `::1`.
    pub fn is_loopback(&self) -> bool {
        match self.net {
            IpNet::V4(net) => net.prefix_len() >= 8 && net.network().octets()[0] == 127,
            IpNet::V6(net) => net.prefix_len() == 128 && net.addr().is_loopback(),
        }
    }

    /// The whole range lies inside `224.0.0.0/4` or `ff00::/8`.
    pub fn is_multicast(&self) -> bool {
        match self.net {
            IpNet::V4(net) => net.prefix_len() >= 4 && net.network().octets()[0] & 0xf0 == 0xe0,
            IpNet::V6(net) => net.prefix_len() >= 8 && net.network().octets()[0] == 0xff,
        }
    }

    /// True iff this range is contained in `range`, compared on the first
    /// `range.prefix_len()` bits. Addresses of different families never match.
    pub fn is_in_range(&self, range: &IpAddress) -> bool {
        range.net.contains(&self.net)
    }
}

impl FromStr for IpAddress {
    type Err = ExtensionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ExtensionParseError::IpFormat {
            input: s.to_string(),
            reason,
        };

        let net = if s.contains('/') {
            s.parse::<IpNet>().map_err(|e| invalid(e.to_string()))?
        } else {
            IpNet::from(s.parse::<IpAddr>().map_err(|e| invalid(e.to_string()))?)
        };
        Ok(Self { net })
    }
}

impl Display for IpAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.net)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn ip(s: &str) -> IpAddress {
        s.parse().unwrap()
    }

    #[parameterized(
        v4 = { "192.168.1.10" },
        v4_cidr = { "10.0.0.0/8" },
        v6 = { "::1" },
        v6_cidr = { "2001:db8::/32" },
    )]
    fn test_parse_valid(input: &str) {
        assert!(input.parse::<IpAddress>().is_ok());
    }

    #[parameterized(
        garbage = { "not-an-ip" },
        v4_too_many_octets = { "1.2.3.4.5" },
        v4_prefix_too_long = { "10.0.0.0/33" },
        v6_prefix_too_long = { "::/129" },
        empty = { "" },
    )]
    fn test_parse_invalid(input: &str) {
        assert!(input.parse::<IpAddress>().is_err());
    }

    #[test]
    fn test_bare_address_has_full_prefix() {
        assert_eq!(ip("10.1.2.3").prefix_len(), 32);
        assert_eq!(ip("fe80::1").prefix_len(), 128);
    }

    #[test]
    fn test_family_predicates() {
        assert!(ip("10.0.0.1").is_ipv4());
        assert!(!ip("10.0.0.1").is_ipv6());
        assert!(ip("::1").is_ipv6());
    }

    #[parameterized(
        v4_loopback = { "127.0.0.1", true },
        v4_loopback_range = { "127.1.0.0/16", true },
        v4_too_wide = { "127.0.0.0/7", false },
        v4_other = { "10.0.0.1", false },
        v6_loopback = { "::1", true },
        v6_other = { "::2", false },
    )]
    fn test_is_loopback(input: &str, expected: bool) {
        assert_eq!(ip(input).is_loopback(), expected);
    }

    #[parameterized(
        v4_multicast = { "224.0.0.251", true },
        v4_multicast_range = { "239.0.0.0/8", true },
        v4_unicast = { "192.168.0.1", false },
        v6_multicast = { "ff02::1", true },
        v6_unicast = { "2001:db8::1", false },
    )]
    fn test_is_multicast(input: &str, expected: bool) {
        assert_eq!(ip(input).is_multicast(), expected);
    }

    #[parameterized(
        inside = { "192.168.0.10", "192.168.0.0/24", true },
        outside = { "192.168.1.10", "192.168.0.0/24", false },
        subnet_inside = { "192.168.0.128/25", "192.168.0.0/24", true },
        supernet_outside = { "192.168.0.0/16", "192.168.0.0/24", false },
        host_bits_in_network = { "10.1.2.3", "10.9.9.9/8", true },
        same_address = { "10.0.0.1", "10.0.0.1", true },
        v6_inside = { "2001:db8::1", "2001:db8::/32", true },
        mixed_families = { "10.0.0.1", "::/0", false },
        mixed_families_reverse = { "::1", "0.0.0.0/0", false },
    )]
    fn test_is_in_range(addr: &str, range: &str, expected: bool) {
        assert_eq!(ip(addr).is_in_range(&ip(range)), expected);
    }
}
