//! Address range expansion

use crate::error::{Result, SurveyError};
use ipnetwork::IpNetwork;
use std::fmt;
use std::net::IpAddr;

/// A parsed CIDR block, normalized to its network address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkRange {
    network: IpNetwork,
}

impl NetworkRange {
    /// Parse `address/prefix`. Host bits are masked off, so `192.168.1.7/24`
    /// is the same range as `192.168.1.0/24`.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let descriptor = descriptor.trim();
        if !descriptor.contains('/') {
            return Err(SurveyError::invalid_range(
                descriptor,
                "expected address/prefix, e.g. 192.168.1.0/24",
            ));
        }

        let parsed: IpNetwork = descriptor
            .parse()
            .map_err(|e| SurveyError::invalid_range(descriptor, format!("{}", e)))?;
        let network = IpNetwork::new(parsed.network(), parsed.prefix())
            .map_err(|e| SurveyError::invalid_range(descriptor, format!("{}", e)))?;

        Ok(Self { network })
    }

    pub fn network(&self) -> IpNetwork {
        self.network
    }

    /// Number of addresses in the block, saturating for IPv6 /0
    fn total_addresses(&self) -> u128 {
        let bits: u32 = match self.network {
            IpNetwork::V4(_) => 32,
            IpNetwork::V6(_) => 128,
        };
        1u128
            .checked_shl(bits - u32::from(self.network.prefix()))
            .unwrap_or(u128::MAX)
    }

    /// Addresses reserved by the network itself, skipped at the front and
    /// back of the block
    fn reserved(&self) -> (u128, u128) {
        if self.total_addresses() <= 2 {
            return (0, 0);
        }
        match self.network {
            // network and broadcast
            IpNetwork::V4(_) => (1, 1),
            // subnet-router anycast
            IpNetwork::V6(_) => (1, 0),
        }
    }

    /// Number of candidate host addresses
    pub fn host_count(&self) -> u128 {
        let (front, back) = self.reserved();
        self.total_addresses() - front - back
    }

    /// Candidate host addresses in ascending order
    pub fn hosts(&self) -> Vec<IpAddr> {
        let (front, _) = self.reserved();
        let count = usize::try_from(self.host_count()).unwrap_or(usize::MAX);
        self.network
            .iter()
            .skip(front as usize)
            .take(count)
            .collect()
    }
}

impl fmt::Display for NetworkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.network)
    }
}

/// Expand a CIDR descriptor into its host addresses, refusing ranges with
/// more than `max_hosts` candidates.
pub fn expand_range(descriptor: &str, max_hosts: usize) -> Result<Vec<IpAddr>> {
    let range = NetworkRange::parse(descriptor)?;
    let count = range.host_count();
    if count > max_hosts as u128 {
        return Err(SurveyError::invalid_range(
            descriptor,
            format!("{} host addresses exceeds the limit of {}", count, max_hosts),
        ));
    }

    let hosts = range.hosts();
    tracing::debug!("Expanded {} to {} host addresses", range, hosts.len());
    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(list: &[&str]) -> Vec<IpAddr> {
        list.iter().map(|a| a.parse().unwrap()).collect()
    }

    #[test]
    fn test_slash_30_excludes_network_and_broadcast() {
        let hosts = expand_range("203.0.113.0/30", 1024).unwrap();
        assert_eq!(hosts, addrs(&["203.0.113.1", "203.0.113.2"]));
    }

    #[test]
    fn test_host_bits_are_masked() {
        let a = NetworkRange::parse("192.168.1.77/24").unwrap();
        let b = NetworkRange::parse("192.168.1.0/24").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "192.168.1.0/24");

        let hosts = a.hosts();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts.first(), Some(&"192.168.1.1".parse().unwrap()));
        assert_eq!(hosts.last(), Some(&"192.168.1.254".parse().unwrap()));
    }

    #[test]
    fn test_point_to_point_and_single_host() {
        assert_eq!(
            expand_range("10.0.0.0/31", 16).unwrap(),
            addrs(&["10.0.0.0", "10.0.0.1"])
        );
        assert_eq!(expand_range("10.0.0.9/32", 16).unwrap(), addrs(&["10.0.0.9"]));
    }

    #[test]
    fn test_ipv6_skips_anycast_only() {
        assert_eq!(
            expand_range("2001:db8::/126", 16).unwrap(),
            addrs(&["2001:db8::1", "2001:db8::2", "2001:db8::3"])
        );
        assert_eq!(
            expand_range("2001:db8::/127", 16).unwrap(),
            addrs(&["2001:db8::", "2001:db8::1"])
        );
    }

    #[test]
    fn test_hosts_are_ascending_and_unique() {
        let hosts = expand_range("172.16.0.0/22", 4096).unwrap();
        assert_eq!(hosts.len(), 1022);
        assert!(hosts.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_rejects_malformed_input() {
        for input in ["", "not-a-range", "10.0.0.0/33", "10.0.0.256/24", "2001:db8::/129"] {
            assert!(
                matches!(expand_range(input, 1024), Err(SurveyError::InvalidRange { .. })),
                "{} should be rejected",
                input
            );
        }
    }

    #[test]
    fn test_rejects_bare_address() {
        match expand_range("10.0.0.1", 1024) {
            Err(SurveyError::InvalidRange { input, reason }) => {
                assert_eq!(input, "10.0.0.1");
                assert!(reason.contains("prefix"));
            }
            other => panic!("expected InvalidRange, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_ranges_over_limit() {
        assert!(expand_range("10.0.0.0/24", 254).is_ok());
        assert!(matches!(
            expand_range("10.0.0.0/24", 253),
            Err(SurveyError::InvalidRange { .. })
        ));
        assert!(matches!(
            expand_range("::/0", 65_536),
            Err(SurveyError::InvalidRange { .. })
        ));
        assert!(matches!(
            expand_range("0.0.0.0/0", 65_536),
            Err(SurveyError::InvalidRange { .. })
        ));
    }
}
