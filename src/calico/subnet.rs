//! Matching the unit's bind address against subnet-scoped configuration

use ipnet::IpNet;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid subnet '{cidr}': {reason}")]
pub struct InvalidSubnet {
    pub cidr: String,
    pub reason: String,
}

/// Parse a subnet in network form. Host bits must be zero, so
/// `10.0.1.0/16` is rejected while `10.0.0.0/16` is accepted.
pub fn parse_subnet(cidr: &str) -> Result<IpNet, InvalidSubnet> {
    let net = IpNet::from_str(cidr.trim()).map_err(|e| InvalidSubnet {
        cidr: cidr.to_string(),
        reason: e.to_string(),
    })?;

    if net.trunc() != net {
        return Err(InvalidSubnet {
            cidr: cidr.to_string(),
            reason: "has host bits set".to_string(),
        });
    }

    Ok(net)
}

/// Values keyed by subnet, in configuration order
#[derive(Debug, Clone, PartialEq)]
pub struct SubnetMap<V> {
    entries: Vec<(IpNet, V)>,
}

impl<V> Default for SubnetMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> SubnetMap<V> {
    pub fn from_entries<K, I>(entries: I) -> Result<Self, InvalidSubnet>
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, V)>,
    {
        let entries = entries
            .into_iter()
            .map(|(cidr, value)| Ok((parse_subnet(cidr.as_ref())?, value)))
            .collect::<Result<Vec<_>, InvalidSubnet>>()?;
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries whose subnet contains `address`, longest prefix first.
    /// Subnets with equal prefix length keep their configuration order.
    pub fn matching(&self, address: Option<IpAddr>) -> Vec<(&IpNet, &V)> {
        let Some(address) = address else {
            return Vec::new();
        };

        let mut matches: Vec<(&IpNet, &V)> = self
            .entries
            .iter()
            .filter(|(net, _)| net.contains(&address))
            .map(|(net, value)| (net, value))
            .collect();
        matches.sort_by_key(|(net, _)| std::cmp::Reverse(net.prefix_len()));
        matches
    }

    /// Value of the most specific subnet containing `address`
    pub fn most_specific(&self, address: Option<IpAddr>) -> Option<&V> {
        self.matching(address).into_iter().next().map(|(_, value)| value)
    }
}

/// Subnets from `subnets` that contain `bind_address`, most specific first.
///
/// An unparseable bind address matches nothing. Malformed subnets are errors.
pub fn filter_local<'a, I>(bind_address: &str, subnets: I) -> Result<Vec<IpNet>, InvalidSubnet>
where
    I: IntoIterator<Item = &'a str>,
{
    let map = SubnetMap::from_entries(subnets.into_iter().map(|cidr| (cidr, ())))?;
    let address = IpAddr::from_str(bind_address.trim()).ok();
    Ok(map
        .matching(address)
        .into_iter()
        .map(|(net, _)| *net)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn net(cidr: &str) -> IpNet {
        IpNet::from_str(cidr).unwrap()
    }

    #[test]
    fn test_filter_local_subnets() {
        let result = filter_local("192.168.1.3", ["192.168.1.0/24", "10.0.0.0/16"]).unwrap();
        assert_eq!(result, vec![net("192.168.1.0/24")]);
    }

    #[test]
    fn test_most_specific_first() {
        let result = filter_local(
            "10.1.2.3",
            ["10.0.0.0/8", "10.1.2.0/24", "0.0.0.0/0", "10.1.0.0/16"],
        )
        .unwrap();
        assert_eq!(
            result,
            vec![
                net("10.1.2.0/24"),
                net("10.1.0.0/16"),
                net("10.0.0.0/8"),
                net("0.0.0.0/0")
            ]
        );
    }

    #[rstest(
        bind_address,
        case("not-an-address"),
        case(""),
        case("10.0.0.0/24")
    )]
    fn test_unparseable_bind_address_matches_nothing(bind_address: &str) {
        let result = filter_local(bind_address, ["10.0.0.0/8"]).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_empty_map_matches_nothing() {
        let result = filter_local("10.0.0.1", std::iter::empty()).unwrap();
        assert!(result.is_empty());
    }

    #[rstest(cidr, case("10.0.1.0/16"), case("10.0.0.0/33"), case("bogus"))]
    fn test_malformed_subnet_is_an_error(cidr: &str) {
        assert!(filter_local("10.0.0.1", [cidr]).is_err());
    }

    #[test]
    fn test_families_do_not_cross_match() {
        let map = SubnetMap::from_entries([("fd00::/64", 1u32), ("10.0.0.0/8", 2u32)]).unwrap();
        assert_eq!(map.most_specific(Some("10.9.9.9".parse().unwrap())), Some(&2));
        assert_eq!(map.most_specific(Some("fd00::9".parse().unwrap())), Some(&1));
        assert_eq!(map.most_specific(Some("fe80::1".parse().unwrap())), None);
        assert_eq!(map.most_specific(None), None);
    }

    #[test]
    fn test_equal_prefixes_keep_configuration_order() {
        let map = SubnetMap::from_entries([("10.0.0.0/16", "first"), ("10.0.0.0/16", "second")])
            .unwrap();
        let values: Vec<&str> = map
            .matching(Some("10.0.3.4".parse().unwrap()))
            .into_iter()
            .map(|(_, value)| *value)
            .collect();
        assert_eq!(values, vec!["first", "second"]);
    }
}
