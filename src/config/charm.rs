//! Charm configuration as delivered by `config-get --format=yaml`
//!
//! Juju hands the charm a flat key/value map. Several values are themselves
//! YAML documents (AS-number maps, peer lists); those are parsed here, once,
//! into typed structures so reconciliation never sees raw YAML.

use crate::calico::resources::EncapsulationMode;
use crate::calico::subnet::{InvalidSubnet, SubnetMap};
use ipnet::IpNet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read charm config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid YAML in '{key}': {source}")]
    Yaml {
        key: String,
        source: serde_yaml::Error,
    },

    #[error("invalid CIDR '{cidr}' in '{key}'")]
    Cidr { key: String, cidr: String },

    #[error("invalid subnet in '{key}': {source}")]
    Subnet { key: String, source: InvalidSubnet },

    #[error("invalid {key} mode '{value}': expected Always, CrossSubnet or Never")]
    Mode { key: String, value: String },

    #[error("invalid route reflector cluster ID '{value}' for unit {unit}: expected an IPv4 address")]
    ClusterId { unit: u32, value: String },

    #[error("invalid unit name '{0}': expected <application>/<number>")]
    UnitName(String),
}

/// The flat key/value map exactly as Juju reported it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigValues(BTreeMap<String, serde_yaml::Value>);

impl ConfigValues {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let values: Option<BTreeMap<String, serde_yaml::Value>> =
            serde_yaml::from_str(contents).map_err(|source| ConfigError::Yaml {
                key: "<config>".to_string(),
                source,
            })?;
        Ok(Self(values.unwrap_or_default()))
    }

    pub fn get(&self, key: &str) -> Option<&serde_yaml::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_yaml::Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Parse into typed configuration
    pub fn parse(&self) -> Result<CharmConfig, ConfigError> {
        let mapping: serde_yaml::Mapping = self
            .0
            .iter()
            .map(|(key, value)| (serde_yaml::Value::from(key.as_str()), value.clone()))
            .collect();
        let raw: RawConfig = serde_yaml::from_value(serde_yaml::Value::Mapping(mapping))
            .map_err(|source| ConfigError::Yaml {
                key: "<config>".to_string(),
                source,
            })?;
        CharmConfig::from_raw(&raw)
    }
}

/// Config keys the charm reads, with the charm's defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
struct RawConfig {
    cidr: String,
    manage_pools: bool,
    ipip: String,
    vxlan: String,
    nat_outgoing: bool,
    veth_mtu: Option<u32>,
    global_as_number: u32,
    node_to_node_mesh: bool,
    bgp_service_cluster_ips: String,
    bgp_service_external_ips: String,
    bgp_service_loadbalancer_ips: String,
    unit_as_numbers: String,
    subnet_as_numbers: String,
    route_reflector_cluster_ids: String,
    global_bgp_peers: String,
    subnet_bgp_peers: String,
    unit_bgp_peers: String,
    disable_vxlan_tx_checksumming: bool,
    ignore_loose_rpf: bool,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            cidr: "192.168.0.0/16".to_string(),
            manage_pools: true,
            ipip: "Never".to_string(),
            vxlan: "Never".to_string(),
            nat_outgoing: true,
            veth_mtu: None,
            global_as_number: 64512,
            node_to_node_mesh: true,
            bgp_service_cluster_ips: String::new(),
            bgp_service_external_ips: String::new(),
            bgp_service_loadbalancer_ips: String::new(),
            unit_as_numbers: "{}".to_string(),
            subnet_as_numbers: "{}".to_string(),
            route_reflector_cluster_ids: "{}".to_string(),
            global_bgp_peers: "[]".to_string(),
            subnet_bgp_peers: "{}".to_string(),
            unit_bgp_peers: "{}".to_string(),
            disable_vxlan_tx_checksumming: true,
            ignore_loose_rpf: false,
        }
    }
}

/// A BGP peer as written in the peer config options
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PeerSpec {
    pub address: String,

    #[serde(rename = "as-number")]
    pub as_number: u32,
}

/// IP family of a configured pool CIDR
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn version(&self) -> u8 {
        match self {
            IpFamily::V4 => 4,
            IpFamily::V6 => 6,
        }
    }

    /// Name of the pool this charm manages for the family
    pub fn pool_name(&self) -> String {
        format!("ipv{}", self.version())
    }
}

/// One entry of the comma separated `cidr` option, kept as written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolCidr {
    pub cidr: String,
    pub family: IpFamily,
}

impl PoolCidr {
    /// Accepts interface notation (`10.0.1.0/16`) and bare addresses, the
    /// way the family of a pool is derived from whatever the operator typed
    fn parse(cidr: &str) -> Option<Self> {
        let cidr = cidr.trim();
        let family = match IpNet::from_str(cidr) {
            Ok(IpNet::V4(_)) => IpFamily::V4,
            Ok(IpNet::V6(_)) => IpFamily::V6,
            Err(_) => match IpAddr::from_str(cidr).ok()? {
                IpAddr::V4(_) => IpFamily::V4,
                IpAddr::V6(_) => IpFamily::V6,
            },
        };
        Some(Self {
            cidr: cidr.to_string(),
            family,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub manage: bool,
    pub cidrs: Vec<PoolCidr>,
    pub ipip: EncapsulationMode,
    pub vxlan: EncapsulationMode,
    pub nat_outgoing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BgpGlobalsConfig {
    pub as_number: u32,
    pub node_to_node_mesh: bool,
    pub service_cluster_ips: Vec<String>,
    pub service_external_ips: Vec<String>,
    pub service_load_balancer_ips: Vec<String>,
}

/// Per-unit and per-subnet overrides applied to this unit's Node resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOverrides {
    pub unit_as_numbers: BTreeMap<u32, u32>,
    pub subnet_as_numbers: SubnetMap<u32>,
    pub route_reflector_cluster_ids: BTreeMap<u32, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerConfig {
    pub global: Vec<PeerSpec>,
    pub subnet: SubnetMap<Vec<PeerSpec>>,
    pub unit: BTreeMap<u32, Vec<PeerSpec>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CharmConfig {
    pub pools: PoolConfig,
    pub bgp: BgpGlobalsConfig,
    pub node: NodeOverrides,
    pub peers: PeerConfig,
    pub veth_mtu: Option<u32>,
    pub disable_vxlan_tx_checksumming: bool,
    pub ignore_loose_rpf: bool,
}

impl Default for CharmConfig {
    fn default() -> Self {
        // The defaults are all well formed
        Self::from_raw(&RawConfig::default()).unwrap_or_else(|e| unreachable!("{e}"))
    }
}

impl CharmConfig {
    fn from_raw(raw: &RawConfig) -> Result<Self, ConfigError> {
        let cidrs = raw
            .cidr
            .split(',')
            .map(|cidr| {
                PoolCidr::parse(cidr).ok_or_else(|| ConfigError::Cidr {
                    key: "cidr".to_string(),
                    cidr: cidr.trim().to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let pools = PoolConfig {
            manage: raw.manage_pools,
            cidrs,
            ipip: parse_mode("ipip", &raw.ipip)?,
            vxlan: parse_mode("vxlan", &raw.vxlan)?,
            nat_outgoing: raw.nat_outgoing,
        };

        let bgp = BgpGlobalsConfig {
            as_number: raw.global_as_number,
            node_to_node_mesh: raw.node_to_node_mesh,
            service_cluster_ips: split_whitespace(&raw.bgp_service_cluster_ips),
            service_external_ips: split_whitespace(&raw.bgp_service_external_ips),
            service_load_balancer_ips: split_whitespace(&raw.bgp_service_loadbalancer_ips),
        };

        let route_reflector_cluster_ids: BTreeMap<u32, String> =
            parse_yaml("route-reflector-cluster-ids", &raw.route_reflector_cluster_ids)?;
        for (unit, value) in &route_reflector_cluster_ids {
            if Ipv4Addr::from_str(value).is_err() {
                return Err(ConfigError::ClusterId {
                    unit: *unit,
                    value: value.clone(),
                });
            }
        }

        let node = NodeOverrides {
            unit_as_numbers: parse_yaml("unit-as-numbers", &raw.unit_as_numbers)?,
            subnet_as_numbers: parse_subnet_map("subnet-as-numbers", &raw.subnet_as_numbers)?,
            route_reflector_cluster_ids,
        };

        let peers = PeerConfig {
            global: parse_yaml("global-bgp-peers", &raw.global_bgp_peers)?,
            subnet: parse_subnet_map("subnet-bgp-peers", &raw.subnet_bgp_peers)?,
            unit: parse_yaml("unit-bgp-peers", &raw.unit_bgp_peers)?,
        };

        Ok(Self {
            pools,
            bgp,
            node,
            peers,
            veth_mtu: raw.veth_mtu.filter(|mtu| *mtu > 0),
            disable_vxlan_tx_checksumming: raw.disable_vxlan_tx_checksumming,
            ignore_loose_rpf: raw.ignore_loose_rpf,
        })
    }

    /// Whether both encapsulations are turned on, which Calico rejects
    pub fn encapsulation_conflict(&self) -> bool {
        self.pools.ipip.is_enabled() && self.pools.vxlan.is_enabled()
    }
}

fn parse_mode(key: &str, value: &str) -> Result<EncapsulationMode, ConfigError> {
    EncapsulationMode::from_str(value).map_err(|_| ConfigError::Mode {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn split_whitespace(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

/// Parse a YAML-encoded option. Blank and `null` documents yield the default.
fn parse_yaml<T: DeserializeOwned + Default>(key: &str, value: &str) -> Result<T, ConfigError> {
    if value.trim().is_empty() {
        return Ok(T::default());
    }

    let parsed: Option<T> = serde_yaml::from_str(value).map_err(|source| ConfigError::Yaml {
        key: key.to_string(),
        source,
    })?;
    Ok(parsed.unwrap_or_default())
}

fn parse_subnet_map<V: DeserializeOwned>(
    key: &str,
    value: &str,
) -> Result<SubnetMap<V>, ConfigError> {
    let mapping: serde_yaml::Mapping = parse_yaml(key, value)?;

    let mut entries = Vec::with_capacity(mapping.len());
    for (subnet, value) in mapping {
        let subnet = match subnet {
            serde_yaml::Value::String(subnet) => subnet,
            other => {
                return Err(ConfigError::Subnet {
                    key: key.to_string(),
                    source: InvalidSubnet {
                        cidr: format!("{:?}", other),
                        reason: "subnet keys must be strings".to_string(),
                    },
                });
            }
        };
        let value: V = serde_yaml::from_value(value).map_err(|source| ConfigError::Yaml {
            key: key.to_string(),
            source,
        })?;
        entries.push((subnet, value));
    }

    SubnetMap::from_entries(entries).map_err(|source| ConfigError::Subnet {
        key: key.to_string(),
        source,
    })
}
