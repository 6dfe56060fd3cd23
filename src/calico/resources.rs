//! Calico v3 resources as exchanged with calicoctl
//!
//! Fields this crate manages are typed; everything else a resource carries is
//! kept in `extra` so a fetched resource can be patched and applied back
//! without dropping data Calico itself wrote.

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

pub const API_VERSION: &str = "projectcalico.org/v3";

/// Resource kinds as calicoctl accepts them on the command line
pub mod kind {
    pub const BGP_CONFIGURATION: &str = "bgpconfig";
    pub const NODE: &str = "node";
    pub const POOL: &str = "pool";
    pub const BGP_PEER: &str = "bgppeer";
    pub const BGP_PEERS: &str = "bgppeers";
}

/// Name of the cluster-wide BGPConfiguration
pub const DEFAULT_BGP_CONFIGURATION: &str = "default";

type Extra = BTreeMap<String, serde_yaml::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource<S> {
    pub api_version: String,
    pub kind: String,
    pub metadata: Metadata,
    pub spec: S,
}

impl<S> Resource<S> {
    pub fn new(kind: &str, name: impl Into<String>, spec: S) -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: kind.to_string(),
            metadata: Metadata {
                name: name.into(),
                extra: Extra::new(),
            },
            spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Just enough of any resource to know its name
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectRef {
    pub metadata: Metadata,
}

/// Shape of `calicoctl get <kind>` without a name
#[derive(Debug, Deserialize)]
pub(crate) struct ResourceList<T> {
    pub items: Option<Vec<T>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BgpConfigurationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_number: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_to_node_mesh_enabled: Option<bool>,

    #[serde(
        rename = "serviceClusterIPs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_cluster_ips: Option<Vec<ServiceIpBlock>>,

    #[serde(
        rename = "serviceExternalIPs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_external_ips: Option<Vec<ServiceIpBlock>>,

    #[serde(
        rename = "serviceLoadBalancerIPs",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_load_balancer_ips: Option<Vec<ServiceIpBlock>>,

    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIpBlock {
    pub cidr: String,
}

pub type BgpConfiguration = Resource<BgpConfigurationSpec>;

impl BgpConfiguration {
    /// Skeleton used when the datastore has no default BGPConfiguration yet
    pub fn skeleton() -> Self {
        Resource::new(
            "BGPConfiguration",
            DEFAULT_BGP_CONFIGURATION,
            BgpConfigurationSpec::default(),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgp: Option<NodeBgpSpec>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Per-node BGP settings. A `None` AS number is written out as `null` so that
/// the node falls back to the global AS number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeBgpSpec {
    #[serde(default)]
    pub as_number: Option<u32>,

    #[serde(rename = "routeReflectorClusterID", default)]
    pub route_reflector_cluster_id: Option<String>,

    #[serde(flatten)]
    pub extra: Extra,
}

pub type CalicoNode = Resource<NodeSpec>;

/// IPIP / VXLAN encapsulation mode of an IP pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncapsulationMode {
    Always,
    CrossSubnet,
    #[default]
    Never,
}

impl EncapsulationMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, EncapsulationMode::Never)
    }
}

impl FromStr for EncapsulationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "Always" => Ok(EncapsulationMode::Always),
            "CrossSubnet" => Ok(EncapsulationMode::CrossSubnet),
            "Never" => Ok(EncapsulationMode::Never),
            _ => Err(anyhow!(
                "Invalid encapsulation mode: {}. Must be 'Always', 'CrossSubnet' or 'Never'",
                s
            )),
        }
    }
}

impl std::fmt::Display for EncapsulationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncapsulationMode::Always => write!(f, "Always"),
            EncapsulationMode::CrossSubnet => write!(f, "CrossSubnet"),
            EncapsulationMode::Never => write!(f, "Never"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpPoolSpec {
    pub cidr: String,

    #[serde(default)]
    pub ipip_mode: EncapsulationMode,

    #[serde(default)]
    pub vxlan_mode: EncapsulationMode,

    #[serde(default)]
    pub nat_outgoing: bool,

    #[serde(flatten)]
    pub extra: Extra,
}

pub type IpPool = Resource<IpPoolSpec>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BgpPeerSpec {
    pub node: String,

    #[serde(rename = "peerIP")]
    pub peer_ip: String,

    pub as_number: u32,

    #[serde(flatten)]
    pub extra: Extra,
}

pub type BgpPeer = Resource<BgpPeerSpec>;

/// Lowercase and map `/` and `:` to `-` so unit names and addresses can be
/// embedded in resource names. `::` becomes `--`; nothing is collapsed.
pub fn sanitize_name(value: &str) -> String {
    value.to_lowercase().replace(['/', ':'], "-")
}
