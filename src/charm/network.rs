//! Host networking: CNI options, reverse path filtering, VXLAN offload

use crate::calico::resources::EncapsulationMode;
use crate::config::charm::{CharmConfig, PoolCidr};
use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Command;

pub const IPIP_OVERHEAD: u32 = 20;
pub const VXLAN_OVERHEAD: u32 = 50;

pub const VXLAN_INTERFACE: &str = "vxlan.calico";

/// Pod interface MTU after encapsulation overhead. VXLAN takes precedence
/// over IPIP when both are configured.
pub fn effective_mtu(
    veth_mtu: Option<u32>,
    ipip: EncapsulationMode,
    vxlan: EncapsulationMode,
) -> Option<u32> {
    let mtu = veth_mtu?;
    if vxlan.is_enabled() {
        Some(mtu.saturating_sub(VXLAN_OVERHEAD))
    } else if ipip.is_enabled() {
        Some(mtu.saturating_sub(IPIP_OVERHEAD))
    } else {
        Some(mtu)
    }
}

pub fn ip_versions(cidrs: &[PoolCidr]) -> BTreeSet<u8> {
    cidrs.iter().map(|cidr| cidr.family.version()).collect()
}

/// Options handed to the CNI configuration template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CniOptions {
    pub kubeconfig_path: String,
    pub mtu: Option<u32>,
    pub assign_ipv4: String,
    pub assign_ipv6: String,
    #[serde(rename = "IP6")]
    pub ip6: String,
}

pub fn cni_options(config: &CharmConfig) -> CniOptions {
    let versions = ip_versions(&config.pools.cidrs);
    let has_v6 = versions.contains(&6);

    CniOptions {
        kubeconfig_path: "/opt/calicoctl/kubeconfig".to_string(),
        mtu: effective_mtu(config.veth_mtu, config.pools.ipip, config.pools.vxlan),
        assign_ipv4: versions.contains(&4).to_string(),
        assign_ipv6: has_v6.to_string(),
        ip6: if has_v6 { "autodetect" } else { "none" }.to_string(),
    }
}

/// Strict reverse path filtering (2) breaks Calico unless the operator has
/// told Felix to ignore it
pub fn rpf_conflict(rp_filter: u32, ignore_loose_rpf: bool) -> bool {
    rp_filter == 2 && !ignore_loose_rpf
}

/// The parts of the machine the charm touches outside the datastore
pub trait Host {
    fn rp_filter(&self) -> Result<u32>;

    fn run(&self, program: &str, args: &[&str]) -> Result<()>;
}

pub struct SystemHost {
    rp_filter_path: PathBuf,
}

impl SystemHost {
    pub fn new(rp_filter_path: impl Into<PathBuf>) -> Self {
        Self {
            rp_filter_path: rp_filter_path.into(),
        }
    }
}

impl Host for SystemHost {
    fn rp_filter(&self) -> Result<u32> {
        let contents = std::fs::read_to_string(&self.rp_filter_path)
            .with_context(|| format!("Failed to read {}", self.rp_filter_path.display()))?;
        contents.trim().parse().with_context(|| {
            format!(
                "Unexpected rp_filter value '{}' in {}",
                contents.trim(),
                self.rp_filter_path.display()
            )
        })
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<()> {
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("Failed to run {}", program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "{} {} failed: {}",
                program,
                args.join(" "),
                stderr.trim()
            ));
        }

        Ok(())
    }
}

/// Turn off TX checksum offload on the VXLAN device when VXLAN is in use
/// and the option asks for it. Returns whether ethtool was run.
pub fn disable_vxlan_tx_checksumming<H: Host>(host: &H, config: &CharmConfig) -> Result<bool> {
    if !config.disable_vxlan_tx_checksumming || !config.pools.vxlan.is_enabled() {
        return Ok(false);
    }

    host.run(
        "ethtool",
        &["-K", VXLAN_INTERFACE, "tx-checksum-ip-generic", "off"],
    )
    .inspect_err(|e| crate::log_error!("Couldn't disable tx checksumming: {:#}", e))?;

    crate::log_info!("Disabled VXLAN TX checksumming.");
    Ok(true)
}
