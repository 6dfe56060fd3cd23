//! Command implementations for the calico-charm CLI

pub mod check;
pub mod cni;
pub mod credentials;
pub mod hook;

use crate::charm::unit::UnitIdentity;
use crate::config::charm::ConfigValues;
use crate::utils::CharmError;
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Command;

/// Where the unit's identity and configuration come from
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    /// `config-get --format=yaml` output saved to a file; queried live when unset
    pub config: Option<PathBuf>,
    pub unit_name: Option<String>,
    pub hostname: Option<String>,
    pub bind_address: Option<String>,
}

impl HookContext {
    pub fn config_values(&self) -> Result<ConfigValues> {
        match &self.config {
            Some(path) => Ok(ConfigValues::load(path)?),
            None => {
                let output = juju_tool("config-get", &["--format=yaml"])?;
                Ok(ConfigValues::from_yaml_str(&output)?)
            }
        }
    }

    pub fn unit_identity(&self) -> Result<UnitIdentity> {
        let unit_name = self
            .unit_name
            .clone()
            .ok_or_else(CharmError::missing_unit_name)?;

        let hostname = match &self.hostname {
            Some(hostname) => hostname.clone(),
            None => hostname::get()
                .context("Failed to read hostname")?
                .to_string_lossy()
                .into_owned(),
        };

        let bind_address = match &self.bind_address {
            Some(address) => Some(address.clone()),
            None => discover_bind_address(),
        };

        Ok(UnitIdentity::new(
            unit_name,
            hostname,
            bind_address.as_deref(),
        )?)
    }
}

fn juju_tool(tool: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(tool)
        .args(args)
        .output()
        .with_context(|| format!("Failed to run {} (is this a Juju hook context?)", tool))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("{} failed: {}", tool, stderr.trim()));
    }

    Ok(String::from_utf8(output.stdout)?)
}

#[derive(Debug, Deserialize)]
struct NetworkInfo {
    #[serde(rename = "bind-addresses", default)]
    bind_addresses: Vec<BindAddress>,
}

#[derive(Debug, Deserialize)]
struct BindAddress {
    #[serde(rename = "interfacename", default)]
    interface_name: String,
    #[serde(default)]
    addresses: Vec<InterfaceAddress>,
}

#[derive(Debug, Deserialize)]
struct InterfaceAddress {
    address: String,
}

/// First address on the `cni` binding that is not on a fan interface
fn first_non_fan_address(network_get: &str) -> Option<String> {
    let info: NetworkInfo = serde_yaml::from_str(network_get).ok()?;
    info.bind_addresses
        .into_iter()
        .filter(|binding| !binding.interface_name.starts_with("fan-"))
        .find_map(|binding| binding.addresses.into_iter().next())
        .map(|address| address.address)
}

fn discover_bind_address() -> Option<String> {
    if which::which("network-get").is_err() {
        return None;
    }

    match juju_tool("network-get", &["cni", "--format=yaml"]) {
        Ok(output) => {
            let address = first_non_fan_address(&output);
            if address.is_none() {
                crate::log_warn!("Could not find a non-fan bind-address for cni");
            }
            address
        }
        Err(e) => {
            crate::log_warn!("{:#}", e);
            None
        }
    }
}
