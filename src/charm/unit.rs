//! Identity of the local unit

use crate::calico::resources::sanitize_name;
use crate::config::charm::ConfigError;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitIdentity {
    /// Juju unit name, e.g. `calico/0`
    pub unit_name: String,
    pub unit_id: u32,
    /// Name of the Calico Node resource for this machine
    pub hostname: String,
    /// Address bound to the `cni` endpoint, if Juju gave a usable one
    pub bind_address: Option<IpAddr>,
}

impl UnitIdentity {
    pub fn new(
        unit_name: impl Into<String>,
        hostname: impl Into<String>,
        bind_address: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let unit_name = unit_name.into();
        let unit_id = parse_unit_id(&unit_name)?;

        let bind_address = bind_address.and_then(|address| {
            let parsed = IpAddr::from_str(address.trim()).ok();
            if parsed.is_none() {
                crate::log_warn!(
                    "Ignoring unparseable bind address '{}'; subnet-scoped options will not match",
                    address
                );
            }
            parsed
        });

        Ok(Self {
            unit_name,
            unit_id,
            hostname: hostname.into(),
            bind_address,
        })
    }

    /// Unit name usable as a resource name prefix, e.g. `calico-0`
    pub fn safe_unit_name(&self) -> String {
        sanitize_name(&self.unit_name)
    }
}

fn parse_unit_id(unit_name: &str) -> Result<u32, ConfigError> {
    unit_name
        .split_once('/')
        .and_then(|(app, id)| if app.is_empty() { None } else { id.parse().ok() })
        .ok_or_else(|| ConfigError::UnitName(unit_name.to_string()))
}
