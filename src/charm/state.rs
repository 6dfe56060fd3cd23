//! Persisted reconciliation progress for this unit
//!
//! Each reconciled resource type has a phase. A pass runs the steps still
//! `Pending` and marks them `Applied`; configuration and identity changes push
//! the affected steps back to `Pending`.

use crate::charm::unit::UnitIdentity;
use crate::config::charm::ConfigValues;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    Pools,
    Node,
    BgpGlobals,
    BgpPeers,
    VxlanChecksum,
}

impl Step {
    /// Steps in the order a pass runs them
    pub const ALL: [Step; 5] = [
        Step::Pools,
        Step::Node,
        Step::BgpGlobals,
        Step::BgpPeers,
        Step::VxlanChecksum,
    ];

    /// Config keys whose change means the step must run again
    pub fn watched_keys(self) -> &'static [&'static str] {
        match self {
            Step::Pools => &["cidr", "manage-pools", "ipip", "vxlan", "nat-outgoing"],
            Step::Node => &[
                "unit-as-numbers",
                "subnet-as-numbers",
                "route-reflector-cluster-ids",
            ],
            Step::BgpGlobals => &[
                "global-as-number",
                "node-to-node-mesh",
                "bgp-service-cluster-ips",
                "bgp-service-external-ips",
                "bgp-service-loadbalancer-ips",
            ],
            Step::BgpPeers => &["global-bgp-peers", "subnet-bgp-peers", "unit-bgp-peers"],
            Step::VxlanChecksum => &["vxlan", "disable-vxlan-tx-checksumming"],
        }
    }

    /// Used in "Waiting to retry ..." status messages
    pub fn description(self) -> &'static str {
        match self {
            Step::Pools => "calico pool configuration",
            Step::Node => "Calico node configuration",
            Step::BgpGlobals => "BGP global configuration",
            Step::BgpPeers => "BGP peer configuration",
            Step::VxlanChecksum => "VXLAN TX checksum configuration",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Pools => "pools",
            Step::Node => "node",
            Step::BgpGlobals => "bgp-globals",
            Step::BgpPeers => "bgp-peers",
            Step::VxlanChecksum => "vxlan-checksum",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Pending,
    Applied,
}

/// One phase per step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StepFlags {
    pub pools: Phase,
    pub node: Phase,
    pub bgp_globals: Phase,
    pub bgp_peers: Phase,
    pub vxlan_checksum: Phase,
}

impl StepFlags {
    fn slot(&mut self, step: Step) -> &mut Phase {
        match step {
            Step::Pools => &mut self.pools,
            Step::Node => &mut self.node,
            Step::BgpGlobals => &mut self.bgp_globals,
            Step::BgpPeers => &mut self.bgp_peers,
            Step::VxlanChecksum => &mut self.vxlan_checksum,
        }
    }

    pub fn get(&self, step: Step) -> Phase {
        match step {
            Step::Pools => self.pools,
            Step::Node => self.node,
            Step::BgpGlobals => self.bgp_globals,
            Step::BgpPeers => self.bgp_peers,
            Step::VxlanChecksum => self.vxlan_checksum,
        }
    }

    pub fn set(&mut self, step: Step, phase: Phase) {
        *self.slot(step) = phase;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharmState {
    #[serde(default)]
    pub steps: StepFlags,

    /// Configuration seen by the last pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_config: Option<ConfigValues>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_identity: Option<UnitIdentity>,
}

impl CharmState {
    /// Load state, starting fresh when the file is missing or unreadable
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            crate::log_debug!("No state at {}; starting fresh", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;

        match serde_json::from_str(&contents) {
            Ok(state) => Ok(state),
            Err(e) => {
                crate::log_warn!(
                    "Discarding corrupt state file {}: {}; every step will run again",
                    path.display(),
                    e
                );
                Ok(Self::default())
            }
        }
    }

    /// Write state through a temporary file in the same directory, then rename
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        let mut file = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;
        file.persist(path)
            .with_context(|| format!("Failed to write state file: {}", path.display()))?;
        Ok(())
    }

    pub fn phase(&self, step: Step) -> Phase {
        self.steps.get(step)
    }

    pub fn mark_applied(&mut self, step: Step) {
        self.steps.set(step, Phase::Applied);
    }

    pub fn reset(&mut self, step: Step) {
        self.steps.set(step, Phase::Pending);
    }

    pub fn reset_all(&mut self) {
        self.steps = StepFlags::default();
    }

    pub fn pending_steps(&self) -> Vec<Step> {
        Step::ALL
            .into_iter()
            .filter(|step| self.phase(*step) == Phase::Pending)
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.pending_steps().is_empty()
    }

    /// Reset every step whose watched keys changed since the last pass.
    /// With no previous configuration every step is reset.
    pub fn observe_config(&mut self, config: &ConfigValues) -> Vec<Step> {
        let changed: Vec<Step> = match &self.last_config {
            None => Step::ALL.to_vec(),
            Some(last) => Step::ALL
                .into_iter()
                .filter(|step| {
                    step.watched_keys()
                        .iter()
                        .any(|key| last.get(key) != config.get(key))
                })
                .collect(),
        };

        for step in &changed {
            crate::log_debug!("Configuration for {} changed", step);
            self.reset(*step);
        }
        self.last_config = Some(config.clone());
        changed
    }

    /// Reset the unit-scoped steps when hostname, unit or bind address
    /// differ from the last pass. Returns whether anything was reset.
    pub fn observe_identity(&mut self, unit: &UnitIdentity) -> bool {
        let changed = self.last_identity.as_ref() != Some(unit);
        if changed {
            self.reset(Step::Node);
            self.reset(Step::BgpPeers);
            self.last_identity = Some(unit.clone());
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(yaml: &str) -> ConfigValues {
        ConfigValues::from_yaml_str(yaml).unwrap()
    }

    fn all_applied() -> CharmState {
        let mut state = CharmState::default();
        for step in Step::ALL {
            state.mark_applied(step);
        }
        state
    }

    #[test]
    fn test_fresh_state_is_pending() {
        let state = CharmState::default();
        assert_eq!(state.pending_steps(), Step::ALL.to_vec());
        assert!(!state.is_complete());
        assert!(all_applied().is_complete());
    }

    #[test]
    fn test_first_config_resets_everything() {
        let mut state = all_applied();
        let changed = state.observe_config(&values("cidr: 10.0.0.0/16\n"));
        assert_eq!(changed, Step::ALL.to_vec());
    }

    #[test]
    fn test_config_change_resets_watching_steps() {
        let mut state = all_applied();
        state.last_config = Some(values("vxlan: Never\nglobal-as-number: 64512\n"));

        let changed = state.observe_config(&values("vxlan: Always\nglobal-as-number: 64512\n"));

        assert_eq!(changed, vec![Step::Pools, Step::VxlanChecksum]);
        assert_eq!(state.phase(Step::Pools), Phase::Pending);
        assert_eq!(state.phase(Step::BgpGlobals), Phase::Applied);
        assert_eq!(state.phase(Step::Node), Phase::Applied);
    }

    #[test]
    fn test_unwatched_key_changes_nothing() {
        let mut state = all_applied();
        state.last_config = Some(values("veth-mtu: 1500\n"));
        assert!(state.observe_config(&values("veth-mtu: 9000\n")).is_empty());
        assert!(state.is_complete());
    }

    #[test]
    fn test_identity_change_resets_unit_steps() {
        let unit = UnitIdentity::new("calico/0", "worker-0", Some("10.0.0.5")).unwrap();
        let mut state = all_applied();
        state.last_identity = Some(unit.clone());
        assert!(!state.observe_identity(&unit));

        let moved = UnitIdentity::new("calico/0", "worker-0", Some("10.0.1.5")).unwrap();
        assert!(state.observe_identity(&moved));
        assert_eq!(state.pending_steps(), vec![Step::Node, Step::BgpPeers]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        let mut state = CharmState::default();
        state.mark_applied(Step::BgpGlobals);
        state.observe_config(&values("cidr: 10.0.0.0/16\n"));
        state.mark_applied(Step::Pools);

        state.save(&path).unwrap();
        let loaded = CharmState::load(&path).unwrap();

        assert_eq!(loaded, state);
        assert_eq!(loaded.phase(Step::Pools), Phase::Applied);
        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"pools\": \"applied\""));
    }

    #[test]
    fn test_missing_and_corrupt_files_start_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        assert_eq!(CharmState::load(&path).unwrap(), CharmState::default());

        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(CharmState::load(&path).unwrap(), CharmState::default());
    }
}
