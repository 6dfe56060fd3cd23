//! Hook dispatch: runs the pending reconciliation steps in order

use crate::calico::calicoctl::DatastoreClient;
use crate::calico::error::CalicoError;
use crate::calico::{Changes, bgp_globals, node, peers, pools};
use crate::charm::network::{self, Host};
use crate::charm::state::{CharmState, Step};
use crate::charm::status::{StatusReporter, UnitStatus};
use crate::charm::unit::UnitIdentity;
use crate::charm::{ReconcileError, Severity};
use crate::config::charm::{CharmConfig, ConfigValues};
use clap::ValueEnum;
use std::fmt;

pub const INVALID_CONFIG_MESSAGE: &str =
    "Invalid Config provided. Please check juju debug-log for more info.";
pub const RPF_CONFLICT_MESSAGE: &str =
    "ignore-loose-rpf config is in conflict with rp_filter value";
pub const ENCAPSULATION_CONFLICT_HINT: &str = "ipip and vxlan cannot both be enabled";
pub const READY_MESSAGE: &str = "Ready";

/// Juju hooks the charm handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Hook {
    Install,
    ConfigChanged,
    UpgradeCharm,
    UpdateStatus,
    EtcdRelationChanged,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Hook::Install => "install",
            Hook::ConfigChanged => "config-changed",
            Hook::UpgradeCharm => "upgrade-charm",
            Hook::UpdateStatus => "update-status",
            Hook::EtcdRelationChanged => "etcd-relation-changed",
        };
        write!(f, "{}", name)
    }
}

fn activity(step: Step) -> &'static str {
    match step {
        Step::Pools => "Configuring Calico IP pool",
        Step::Node => "Configuring Calico node",
        Step::BgpGlobals => "Configuring BGP globals",
        Step::BgpPeers => "Configuring BGP peers",
        Step::VxlanChecksum => "Disabling VXLAN TX checksumming",
    }
}

/// Status shown while `step` waits for the next hook
pub fn retry_status(step: Step, config: Option<&CharmConfig>) -> UnitStatus {
    let mut message = format!("Waiting to retry {}", step.description());
    if step == Step::Pools && config.is_some_and(CharmConfig::encapsulation_conflict) {
        message = format!("{} ({})", message, ENCAPSULATION_CONFLICT_HINT);
    }
    UnitStatus::waiting(message)
}

/// Status for a pass that stopped on `err`
pub fn failure_status(err: &ReconcileError, config: &CharmConfig) -> UnitStatus {
    match (err.severity(), err.step()) {
        (Severity::Transient, Some(step)) => retry_status(step, Some(config)),
        _ => UnitStatus::blocked(INVALID_CONFIG_MESSAGE),
    }
}

/// Everything a pass needs from the outside world
pub struct Orchestrator<'a, C, H, R> {
    pub client: &'a C,
    pub host: &'a H,
    pub reporter: &'a R,
    pub unit: &'a UnitIdentity,
}

impl<'a, C, H, R> Orchestrator<'a, C, H, R>
where
    C: DatastoreClient,
    H: Host,
    R: StatusReporter,
{
    pub fn new(client: &'a C, host: &'a H, reporter: &'a R, unit: &'a UnitIdentity) -> Self {
        Self {
            client,
            host,
            reporter,
            unit,
        }
    }

    /// Handle one hook invocation and report the resulting status.
    ///
    /// The caller owns loading and saving `state`.
    pub fn handle(&self, hook: Hook, state: &mut CharmState, values: &ConfigValues) -> UnitStatus {
        crate::log_info!("Handling {} hook for {}", hook, self.unit.unit_name);

        let status = match hook {
            Hook::UpdateStatus => self.current_status(state, values),
            Hook::UpgradeCharm => {
                state.reset_all();
                self.run_pass(state, values)
            }
            Hook::Install | Hook::ConfigChanged | Hook::EtcdRelationChanged => {
                self.run_pass(state, values)
            }
        };

        self.report(&status);
        status
    }

    /// Run every pending step in order, stopping at the first failure
    pub fn run_pass(&self, state: &mut CharmState, values: &ConfigValues) -> UnitStatus {
        state.observe_config(values);
        state.observe_identity(self.unit);

        let config = match values.parse() {
            Ok(config) => config,
            Err(e) => {
                let err = ReconcileError::from(e);
                crate::log_error!("{}", err);
                return UnitStatus::blocked(INVALID_CONFIG_MESSAGE);
            }
        };

        for step in state.pending_steps() {
            self.report(&UnitStatus::maintenance(activity(step)));

            match self.run_step(step, &config) {
                Ok(changes) => {
                    crate::log_debug!("{} done: {:?}", step, changes);
                    state.mark_applied(step);
                }
                Err(e) => {
                    crate::log_error!("{}", e);
                    return failure_status(&e, &config);
                }
            }
        }

        self.final_status(&config)
    }

    fn run_step(&self, step: Step, config: &CharmConfig) -> Result<Changes, ReconcileError> {
        let datastore = |source: CalicoError| ReconcileError::Datastore { step, source };

        match step {
            Step::Pools => pools::reconcile(self.client, &config.pools).map_err(datastore),
            Step::Node => node::reconcile(self.client, &config.node, self.unit).map_err(datastore),
            Step::BgpGlobals => bgp_globals::reconcile(self.client, &config.bgp).map_err(datastore),
            Step::BgpPeers => {
                peers::reconcile(self.client, &config.peers, self.unit).map_err(datastore)
            }
            Step::VxlanChecksum => network::disable_vxlan_tx_checksumming(self.host, config)
                .map(|ran| if ran { Changes::default() } else { Changes::skipped() })
                .map_err(|source| ReconcileError::Host { step, source }),
        }
    }

    /// Status without touching the datastore
    pub fn current_status(&self, state: &CharmState, values: &ConfigValues) -> UnitStatus {
        let config = match values.parse() {
            Ok(config) => config,
            Err(e) => {
                crate::log_error!("{}", ReconcileError::from(e));
                return UnitStatus::blocked(INVALID_CONFIG_MESSAGE);
            }
        };

        match state.pending_steps().first() {
            Some(step) => retry_status(*step, Some(&config)),
            None => self.final_status(&config),
        }
    }

    fn final_status(&self, config: &CharmConfig) -> UnitStatus {
        match self.host.rp_filter() {
            Ok(rp_filter) if network::rpf_conflict(rp_filter, config.ignore_loose_rpf) => {
                UnitStatus::blocked(RPF_CONFLICT_MESSAGE)
            }
            Ok(_) => UnitStatus::active(READY_MESSAGE),
            Err(e) => {
                crate::log_warn!("Could not check rp_filter: {:#}", e);
                UnitStatus::active(READY_MESSAGE)
            }
        }
    }

    fn report(&self, status: &UnitStatus) {
        if let Err(e) = self.reporter.set_status(status) {
            crate::log_warn!("Failed to set status: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calico::fake::{Call, FakeDatastore};
    use crate::charm::network::tests::FakeHost;
    use crate::charm::state::Phase;
    use crate::charm::status::StatusKind;
    use crate::charm::status::tests::RecordingStatus;
    use crate::config::charm::ConfigError;

    const NODE: &str = r#"
apiVersion: projectcalico.org/v3
kind: Node
metadata:
  name: worker-0
spec:
  bgp:
    ipv4Address: 10.0.0.5/24
"#;

    struct Harness {
        datastore: FakeDatastore,
        host: FakeHost,
        reporter: RecordingStatus,
        unit: UnitIdentity,
    }

    impl Harness {
        fn new() -> Self {
            let datastore = FakeDatastore::new();
            datastore.seed(NODE);
            Self {
                datastore,
                host: FakeHost::default(),
                reporter: RecordingStatus::default(),
                unit: UnitIdentity::new("calico/0", "worker-0", Some("10.0.0.5")).unwrap(),
            }
        }

        fn handle(&self, hook: Hook, state: &mut CharmState, yaml: &str) -> UnitStatus {
            let values = ConfigValues::from_yaml_str(yaml).unwrap();
            Orchestrator::new(&self.datastore, &self.host, &self.reporter, &self.unit)
                .handle(hook, state, &values)
        }
    }

    #[test]
    fn test_failure_status() {
        let config = CharmConfig::default();

        let err = ReconcileError::Datastore {
            step: Step::BgpPeers,
            source: CalicoError::Timeout {
                command: "calicoctl get bgppeers".to_string(),
                timeout: std::time::Duration::from_secs(60),
            },
        };
        assert_eq!(
            failure_status(&err, &config),
            UnitStatus::waiting("Waiting to retry BGP peer configuration")
        );

        let err = ReconcileError::from(ConfigError::UnitName("calico".to_string()));
        assert_eq!(
            failure_status(&err, &config),
            UnitStatus::blocked(INVALID_CONFIG_MESSAGE)
        );
    }

    #[test]
    fn test_full_pass() {
        let harness = Harness::new();
        let mut state = CharmState::default();

        let status = harness.handle(
            Hook::ConfigChanged,
            &mut state,
            "global-bgp-peers: \"[{address: 10.0.0.1, as-number: 65000}]\"\n",
        );

        assert_eq!(status, UnitStatus::active(READY_MESSAGE));
        assert!(state.is_complete());
        assert_eq!(
            harness.datastore.writes(),
            vec![
                Call::Apply("IPPool".into(), "ipv4".into()),
                Call::Apply("Node".into(), "worker-0".into()),
                Call::Apply("BGPConfiguration".into(), "default".into()),
                Call::Apply("BGPPeer".into(), "calico-0-10.0.0.1-65000".into()),
            ]
        );
        assert_eq!(harness.reporter.last(), Some(status));
    }

    #[test]
    fn test_failure_stops_the_pass() {
        let harness = Harness::new();
        harness.datastore.fail_apply("worker-0");
        let mut state = CharmState::default();

        let status = harness.handle(Hook::Install, &mut state, "{}");

        assert_eq!(
            status,
            UnitStatus::waiting("Waiting to retry Calico node configuration")
        );
        assert_eq!(state.phase(Step::Pools), Phase::Applied);
        assert_eq!(state.pending_steps()[0], Step::Node);
        assert!(harness.datastore.stored("BGPConfiguration", "default").is_none());
    }

    #[test]
    fn test_retry_runs_only_pending_steps() {
        let harness = Harness::new();
        harness.datastore.fail_apply("worker-0");
        let mut state = CharmState::default();
        harness.handle(Hook::Install, &mut state, "{}");

        let harness = Harness {
            datastore: FakeDatastore::new(),
            ..Harness::new()
        };
        harness.datastore.seed(NODE);
        let status = harness.handle(Hook::ConfigChanged, &mut state, "{}");

        assert_eq!(status.kind, StatusKind::Active);
        assert!(
            !harness
                .datastore
                .writes()
                .contains(&Call::Apply("IPPool".into(), "ipv4".into()))
        );
    }

    #[test]
    fn test_config_change_reruns_affected_step() {
        let harness = Harness::new();
        let mut state = CharmState::default();
        harness.handle(Hook::ConfigChanged, &mut state, "global-as-number: 64512\n");
        harness.datastore.clear_calls();

        harness.handle(Hook::ConfigChanged, &mut state, "global-as-number: 65001\n");

        assert_eq!(
            harness.datastore.writes(),
            vec![Call::Apply("BGPConfiguration".into(), "default".into())]
        );
    }

    #[test]
    fn test_invalid_config_blocks() {
        let harness = Harness::new();
        let mut state = CharmState::default();

        let status = harness.handle(
            Hook::ConfigChanged,
            &mut state,
            "unit-bgp-peers: \"{0: [{address: \"\n",
        );

        assert_eq!(status, UnitStatus::blocked(INVALID_CONFIG_MESSAGE));
        assert!(harness.datastore.calls().is_empty());
    }

    #[test]
    fn test_encapsulation_conflict_hint() {
        let harness = Harness::new();
        harness.datastore.fail_apply("ipv4");
        let mut state = CharmState::default();

        let status = harness.handle(Hook::ConfigChanged, &mut state, "ipip: Always\nvxlan: Always\n");

        assert_eq!(status.kind, StatusKind::Waiting);
        assert_eq!(
            status.message,
            "Waiting to retry calico pool configuration (ipip and vxlan cannot both be enabled)"
        );
    }

    #[test]
    fn test_rpf_conflict_blocks() {
        let harness = Harness {
            host: FakeHost {
                rp_filter: 2,
                ..FakeHost::default()
            },
            ..Harness::new()
        };
        let mut state = CharmState::default();

        let status = harness.handle(Hook::ConfigChanged, &mut state, "{}");
        assert_eq!(status, UnitStatus::blocked(RPF_CONFLICT_MESSAGE));
        assert!(state.is_complete());

        let status = harness.handle(Hook::UpdateStatus, &mut state, "ignore-loose-rpf: true\n");
        assert_eq!(status, UnitStatus::active(READY_MESSAGE));
    }

    #[test]
    fn test_vxlan_checksum_step() {
        let harness = Harness::new();
        let mut state = CharmState::default();

        harness.handle(Hook::ConfigChanged, &mut state, "vxlan: Always\n");

        assert_eq!(
            *harness.host.commands.borrow(),
            vec!["ethtool -K vxlan.calico tx-checksum-ip-generic off"]
        );
    }

    #[test]
    fn test_update_status_does_not_reconcile() {
        let harness = Harness::new();
        let mut state = CharmState::default();

        let status = harness.handle(Hook::UpdateStatus, &mut state, "{}");

        assert_eq!(
            status,
            UnitStatus::waiting("Waiting to retry calico pool configuration")
        );
        assert!(harness.datastore.calls().is_empty());
    }

    #[test]
    fn test_upgrade_reruns_everything() {
        let harness = Harness::new();
        let mut state = CharmState::default();
        harness.handle(Hook::Install, &mut state, "{}");
        harness.datastore.clear_calls();

        harness.handle(Hook::UpgradeCharm, &mut state, "{}");

        assert_eq!(harness.datastore.writes().len(), 3);
        assert!(state.is_complete());
    }
}
