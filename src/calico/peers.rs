//! Reconciliation of the BGP peers owned by this unit
//!
//! Peers come from three scopes: global, subnet (matched against the unit's
//! bind address) and unit. Every peer gets a name derived from the unit, the
//! peer address and the AS number, and a unit only ever deletes peers whose
//! name starts with its own prefix.

use crate::calico::Changes;
use crate::calico::calicoctl::DatastoreClient;
use crate::calico::error::CalicoError;
use crate::calico::resources::{BgpPeer, BgpPeerSpec, ObjectRef, kind, sanitize_name};
use crate::charm::unit::UnitIdentity;
use crate::config::charm::{PeerConfig, PeerSpec};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

/// Lowercase RFC 1123 subdomain, which Calico requires of resource names
static RESOURCE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("resource name pattern is valid")
});

/// `{unit}-{address}-{as}`, with unit and address sanitized
pub fn peer_name(unit: &UnitIdentity, peer: &PeerSpec) -> String {
    format!(
        "{}-{}-{}",
        unit.safe_unit_name(),
        sanitize_name(&peer.address),
        peer.as_number
    )
}

pub fn is_valid_resource_name(name: &str) -> bool {
    name.len() <= 253 && RESOURCE_NAME.is_match(name)
}

/// Peers that apply to this unit: global, then every matching subnet from
/// most to least specific, then the unit's own list
pub fn merge_peers<'a>(config: &'a PeerConfig, unit: &UnitIdentity) -> Vec<&'a PeerSpec> {
    let subnet = config
        .subnet
        .matching(unit.bind_address)
        .into_iter()
        .flat_map(|(_, peers)| peers.iter());
    let unit_peers = config.unit.get(&unit.unit_id).into_iter().flatten();

    config.global.iter().chain(subnet).chain(unit_peers).collect()
}

/// Desired BGPPeer resources keyed by generated name.
///
/// Two entries with the same address and AS number collapse into one: the
/// name keeps its first position and the later entry's resource.
pub fn desired_peers(config: &PeerConfig, unit: &UnitIdentity) -> Vec<BgpPeer> {
    let mut peers: Vec<BgpPeer> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for peer in merge_peers(config, unit) {
        let name = peer_name(unit, peer);
        let resource = BgpPeer::new(
            "BGPPeer",
            name.clone(),
            BgpPeerSpec {
                node: unit.hostname.clone(),
                peer_ip: peer.address.clone(),
                as_number: peer.as_number,
                ..BgpPeerSpec::default()
            },
        );

        match positions.get(&name) {
            Some(&index) => peers[index] = resource,
            None => {
                positions.insert(name, peers.len());
                peers.push(resource);
            }
        }
    }

    peers
}

/// Names among `existing` that this unit created and no longer wants
pub fn owned_stale_peers<'a>(
    existing: &'a [ObjectRef],
    desired: &[BgpPeer],
    unit: &UnitIdentity,
) -> Vec<&'a str> {
    let prefix = format!("{}-", unit.safe_unit_name());
    let wanted: BTreeSet<&str> = desired.iter().map(|peer| peer.name()).collect();

    existing
        .iter()
        .map(|peer| peer.metadata.name.as_str())
        .filter(|name| name.starts_with(&prefix) && !wanted.contains(name))
        .collect()
}

/// Apply every desired peer, then delete owned peers that are no longer
/// desired. A failure part way leaves earlier applies in place; the next
/// pass converges.
pub fn reconcile<C: DatastoreClient>(
    client: &C,
    config: &PeerConfig,
    unit: &UnitIdentity,
) -> Result<Changes, CalicoError> {
    let desired = desired_peers(config, unit);
    let mut changes = Changes::default();

    for peer in &desired {
        if !is_valid_resource_name(peer.name()) {
            crate::log_warn!(
                "BGP peer name '{}' is not a valid resource name; calicoctl may reject it",
                peer.name()
            );
        }

        client.apply_resource(peer).inspect_err(|e| {
            crate::log_error!("Failed to apply BGP peer {}: {}", peer.name(), e);
        })?;
        crate::log_info!(
            "Applied BGP peer {} ({} AS {}).",
            peer.name(),
            peer.spec.peer_ip,
            peer.spec.as_number
        );
        changes.applied.push(peer.name().to_string());
    }

    let existing: Vec<ObjectRef> = client.list(kind::BGP_PEERS).inspect_err(|e| {
        crate::log_error!("Failed to get BGP peers: {}", e);
    })?;

    for name in owned_stale_peers(&existing, &desired, unit) {
        client.delete(kind::BGP_PEER, name, true).inspect_err(|e| {
            crate::log_error!("Failed to delete BGP peer {}: {}", name, e);
        })?;
        crate::log_info!("Deleted BGP peer {}.", name);
        changes.deleted.push(name.to_string());
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calico::fake::{Call, FakeDatastore};
    use crate::config::charm::ConfigValues;
    use rstest::rstest;

    fn peers(yaml: &str) -> PeerConfig {
        ConfigValues::from_yaml_str(yaml).unwrap().parse().unwrap().peers
    }

    fn unit(name: &str, bind_address: &str) -> UnitIdentity {
        UnitIdentity::new(name, "worker-0", Some(bind_address)).unwrap()
    }

    fn seed_peer(datastore: &FakeDatastore, name: &str) {
        datastore.seed(&format!(
            "apiVersion: projectcalico.org/v3\nkind: BGPPeer\nmetadata:\n  name: {name}\nspec:\n  node: worker-0\n  peerIP: 10.0.0.9\n  asNumber: 65001\n"
        ));
    }

    #[rstest(
        address,
        as_number,
        expected,
        case("10.0.0.1", 65000, "calico-0-10.0.0.1-65000"),
        case("2001:db8::1", 65000, "calico-0-2001-db8--1-65000"),
        case("2001:DB8::A", 64512, "calico-0-2001-db8--a-64512")
    )]
    fn test_peer_name(address: &str, as_number: u32, expected: &str) {
        let peer = PeerSpec {
            address: address.to_string(),
            as_number,
        };
        let name = peer_name(&unit("calico/0", "10.0.0.5"), &peer);
        assert_eq!(name, expected);
        assert!(is_valid_resource_name(&name));
    }

    #[test]
    fn test_merge_order() {
        let config = peers(
            r#"
global-bgp-peers: "[{address: 10.0.0.1, as-number: 65000}]"
subnet-bgp-peers: "{10.0.0.0/16: [{address: 10.0.0.2, as-number: 65001}], 10.0.0.0/24: [{address: 10.0.0.3, as-number: 65002}], 10.9.0.0/16: [{address: 10.9.0.1, as-number: 65009}]}"
unit-bgp-peers: "{0: [{address: 10.0.0.4, as-number: 65003}], 1: [{address: 10.0.0.5, as-number: 65004}]}"
"#,
        );
        let merged: Vec<&str> = merge_peers(&config, &unit("calico/0", "10.0.0.7"))
            .into_iter()
            .map(|peer| peer.address.as_str())
            .collect();
        assert_eq!(merged, vec!["10.0.0.1", "10.0.0.3", "10.0.0.2", "10.0.0.4"]);
    }

    #[test]
    fn test_duplicate_peers_collapse() {
        let config = peers(
            r#"
global-bgp-peers: "[{address: 10.0.0.1, as-number: 65000}, {address: 10.0.0.2, as-number: 65000}]"
unit-bgp-peers: "{0: [{address: 10.0.0.1, as-number: 65000}]}"
"#,
        );
        let names: Vec<String> = desired_peers(&config, &unit("calico/0", "10.0.0.7"))
            .iter()
            .map(|peer| peer.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["calico-0-10.0.0.1-65000", "calico-0-10.0.0.2-65000"]
        );
    }

    #[test]
    fn test_name_collision_keeps_last_resource() {
        let config = peers(
            r#"
global-bgp-peers: "[{address: '2001:DB8::1', as-number: 65000}, {address: 10.0.0.2, as-number: 65000}]"
unit-bgp-peers: "{0: [{address: '2001:db8::1', as-number: 65000}]}"
"#,
        );
        let desired = desired_peers(&config, &unit("calico/0", "10.0.0.7"));

        assert_eq!(desired.len(), 2);
        assert_eq!(desired[0].name(), "calico-0-2001-db8--1-65000");
        assert_eq!(desired[0].spec.peer_ip, "2001:db8::1");
        assert_eq!(desired[1].spec.peer_ip, "10.0.0.2");
    }

    #[test]
    fn test_configure_peers() {
        let datastore = FakeDatastore::new();
        let config = peers(r#"global-bgp-peers: "[{address: 10.0.0.1, as-number: 65000}]""#);

        let changes = reconcile(&datastore, &config, &unit("calico/0", "10.0.0.7")).unwrap();

        assert_eq!(changes.applied, vec!["calico-0-10.0.0.1-65000"]);
        let peer = datastore.stored("BGPPeer", "calico-0-10.0.0.1-65000").unwrap();
        assert_eq!(peer["spec"]["node"], "worker-0");
        assert_eq!(peer["spec"]["peerIP"], "10.0.0.1");
        assert_eq!(peer["spec"]["asNumber"].as_u64(), Some(65000));
    }

    #[test]
    fn test_removed_peer_is_deleted() {
        let datastore = FakeDatastore::new();
        seed_peer(&datastore, "calico-0-10.20.0.1-65000");
        let config = peers(r#"global-bgp-peers: "[{address: 10.0.0.1, as-number: 65000}]""#);

        let changes = reconcile(&datastore, &config, &unit("calico/0", "10.0.0.7")).unwrap();

        assert_eq!(changes.deleted, vec!["calico-0-10.20.0.1-65000"]);
        assert_eq!(
            datastore.writes(),
            vec![
                Call::Apply("BGPPeer".into(), "calico-0-10.0.0.1-65000".into()),
                Call::Delete("bgppeer".into(), "calico-0-10.20.0.1-65000".into()),
            ]
        );
    }

    #[test]
    fn test_other_peers_are_never_deleted() {
        let datastore = FakeDatastore::new();
        seed_peer(&datastore, "otherunit-10.0.0.9-65001");
        seed_peer(&datastore, "calico-1-10.0.0.9-65001");
        seed_peer(&datastore, "calico-10-10.0.0.9-65001");
        seed_peer(&datastore, "manual-peer");

        let changes = reconcile(&datastore, &PeerConfig::default(), &unit("calico/0", "10.0.0.7"))
            .unwrap();

        assert!(changes.deleted.is_empty());
        assert!(datastore.writes().is_empty());
    }

    #[test]
    fn test_second_pass_only_reapplies() {
        let datastore = FakeDatastore::new();
        seed_peer(&datastore, "calico-0-10.20.0.1-65000");
        let config = peers(r#"global-bgp-peers: "[{address: 10.0.0.1, as-number: 65000}]""#);
        let unit = unit("calico/0", "10.0.0.7");

        reconcile(&datastore, &config, &unit).unwrap();
        datastore.clear_calls();
        reconcile(&datastore, &config, &unit).unwrap();

        assert_eq!(
            datastore.writes(),
            vec![Call::Apply("BGPPeer".into(), "calico-0-10.0.0.1-65000".into())]
        );
    }

    #[test]
    fn test_apply_failure_skips_deletes() {
        let datastore = FakeDatastore::new();
        seed_peer(&datastore, "calico-0-10.20.0.1-65000");
        datastore.fail_apply("calico-0-10.0.0.1-65000");
        let config = peers(r#"global-bgp-peers: "[{address: 10.0.0.1, as-number: 65000}]""#);

        assert!(reconcile(&datastore, &config, &unit("calico/0", "10.0.0.7")).is_err());
        assert!(datastore.stored("BGPPeer", "calico-0-10.20.0.1-65000").is_some());
    }

    #[test]
    fn test_subnet_peers_need_a_bind_address() {
        let config = peers(
            r#"subnet-bgp-peers: "{10.0.0.0/24: [{address: 10.0.0.254, as-number: 65010}]}""#,
        );
        let unit = UnitIdentity::new("calico/0", "worker-0", None).unwrap();
        assert!(desired_peers(&config, &unit).is_empty());
    }
}
