//! Reconciliation of this unit's Calico Node resource

use crate::calico::Changes;
use crate::calico::calicoctl::DatastoreClient;
use crate::calico::error::CalicoError;
use crate::calico::resources::{CalicoNode, kind};
use crate::charm::unit::UnitIdentity;
use crate::config::charm::NodeOverrides;

/// AS number for this unit: a unit-scoped override wins outright, then the
/// most specific subnet containing the bind address. `None` leaves the node
/// on the global AS number.
pub fn resolve_as_number(overrides: &NodeOverrides, unit: &UnitIdentity) -> Option<u32> {
    if let Some(as_number) = overrides.unit_as_numbers.get(&unit.unit_id) {
        return Some(*as_number);
    }

    overrides
        .subnet_as_numbers
        .most_specific(unit.bind_address)
        .copied()
}

pub fn route_reflector_cluster_id(
    overrides: &NodeOverrides,
    unit: &UnitIdentity,
) -> Option<String> {
    overrides
        .route_reflector_cluster_ids
        .get(&unit.unit_id)
        .cloned()
}

/// Patch the node's BGP AS number and route reflector cluster ID.
///
/// The Node is created by calico-node itself, so a missing Node is an error
/// rather than something to create.
pub fn reconcile<C: DatastoreClient>(
    client: &C,
    overrides: &NodeOverrides,
    unit: &UnitIdentity,
) -> Result<Changes, CalicoError> {
    let as_number = resolve_as_number(overrides, unit);
    let cluster_id = route_reflector_cluster_id(overrides, unit);

    let mut node: CalicoNode = client.fetch(kind::NODE, &unit.hostname).inspect_err(|e| {
        crate::log_error!("Failed to configure node: {}", e);
    })?;

    let bgp = node.spec.bgp.as_mut().ok_or_else(|| CalicoError::Malformed {
        kind: "Node".to_string(),
        reason: format!("{} has no BGP spec", unit.hostname),
    })?;
    bgp.as_number = as_number;
    bgp.route_reflector_cluster_id = cluster_id;

    client.apply_resource(&node).inspect_err(|e| {
        crate::log_error!("Failed to configure node: {}", e);
    })?;

    crate::log_info!(
        "Configured Calico node {} (asNumber: {:?}).",
        unit.hostname,
        as_number
    );
    Ok(Changes::applied([node.metadata.name]))
}
