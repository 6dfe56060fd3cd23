//! Reconciliation of the IP pools, one per configured address family

use crate::calico::Changes;
use crate::calico::calicoctl::DatastoreClient;
use crate::calico::error::CalicoError;
use crate::calico::resources::{IpPool, IpPoolSpec, kind};
use crate::config::charm::PoolConfig;
use std::collections::BTreeSet;

/// IPPool resources the configuration asks for, in `cidr` order
pub fn desired_pools(config: &PoolConfig) -> Vec<IpPool> {
    config
        .cidrs
        .iter()
        .map(|pool| {
            IpPool::new(
                "IPPool",
                pool.family.pool_name(),
                IpPoolSpec {
                    cidr: pool.cidr.clone(),
                    ipip_mode: config.ipip,
                    vxlan_mode: config.vxlan,
                    nat_outgoing: config.nat_outgoing,
                    ..IpPoolSpec::default()
                },
            )
        })
        .collect()
}

/// Existing pools that are not ours or no longer carry a configured CIDR
pub fn stale_pools<'a>(existing: &'a [IpPool], desired: &[IpPool]) -> Vec<&'a IpPool> {
    let names: BTreeSet<&str> = desired.iter().map(|pool| pool.name()).collect();
    let cidrs: BTreeSet<&str> = desired.iter().map(|pool| pool.spec.cidr.as_str()).collect();

    existing
        .iter()
        .filter(|pool| {
            !names.contains(pool.name()) || !cidrs.contains(pool.spec.cidr.as_str())
        })
        .collect()
}

/// Delete stale pools, then apply the desired ones.
///
/// Deletes come first so a pool whose CIDR changed can be recreated under
/// the same name. With `manage-pools` off nothing is read or written.
pub fn reconcile<C: DatastoreClient>(
    client: &C,
    config: &PoolConfig,
) -> Result<Changes, CalicoError> {
    if !config.manage {
        crate::log_info!("Skipping pool configuration.");
        return Ok(Changes::skipped());
    }

    let desired = desired_pools(config);
    let existing: Vec<IpPool> = client.list(kind::POOL).inspect_err(|e| {
        crate::log_error!("Failed to get IP pools: {}", e);
    })?;

    let mut changes = Changes::default();

    for pool in stale_pools(&existing, &desired) {
        crate::log_info!("Deleting stale pool {} ({}).", pool.name(), pool.spec.cidr);
        client
            .delete(kind::POOL, pool.name(), true)
            .inspect_err(|e| {
                crate::log_error!("Failed to delete pool {}: {}", pool.name(), e);
            })?;
        changes.deleted.push(pool.name().to_string());
    }

    for pool in &desired {
        client.apply_resource(pool).inspect_err(|e| {
            crate::log_error!("Failed to apply pool {}: {}", pool.name(), e);
        })?;
        crate::log_info!("Applied pool {} ({}).", pool.name(), pool.spec.cidr);
        changes.applied.push(pool.name().to_string());
    }

    Ok(changes)
}
