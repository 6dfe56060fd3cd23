//! Reconciliation of the cluster-wide BGPConfiguration

use crate::calico::Changes;
use crate::calico::calicoctl::DatastoreClient;
use crate::calico::error::CalicoError;
use crate::calico::resources::{
    BgpConfiguration, DEFAULT_BGP_CONFIGURATION, ServiceIpBlock, kind,
};
use crate::config::charm::BgpGlobalsConfig;

/// Write AS number, mesh flag and advertised service ranges into the
/// default BGPConfiguration, creating it when absent.
///
/// Service ranges replace what is stored: an empty option clears the
/// corresponding list.
pub fn reconcile<C: DatastoreClient>(
    client: &C,
    config: &BgpGlobalsConfig,
) -> Result<Changes, CalicoError> {
    let mut bgp_config: BgpConfiguration =
        match client.fetch(kind::BGP_CONFIGURATION, DEFAULT_BGP_CONFIGURATION) {
            Ok(bgp_config) => bgp_config,
            Err(e) if e.is_not_found() => {
                crate::log_warn!("default BGPConfiguration does not exist.");
                BgpConfiguration::skeleton()
            }
            Err(e) => {
                crate::log_error!("Failed to get BGPConfiguration: {}", e);
                return Err(e);
            }
        };

    let spec = &mut bgp_config.spec;
    spec.as_number = Some(config.as_number);
    spec.node_to_node_mesh_enabled = Some(config.node_to_node_mesh);
    spec.service_cluster_ips = Some(blocks(&config.service_cluster_ips));
    spec.service_external_ips = Some(blocks(&config.service_external_ips));
    spec.service_load_balancer_ips = Some(blocks(&config.service_load_balancer_ips));

    client.apply_resource(&bgp_config).inspect_err(|e| {
        crate::log_error!("Failed to apply BGPConfiguration: {}", e);
    })?;

    crate::log_info!("Configured BGP globals.");
    Ok(Changes::applied([bgp_config.metadata.name]))
}

fn blocks(cidrs: &[String]) -> Vec<ServiceIpBlock> {
    cidrs
        .iter()
        .map(|cidr| ServiceIpBlock { cidr: cidr.clone() })
        .collect()
}
