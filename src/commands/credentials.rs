//! Save etcd client credentials and the calicoctl environment file

use anyhow::Result;
use std::path::Path;

use crate::charm::etcd::{self, EtcdRelation};
use crate::config::settings::Settings;
use crate::utils::CharmError;

/// Handle etcd-credentials command
pub fn run(etcd_data: &Path, settings: &Settings, dry_run: bool) -> Result<()> {
    let relation = EtcdRelation::load(etcd_data)?;
    if !relation.is_ready() {
        return Err(CharmError::etcd_not_ready().into());
    }

    let env = relation.calicoctl_env(&settings.etcd);

    if dry_run {
        crate::log_info!(
            "[DRY RUN] Would write etcd credentials and {}",
            settings.etcd.env_file.display()
        );
        println!("{}", etcd::render_env(&env));
        return Ok(());
    }

    let written = relation.save_client_credentials(&settings.etcd)?;
    etcd::write_env_file(&env, &settings.etcd.env_file)?;

    crate::log_info!(
        "Saved {} credential file(s) and {}",
        written.len(),
        settings.etcd.env_file.display()
    );
    Ok(())
}
