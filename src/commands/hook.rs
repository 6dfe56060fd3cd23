//! Hook command: one reconciliation pass for a Juju hook

use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::calico::calicoctl::{CalicoCtl, DatastoreClient};
use crate::calico::dryrun::DryRunClient;
use crate::charm::etcd::{self, EtcdRelation};
use crate::charm::network::SystemHost;
use crate::charm::orchestrator::{ENCAPSULATION_CONFLICT_HINT, Hook, Orchestrator};
use crate::charm::state::CharmState;
use crate::charm::status::{JujuStatus, StatusKind, StatusReporter, UnitStatus};
use crate::charm::unit::UnitIdentity;
use crate::commands::HookContext;
use crate::config::charm::ConfigValues;
use crate::config::settings::Settings;
use crate::utils::CharmError;

pub const ETCD_MISSING_MESSAGE: &str = "Waiting for relation to etcd";

pub struct HookOptions {
    pub hook: Hook,
    pub context: HookContext,
    pub state: Option<PathBuf>,
    /// Relation data published by etcd, as YAML
    pub etcd_data: Option<PathBuf>,
    pub etcd_endpoints: Option<String>,
    pub dry_run: bool,
}

/// Handle a hook
pub fn run(options: HookOptions, settings: &Settings) -> Result<UnitStatus> {
    let unit = options.context.unit_identity()?;
    let values = options.context.config_values()?;
    let reporter = JujuStatus;

    let relation = match &options.etcd_data {
        Some(path) => Some(EtcdRelation::load(path)?),
        None => None,
    };

    if let Some(relation) = &relation {
        if options.dry_run {
            crate::log_info!("[DRY RUN] Would save etcd client credentials");
        } else {
            relation.save_client_credentials(&settings.etcd)?;
        }
    }

    let Some(env) = calicoctl_env(
        relation.as_ref(),
        options.etcd_endpoints.as_deref(),
        settings,
    ) else {
        let status = UnitStatus::blocked(ETCD_MISSING_MESSAGE);
        reporter.set_status(&status)?;
        return Ok(status);
    };

    if relation.is_some() && !options.dry_run {
        etcd::write_env_file(&env, &settings.etcd.env_file)?;
    }

    let ctl = CalicoCtl::from_command_line(&settings.calicoctl.command)?
        .with_env(env)
        .with_timeout(settings.calicoctl.timeout());
    let host = SystemHost::new(&settings.paths.rp_filter);

    let state_path = options
        .state
        .clone()
        .unwrap_or_else(|| settings.paths.state_file.clone());
    let mut state = CharmState::load(&state_path)?;

    if options.dry_run {
        println!("{}", "DRY RUN MODE: No changes will be made".cyan().bold());
        println!();

        let client = DryRunClient::new(ctl);
        let status = run_hook(&client, &host, &reporter, &unit, options.hook, &mut state, &values);
        client.log_summary();
        return Ok(status);
    }

    let status = run_hook(&ctl, &host, &reporter, &unit, options.hook, &mut state, &values);
    save_state(&state, &state_path)?;
    Ok(status)
}

fn run_hook<C: DatastoreClient>(
    client: &C,
    host: &SystemHost,
    reporter: &JujuStatus,
    unit: &UnitIdentity,
    hook: Hook,
    state: &mut CharmState,
    values: &ConfigValues,
) -> UnitStatus {
    let status = Orchestrator::new(client, host, reporter, unit).handle(hook, state, values);
    if status.kind == StatusKind::Waiting && status.message.contains(ENCAPSULATION_CONFLICT_HINT) {
        CharmError::encapsulation_conflict().display();
    }
    status
}

fn save_state(state: &CharmState, path: &Path) -> Result<()> {
    state
        .save(path)
        .with_context(|| format!("Failed to save charm state to {}", path.display()))
}

/// calicoctl environment from, in order: relation data, an explicit endpoint
/// list, or the env file written by an earlier hook
pub fn calicoctl_env(
    relation: Option<&EtcdRelation>,
    endpoints: Option<&str>,
    settings: &Settings,
) -> Option<BTreeMap<String, String>> {
    if let Some(relation) = relation.filter(|relation| relation.is_ready()) {
        return Some(relation.calicoctl_env(&settings.etcd));
    }

    if let Some(endpoints) = endpoints.filter(|endpoints| !endpoints.trim().is_empty()) {
        let relation = EtcdRelation {
            connection_string: Some(endpoints.to_string()),
            ..EtcdRelation::default()
        };
        return Some(relation.calicoctl_env(&settings.etcd));
    }

    match etcd::read_env_file(&settings.etcd.env_file) {
        Ok(env) if env.get("ETCD_ENDPOINTS").is_some_and(|e| !e.is_empty()) => Some(env),
        Ok(_) => None,
        Err(e) => {
            crate::log_debug!("{:#}", e);
            None
        }
    }
}
