//! Prerequisite check command

use anyhow::Result;
use colored::Colorize;

use crate::config::settings::Settings;
use crate::utils::{CharmError, CommonPrereqs, Prerequisite};

/// Handle check command
pub fn run(settings: &Settings) -> Result<()> {
    crate::log_info!("Checking prerequisites...");

    let program = shell_words::split(&settings.calicoctl.command)?
        .into_iter()
        .next()
        .unwrap_or_else(|| settings.calicoctl.command.clone());
    let calicoctl = CommonPrereqs::calicoctl(&program);
    let ethtool = CommonPrereqs::ethtool();

    let prereqs: Vec<&dyn Prerequisite> = vec![&calicoctl, &ethtool];
    let (found, missing) = CommonPrereqs::check_all(&prereqs);

    for name in &found {
        println!("  {} {}", "✓".green(), name);
    }
    for (name, hint) in &missing {
        println!("  {} {} ({})", "✗".red(), name, hint);
    }

    match missing.first() {
        None => {
            println!("{}", "All prerequisites satisfied".green().bold());
            Ok(())
        }
        Some((name, hint)) => Err(CharmError::missing_prerequisite(name, hint).into()),
    }
}
