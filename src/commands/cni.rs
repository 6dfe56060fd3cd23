//! Print the CNI template options derived from charm configuration

use anyhow::{Context, Result};

use crate::charm::network;
use crate::commands::HookContext;

/// Handle cni-options command
pub fn run(context: &HookContext) -> Result<()> {
    let config = context.config_values()?.parse()?;
    let options = network::cni_options(&config);

    let json = serde_json::to_string_pretty(&options).context("Failed to serialize CNI options")?;
    println!("{}", json);
    Ok(())
}
