//! calico-charm CLI - Calico charm reconciliation for Juju hooks

use anyhow::{Context, Result};
use calico_charm::charm::orchestrator::Hook;
use calico_charm::commands::HookContext;
use calico_charm::commands::hook::HookOptions;
use calico_charm::config::settings::Settings;
use calico_charm::log_info;
use calico_charm::utils::errors::{display_error_and_exit, enhance_error};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "calico-charm")]
#[command(author, version, about = "Calico charm reconciliation for Juju hooks", long_about = None)]
struct Cli {
    /// Verbose output (can be used multiple times: -v, -vv, -vvv)
    /// -v: INFO, -vv: DEBUG, -vvv: TRACE
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Dry-run mode: show what would be done without making changes
    #[arg(long, global = true)]
    dry_run: bool,

    /// Tool settings file (default: .calico-charm.toml or ~/.config/calico-charm/config.toml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Charm configuration as YAML (default: live `config-get`)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Reconciliation state file
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Juju unit name, e.g. calico/0
    #[arg(long, global = true, env = "JUJU_UNIT_NAME")]
    unit_name: Option<String>,

    /// Node name in the Calico datastore (default: this machine's hostname)
    #[arg(long, global = true)]
    hostname: Option<String>,

    /// Unit address used for subnet matching (default: `network-get cni`)
    #[arg(long, global = true)]
    bind_address: Option<String>,

    /// etcd relation data as YAML
    #[arg(long, global = true)]
    etcd_data: Option<PathBuf>,

    /// etcd endpoints, used when no relation data is given
    #[arg(long, global = true, env = "ETCD_ENDPOINTS")]
    etcd_endpoints: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciliation pass for a Juju hook
    Hook {
        #[arg(value_enum)]
        name: Hook,
    },

    /// Save etcd client credentials and the calicoctl environment file
    EtcdCredentials,

    /// Print the CNI template options as JSON
    CniOptions,

    /// Check prerequisites
    Check,

    /// Print the example settings file, or write the current settings
    Settings {
        /// Write the current settings to this path
        #[arg(long)]
        write: Option<PathBuf>,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Show version information
    Version,
}

fn main() {
    let cli = Cli::parse();

    calico_charm::utils::logger::init(cli.verbose);

    if let Err(e) = run(cli) {
        display_error_and_exit(enhance_error(e));
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.settings {
        Some(path) => Settings::load_from_file(path)?,
        None => Settings::load(),
    };

    let context = HookContext {
        config: cli.config.clone(),
        unit_name: cli.unit_name.clone(),
        hostname: cli.hostname.clone(),
        bind_address: cli.bind_address.clone(),
    };

    match cli.command {
        Commands::Hook { name } => {
            log_info!("Running {} hook", name);
            let status = calico_charm::commands::hook::run(
                HookOptions {
                    hook: name,
                    context,
                    state: cli.state,
                    etcd_data: cli.etcd_data,
                    etcd_endpoints: cli.etcd_endpoints,
                    dry_run: cli.dry_run,
                },
                &settings,
            )?;
            log_info!("Unit status: {}", status);
            Ok(())
        }
        Commands::EtcdCredentials => {
            let etcd_data = cli
                .etcd_data
                .context("--etcd-data is required for etcd-credentials")?;
            calico_charm::commands::credentials::run(&etcd_data, &settings, cli.dry_run)
        }
        Commands::CniOptions => calico_charm::commands::cni::run(&context),
        Commands::Check => calico_charm::commands::check::run(&settings),
        Commands::Settings { write } => handle_settings_command(&settings, write),
        Commands::Completion { shell } => handle_completion_command(shell),
        Commands::Version => handle_version_command(),
    }
}

fn handle_settings_command(settings: &Settings, write: Option<PathBuf>) -> Result<()> {
    match write {
        Some(path) => {
            settings.save(&path)?;
            log_info!("Settings written to {}", path.display());
        }
        None => print!("{}", Settings::example_config()?),
    }
    Ok(())
}

fn handle_completion_command(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "calico-charm", &mut io::stdout());
    Ok(())
}

fn handle_version_command() -> Result<()> {
    println!("calico-charm {}", env!("CARGO_PKG_VERSION"));
    println!("Calico charm reconciliation for Juju hooks");
    Ok(())
}
