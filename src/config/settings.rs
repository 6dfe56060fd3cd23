//! Tool settings: where calicoctl, credentials and state live on the machine

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub calicoctl: CalicoctlSettings,

    #[serde(default)]
    pub etcd: EtcdSettings,

    #[serde(default)]
    pub paths: PathSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CalicoctlSettings {
    /// Command line used to run calicoctl, split shell-style
    #[serde(default = "default_calicoctl_command")]
    pub command: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Files the etcd client credentials are written to
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EtcdSettings {
    #[serde(default = "default_etcd_key")]
    pub key_file: PathBuf,

    #[serde(default = "default_etcd_cert")]
    pub cert_file: PathBuf,

    #[serde(default = "default_etcd_ca")]
    pub ca_file: PathBuf,

    /// Shell file exporting the calicoctl environment
    #[serde(default = "default_env_file")]
    pub env_file: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct PathSettings {
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    #[serde(default = "default_rp_filter")]
    pub rp_filter: PathBuf,
}

fn default_calicoctl_command() -> String {
    "/opt/calicoctl/calicoctl".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_etcd_key() -> PathBuf {
    PathBuf::from("/opt/calicoctl/etcd-key")
}

fn default_etcd_cert() -> PathBuf {
    PathBuf::from("/opt/calicoctl/etcd-cert")
}

fn default_etcd_ca() -> PathBuf {
    PathBuf::from("/opt/calicoctl/etcd-ca")
}

fn default_env_file() -> PathBuf {
    PathBuf::from("/opt/calicoctl/calicoctl.env")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/var/lib/calico-charm/state.json")
}

fn default_rp_filter() -> PathBuf {
    PathBuf::from("/proc/sys/net/ipv4/conf/all/rp_filter")
}

impl Default for CalicoctlSettings {
    fn default() -> Self {
        Self {
            command: default_calicoctl_command(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CalicoctlSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EtcdSettings {
    fn default() -> Self {
        Self {
            key_file: default_etcd_key(),
            cert_file: default_etcd_cert(),
            ca_file: default_etcd_ca(),
            env_file: default_env_file(),
        }
    }
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            rp_filter: default_rp_filter(),
        }
    }
}

impl Settings {
    /// Load settings from file or return defaults
    pub fn load() -> Self {
        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path).unwrap_or_else(|e| {
                crate::log_warn!("{:#}; using default settings", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;

        Ok(settings)
    }

    /// Find the settings file in standard locations
    /// Priority:
    /// 1. .calico-charm.toml in current directory
    /// 2. ~/.config/calico-charm/config.toml (XDG config directory)
    fn find_config_file() -> Option<PathBuf> {
        let local_config = PathBuf::from(".calico-charm.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("calico-charm").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        None
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize settings")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))?;

        Ok(())
    }

    /// Commented settings file with every default filled in
    pub fn example_config() -> Result<String> {
        let header = "# calico-charm settings file\n\
                      # Place this file at ~/.config/calico-charm/config.toml or .calico-charm.toml\n\n";
        let body = toml::to_string_pretty(&Settings::default())
            .context("Failed to serialize default settings")?;
        Ok(format!("{}{}", header, body))
    }
}
