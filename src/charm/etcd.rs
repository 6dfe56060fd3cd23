//! etcd relation data, client credential files and the calicoctl environment

use crate::config::settings::EtcdSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Data published by the etcd application on the relation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtcdRelation {
    #[serde(default)]
    pub connection_string: Option<String>,

    #[serde(default)]
    pub client_cert: Option<String>,

    #[serde(default)]
    pub client_key: Option<String>,

    #[serde(default)]
    pub client_ca: Option<String>,
}

impl EtcdRelation {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read etcd relation data: {}", path.display()))?;
        Self::from_yaml_str(&contents)
            .with_context(|| format!("Failed to parse etcd relation data: {}", path.display()))
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let relation: Option<Self> = serde_yaml::from_str(contents)?;
        Ok(relation.unwrap_or_default())
    }

    /// The relation has published where etcd is
    pub fn is_ready(&self) -> bool {
        self.connection_string
            .as_deref()
            .is_some_and(|endpoints| !endpoints.trim().is_empty())
    }

    /// Write whichever of key, cert and CA the relation carries
    pub fn save_client_credentials(&self, paths: &EtcdSettings) -> Result<Vec<String>> {
        let mut written = Vec::new();
        let files = [
            (&self.client_key, &paths.key_file),
            (&self.client_cert, &paths.cert_file),
            (&self.client_ca, &paths.ca_file),
        ];

        for (contents, path) in files {
            let Some(contents) = contents else {
                continue;
            };
            write_file(path, contents)?;
            crate::log_info!("Wrote etcd credential {}", path.display());
            written.push(path.display().to_string());
        }

        Ok(written)
    }

    /// Environment calicoctl needs to reach etcd
    pub fn calicoctl_env(&self, paths: &EtcdSettings) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert(
            "ETCD_ENDPOINTS".to_string(),
            self.connection_string.clone().unwrap_or_default(),
        );
        env.insert(
            "ETCD_KEY_FILE".to_string(),
            paths.key_file.display().to_string(),
        );
        env.insert(
            "ETCD_CERT_FILE".to_string(),
            paths.cert_file.display().to_string(),
        );
        env.insert(
            "ETCD_CA_CERT_FILE".to_string(),
            paths.ca_file.display().to_string(),
        );
        env
    }
}

/// `export KEY=value` lines, sorted by key, with values shell-quoted
pub fn render_env(env: &BTreeMap<String, String>) -> String {
    env.iter()
        .map(|(key, value)| format!("export {}={}", key, shell_words::quote(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn write_env_file(env: &BTreeMap<String, String>, path: &Path) -> Result<()> {
    write_file(path, &render_env(env))?;
    crate::log_info!("Updated calicoctl environment {}", path.display());
    Ok(())
}

/// Read back a file written by [`write_env_file`]. Lines that are not
/// `export KEY=value` are ignored.
pub fn read_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read calicoctl environment: {}", path.display()))?;

    Ok(contents
        .lines()
        .filter_map(|line| {
            let words = shell_words::split(line).ok()?;
            match words.as_slice() {
                [export, assignment] if export == "export" => {
                    let (key, value) = assignment.split_once('=')?;
                    Some((key.to_string(), value.to_string()))
                }
                _ => None,
            }
        })
        .collect())
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}
