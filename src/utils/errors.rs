//! Enhanced error types with actionable suggestions

use crate::calico::error::CalicoError;
use crate::config::charm::ConfigError;
use colored::Colorize;
use thiserror::Error;

/// Enhanced error with suggestions and documentation links
#[derive(Error, Debug)]
#[error("{message}")]
pub struct CharmError {
    pub message: String,
    pub suggestions: Vec<String>,
    pub docs_link: Option<String>,
}

impl CharmError {
    /// Create a new error with suggestions
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestions: Vec::new(),
            docs_link: None,
        }
    }

    /// Add a suggestion to the error
    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Add a documentation link
    pub fn with_docs(mut self, link: impl Into<String>) -> Self {
        self.docs_link = Some(link.into());
        self
    }

    /// Display the error with suggestions
    pub fn display(&self) {
        crate::log_error!("{}", self.message);
        eprintln!("{} {}", "Error:".red().bold(), self.message);

        if !self.suggestions.is_empty() {
            eprintln!();
            eprintln!("{}", "Suggestions:".yellow().bold());
            for suggestion in &self.suggestions {
                eprintln!("  {} {}", "→".blue(), suggestion);
            }
        }

        if let Some(docs) = &self.docs_link {
            eprintln!();
            eprintln!("{} {}", "Documentation:".cyan(), docs);
        }
    }

    // Common error patterns

    pub fn calicoctl_not_found(command: &str) -> Self {
        Self::new(format!("calicoctl not found: {}", command))
            .suggest("Check that the calico resource has been unpacked to /opt/calicoctl")
            .suggest("Set [calicoctl] command in .calico-charm.toml to the binary location")
    }

    pub fn etcd_not_ready() -> Self {
        Self::new("No etcd connection details available")
            .suggest("Relate the charm to etcd: juju integrate calico etcd")
            .suggest("Pass relation data with --etcd-data or set ETCD_ENDPOINTS")
    }

    pub fn invalid_config(reason: &str) -> Self {
        Self::new(format!("Invalid charm configuration: {}", reason))
            .suggest("Check YAML-valued options such as unit-bgp-peers and subnet-as-numbers")
            .suggest("Inspect current values with: juju config calico")
    }

    pub fn encapsulation_conflict() -> Self {
        Self::new("ipip and vxlan cannot both be enabled")
            .suggest("Set one of them to Never: juju config calico ipip=Never")
            .with_docs("https://docs.tigera.io/calico/latest/networking/configuring/vxlan-ipip")
    }

    pub fn datastore_unreachable(detail: &str) -> Self {
        Self::new(format!("Calico datastore is not reachable: {}", detail))
            .suggest("Verify the etcd endpoints in the calicoctl environment file")
            .suggest("Check that the etcd client certificates are readable")
            .suggest("Run with -vv to see the calicoctl commands being executed")
    }

    pub fn missing_unit_name() -> Self {
        Self::new("Unit name is not known")
            .suggest("Run inside a Juju hook, or pass --unit-name calico/0")
    }

    /// Missing prerequisite error
    pub fn missing_prerequisite(prereq: &str, reason: &str) -> Self {
        Self::new(format!("Missing prerequisite: {} ({})", prereq, reason))
            .suggest("Run 'calico-charm check' to see all prerequisites")
            .suggest(format!("Install {}", prereq))
    }
}

/// Helper to display error and exit
pub fn display_error_and_exit(error: CharmError) -> ! {
    error.display();
    std::process::exit(1);
}

/// Convert anyhow error to CharmError when possible
pub fn enhance_error(err: anyhow::Error) -> CharmError {
    if let Some(config_err) = err.downcast_ref::<ConfigError>() {
        return CharmError::invalid_config(&config_err.to_string());
    }

    if let Some(calico_err) = err.downcast_ref::<CalicoError>() {
        return match calico_err {
            CalicoError::Spawn(_) => CharmError::calicoctl_not_found(&calico_err.to_string()),
            CalicoError::Timeout { .. } => {
                CharmError::datastore_unreachable(&calico_err.to_string())
            }
            _ => CharmError::new(calico_err.to_string())
                .suggest("Run with -vv for more details"),
        };
    }

    let err_str = format!("{:#}", err);

    if err_str.contains("connection refused") || err_str.contains("context deadline exceeded") {
        return CharmError::datastore_unreachable(&err_str);
    }

    // Default error with generic suggestion
    CharmError::new(err_str)
        .suggest("Run with -v or -vv for more details")
        .suggest("Check juju debug-log for additional context")
}
