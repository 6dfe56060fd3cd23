//! Prerequisite checking system for required tools

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrereqError {
    #[error("Tool '{name}' not found")]
    NotFound { name: String },
}

/// Trait for checking prerequisites
pub trait Prerequisite {
    /// Name of the prerequisite tool
    fn name(&self) -> &str;

    /// Check if the tool is available
    fn check(&self) -> Result<(), PrereqError>;

    /// Installation hint for the user
    fn install_hint(&self) -> &str;
}

/// Prerequisite satisfied when a command is on PATH or exists at the
/// given path
pub struct CommandPrereq {
    pub name: String,
    pub hint: String,
}

impl CommandPrereq {
    pub fn new(name: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hint: hint.into(),
        }
    }
}

impl Prerequisite for CommandPrereq {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> Result<(), PrereqError> {
        which::which(&self.name).map_err(|_| PrereqError::NotFound {
            name: self.name.clone(),
        })?;
        Ok(())
    }

    fn install_hint(&self) -> &str {
        &self.hint
    }
}

/// Tools the charm shells out to
pub struct CommonPrereqs;

impl CommonPrereqs {
    /// calicoctl, as configured in the settings file
    pub fn calicoctl(program: &str) -> CommandPrereq {
        CommandPrereq::new(
            program,
            "Attach the calico resource: juju attach-resource calico calico=calico.tar.gz",
        )
    }

    /// ethtool, needed to disable VXLAN TX checksum offload
    pub fn ethtool() -> CommandPrereq {
        CommandPrereq::new("ethtool", "Install with: apt install ethtool")
    }

    /// Check all prerequisites and return detailed results
    /// Returns (found_tools, missing_tools with their install hints)
    pub fn check_all(prereqs: &[&dyn Prerequisite]) -> (Vec<String>, Vec<(String, String)>) {
        let mut found = Vec::new();
        let mut missing = Vec::new();

        for prereq in prereqs {
            match prereq.check() {
                Ok(_) => found.push(prereq.name().to_string()),
                Err(e) => {
                    crate::log_debug!("{}", e);
                    missing.push((prereq.name().to_string(), prereq.install_hint().to_string()));
                }
            }
        }

        (found, missing)
    }
}
