//! Unit workload status as shown by `juju status`

use anyhow::{Context, Result, anyhow};
use colored::Colorize;
use std::fmt;
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Maintenance,
    Waiting,
    Blocked,
    Active,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusKind::Maintenance => write!(f, "maintenance"),
            StatusKind::Waiting => write!(f, "waiting"),
            StatusKind::Blocked => write!(f, "blocked"),
            StatusKind::Active => write!(f, "active"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    pub kind: StatusKind,
    pub message: String,
}

impl UnitStatus {
    pub fn maintenance(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Maintenance,
            message: message.into(),
        }
    }

    pub fn waiting(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Waiting,
            message: message.into(),
        }
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Blocked,
            message: message.into(),
        }
    }

    pub fn active(message: impl Into<String>) -> Self {
        Self {
            kind: StatusKind::Active,
            message: message.into(),
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

pub trait StatusReporter {
    fn set_status(&self, status: &UnitStatus) -> Result<()>;
}

/// Reports through `status-set` inside a hook, or to the terminal when the
/// tool is not on PATH
pub struct JujuStatus;

impl StatusReporter for JujuStatus {
    fn set_status(&self, status: &UnitStatus) -> Result<()> {
        crate::log_info!("Status {}", status);

        if which::which("status-set").is_err() {
            let kind = match status.kind {
                StatusKind::Active => status.kind.to_string().green(),
                StatusKind::Blocked => status.kind.to_string().red(),
                StatusKind::Waiting | StatusKind::Maintenance => {
                    status.kind.to_string().yellow()
                }
            };
            println!("{} {}", kind.bold(), status.message);
            return Ok(());
        }

        let kind = status.kind.to_string();
        let result = Command::new("status-set")
            .args([kind.as_str(), status.message.as_str()])
            .status()
            .context("Failed to run status-set")?;

        if !result.success() {
            return Err(anyhow!("status-set {} failed", status.kind));
        }
        Ok(())
    }
}
