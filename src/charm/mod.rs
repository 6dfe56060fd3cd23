pub mod etcd;
pub mod network;
pub mod orchestrator;
pub mod state;
pub mod status;
pub mod unit;

use crate::calico::error::CalicoError;
use crate::config::charm::ConfigError;
use state::Step;
use thiserror::Error;

/// How a failed pass is surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Retried on the next hook
    Transient,
    /// Needs an operator to change configuration
    Permanent,
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("invalid charm configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{step} failed: {source}")]
    Datastore {
        step: Step,
        #[source]
        source: CalicoError,
    },

    #[error("{step} failed: {source:#}")]
    Host {
        step: Step,
        #[source]
        source: anyhow::Error,
    },
}

impl ReconcileError {
    pub fn severity(&self) -> Severity {
        match self {
            ReconcileError::Config(_) => Severity::Permanent,
            ReconcileError::Datastore { .. } | ReconcileError::Host { .. } => Severity::Transient,
        }
    }

    pub fn step(&self) -> Option<Step> {
        match self {
            ReconcileError::Config(_) => None,
            ReconcileError::Datastore { step, .. } | ReconcileError::Host { step, .. } => {
                Some(*step)
            }
        }
    }
}
