//! Errors raised at the calicoctl boundary

use std::time::Duration;
use thiserror::Error;

/// Text calicoctl prints when a named resource is absent.
///
/// calicoctl has no machine-readable error output, so a failed `get` is
/// classified by looking for this substring in its combined output.
pub const NOT_FOUND_MARKER: &str = "resource does not exist";

#[derive(Error, Debug)]
pub enum CalicoError {
    #[error("{kind} '{name}' does not exist")]
    NotFound { kind: String, name: String },

    #[error("calicoctl command failed ({status}): {command}\n{output}")]
    Command {
        command: String,
        status: String,
        output: String,
    },

    #[error("calicoctl command timed out after {}s: {command}", .timeout.as_secs_f32())]
    Timeout { command: String, timeout: Duration },

    #[error("failed to run calicoctl: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to parse calicoctl output: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unexpected {kind} resource: {reason}")]
    Malformed { kind: String, reason: String },

    #[error("failed to stage calicoctl manifest: {0}")]
    Io(#[from] std::io::Error),
}

impl CalicoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CalicoError::NotFound { .. })
    }
}
