//! Utility modules for calico-charm

pub mod errors;
pub mod logger;
pub mod prereqs;

// Re-export commonly used items
pub use errors::CharmError;
pub use logger::{log_debug, log_error, log_info, log_warn};
pub use prereqs::{CommonPrereqs, Prerequisite};
