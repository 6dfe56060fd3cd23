//! Calico charm reconciliation core

pub mod calico;
pub mod charm;
pub mod commands;
pub mod config;
pub mod utils;
