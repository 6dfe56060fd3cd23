//! Dry-run wrapper around a datastore client

use crate::calico::calicoctl::DatastoreClient;
use crate::calico::error::CalicoError;
use colored::Colorize;
use std::cell::RefCell;

/// Passes reads through to the inner client and records writes instead of
/// performing them
pub struct DryRunClient<C> {
    inner: C,
    actions: RefCell<Vec<String>>,
}

impl<C: DatastoreClient> DryRunClient<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            actions: RefCell::new(Vec::new()),
        }
    }

    /// Actions that would have been performed, in order
    pub fn actions(&self) -> Vec<String> {
        self.actions.borrow().clone()
    }

    fn log_action(&self, action: String) {
        println!("  {} {}", "[DRY RUN]".cyan().bold(), action);
        crate::log_info!("[DRY RUN] {}", action);
        self.actions.borrow_mut().push(action);
    }

    /// Print the recorded actions as a numbered list
    pub fn log_summary(&self) {
        let actions = self.actions.borrow();
        if actions.is_empty() {
            println!("{}", "[DRY RUN] No datastore changes needed".cyan().bold());
            return;
        }

        println!(
            "{}",
            "[DRY RUN] Would perform the following actions:"
                .cyan()
                .bold()
        );
        println!();

        for (i, action) in actions.iter().enumerate() {
            println!("  {}. {}", i + 1, action);
        }

        println!();
        println!("{}", "No changes were made (--dry-run mode)".yellow());
    }
}

impl<C: DatastoreClient> DatastoreClient for DryRunClient<C> {
    fn get(&self, kind: &str, name: Option<&str>) -> Result<serde_yaml::Value, CalicoError> {
        self.inner.get(kind, name)
    }

    fn apply(&self, manifest: &serde_yaml::Value) -> Result<(), CalicoError> {
        let kind = manifest["kind"].as_str().unwrap_or("<unknown>");
        let name = manifest["metadata"]["name"].as_str().unwrap_or("<unnamed>");
        self.log_action(format!("calicoctl apply {} {}", kind, name));
        Ok(())
    }

    fn delete(&self, kind: &str, name: &str, skip_not_exists: bool) -> Result<(), CalicoError> {
        let flag = if skip_not_exists {
            " --skip-not-exists"
        } else {
            ""
        };
        self.log_action(format!("calicoctl delete {} {}{}", kind, name, flag));
        Ok(())
    }
}
