//! In-memory datastore for reconciler tests

use crate::calico::calicoctl::DatastoreClient;
use crate::calico::error::CalicoError;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Get(String, Option<String>),
    Apply(String, String),
    Delete(String, String),
}

#[derive(Default)]
pub struct FakeDatastore {
    resources: RefCell<BTreeMap<(String, String), serde_yaml::Value>>,
    calls: RefCell<Vec<Call>>,
    failing_gets: RefCell<BTreeSet<String>>,
    failing_writes: RefCell<BTreeSet<String>>,
}

/// Map the command line kind to the kind written in manifests
fn canonical_kind(kind: &str) -> String {
    match kind.to_lowercase().as_str() {
        "bgpconfig" | "bgpconfigs" | "bgpconfiguration" | "bgpconfigurations" => {
            "BGPConfiguration".to_string()
        }
        "node" | "nodes" => "Node".to_string(),
        "pool" | "pools" | "ippool" | "ippools" => "IPPool".to_string(),
        "bgppeer" | "bgppeers" => "BGPPeer".to_string(),
        _ => kind.to_string(),
    }
}

fn injected(command: &str) -> CalicoError {
    CalicoError::Command {
        command: command.to_string(),
        status: "exit status: 1".to_string(),
        output: "injected failure".to_string(),
    }
}

impl FakeDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store resources from a YAML stream without recording a call
    pub fn seed(&self, yaml: &str) {
        use serde::Deserialize;
        for document in serde_yaml::Deserializer::from_str(yaml) {
            let value = serde_yaml::Value::deserialize(document).unwrap();
            if value.is_null() {
                continue;
            }
            let key = (
                canonical_kind(value["kind"].as_str().unwrap()),
                value["metadata"]["name"].as_str().unwrap().to_string(),
            );
            self.resources.borrow_mut().insert(key, value);
        }
    }

    pub fn stored(&self, kind: &str, name: &str) -> Option<serde_yaml::Value> {
        self.resources
            .borrow()
            .get(&(canonical_kind(kind), name.to_string()))
            .cloned()
    }

    pub fn names(&self, kind: &str) -> Vec<String> {
        let kind = canonical_kind(kind);
        self.resources
            .borrow()
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    /// Applies and deletes, in order
    pub fn writes(&self) -> Vec<Call> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| !matches!(call, Call::Get(..)))
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn fail_get(&self, kind: &str) {
        self.failing_gets.borrow_mut().insert(canonical_kind(kind));
    }

    /// Fail any apply or delete of a resource with this name
    pub fn fail_apply(&self, name: &str) {
        self.failing_writes.borrow_mut().insert(name.to_string());
    }

    pub fn fail_delete(&self, name: &str) {
        self.fail_apply(name);
    }
}

impl DatastoreClient for FakeDatastore {
    fn get(&self, kind: &str, name: Option<&str>) -> Result<serde_yaml::Value, CalicoError> {
        self.calls
            .borrow_mut()
            .push(Call::Get(kind.to_string(), name.map(str::to_string)));

        let canonical = canonical_kind(kind);
        if self.failing_gets.borrow().contains(&canonical) {
            return Err(injected(&format!("get {kind}")));
        }

        let resources = self.resources.borrow();
        match name {
            Some(name) => resources
                .get(&(canonical, name.to_string()))
                .cloned()
                .ok_or_else(|| CalicoError::NotFound {
                    kind: kind.to_string(),
                    name: name.to_string(),
                }),
            None => {
                let items: Vec<serde_yaml::Value> = resources
                    .iter()
                    .filter(|((k, _), _)| *k == canonical)
                    .map(|(_, value)| value.clone())
                    .collect();
                let mut list = serde_yaml::Mapping::new();
                list.insert("kind".into(), format!("{canonical}List").into());
                list.insert("items".into(), serde_yaml::Value::Sequence(items));
                Ok(serde_yaml::Value::Mapping(list))
            }
        }
    }

    fn apply(&self, manifest: &serde_yaml::Value) -> Result<(), CalicoError> {
        let kind = manifest["kind"].as_str().unwrap_or_default().to_string();
        let name = manifest["metadata"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        self.calls
            .borrow_mut()
            .push(Call::Apply(kind.clone(), name.clone()));

        if self.failing_writes.borrow().contains(&name) {
            return Err(injected(&format!("apply {kind} {name}")));
        }

        self.resources
            .borrow_mut()
            .insert((canonical_kind(&kind), name), manifest.clone());
        Ok(())
    }

    fn delete(&self, kind: &str, name: &str, skip_not_exists: bool) -> Result<(), CalicoError> {
        self.calls
            .borrow_mut()
            .push(Call::Delete(kind.to_string(), name.to_string()));

        if self.failing_writes.borrow().contains(name) {
            return Err(injected(&format!("delete {kind} {name}")));
        }

        let removed = self
            .resources
            .borrow_mut()
            .remove(&(canonical_kind(kind), name.to_string()));
        if removed.is_none() && !skip_not_exists {
            return Err(CalicoError::Command {
                command: format!("delete {kind} {name}"),
                status: "exit status: 1".to_string(),
                output: format!("resource does not exist: {name}"),
            });
        }
        Ok(())
    }
}
