//! State store interface
//!
//! The store keeps, per resource id, the inputs and outputs recorded by the
//! last successful apply. The planner reads it; the executor writes one
//! record per completed resource, so an interrupted run leaves a
//! consistent partial state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::StateError;
use crate::types::Attributes;

/// What the last successful apply recorded for a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub kind: String,
    /// Resolved inputs the resource was applied with
    pub inputs: Attributes,
    /// Outputs returned by the provider
    pub outputs: Attributes,
    /// Ids the resource depended on when applied
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Apply generation that wrote the record
    pub version: u64,
}

impl StateRecord {
    /// Provider-assigned id, taken from the `id` output
    pub fn physical_id(&self) -> Option<&str> {
        self.outputs.get("id").and_then(|v| v.as_str())
    }

    /// Reject records that could not have been written by an apply
    pub fn validate(&self, id: &str) -> Result<(), StateError> {
        if self.kind.is_empty() {
            return Err(StateError::corruption(format!("record {id} has no kind")));
        }
        let unresolved = self
            .inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|(_, v)| !v.is_resolved());
        if let Some((field, _)) = unresolved {
            return Err(StateError::corruption(format!(
                "record {id} holds an unresolved reference in {field}"
            )));
        }
        if self.physical_id().is_none() {
            return Err(StateError::corruption(format!(
                "record {id} has no string `id` output"
            )));
        }
        Ok(())
    }
}

/// Persistence for state records
///
/// Reads must reflect all prior writes from the same process. Concurrent
/// writes to different ids must not affect each other.
pub trait StateStore: Send + Sync {
    fn read(&self, id: &str) -> Result<Option<StateRecord>, StateError>;

    fn write(&self, id: &str, record: StateRecord) -> Result<(), StateError>;

    fn delete(&self, id: &str) -> Result<(), StateError>;

    /// All recorded ids, sorted
    fn ids(&self) -> Result<Vec<String>, StateError>;
}

/// In-memory store, mainly for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, StateRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record
    pub fn snapshot(&self) -> BTreeMap<String, StateRecord> {
        match self.records.read() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl From<BTreeMap<String, StateRecord>> for MemoryStore {
    fn from(records: BTreeMap<String, StateRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }
}

impl StateStore for MemoryStore {
    fn read(&self, id: &str) -> Result<Option<StateRecord>, StateError> {
        let records = self
            .records
            .read()
            .map_err(|_| StateError::Backend("state lock poisoned".into()))?;
        Ok(records.get(id).cloned())
    }

    fn write(&self, id: &str, record: StateRecord) -> Result<(), StateError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StateError::Backend("state lock poisoned".into()))?;
        records.insert(id.to_string(), record);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StateError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| StateError::Backend("state lock poisoned".into()))?;
        records.remove(id);
        Ok(())
    }

    fn ids(&self) -> Result<Vec<String>, StateError> {
        let records = self
            .records
            .read()
            .map_err(|_| StateError::Backend("state lock poisoned".into()))?;
        Ok(records.keys().cloned().collect())
    }
}
