//! Resource declarations and graph nodes
//!
//! A declaration is what the user writes: a kind, a name, input attributes
//! and optional explicit dependencies. Building a graph turns each
//! declaration into a [`ResourceNode`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::{Attributes, Reference, Value};

/// A single declared resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    /// Unique name, used as the node id
    pub name: String,
    /// Opaque resource kind, e.g. "aws:ec2/subnet"
    pub kind: String,
    /// Desired input attributes, possibly containing references
    #[serde(default)]
    pub attributes: Attributes,
    /// Explicit dependencies in addition to those implied by references
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Declaration {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            attributes: Attributes::new(),
            depends_on: Vec::new(),
        }
    }

    /// Set an input attribute
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add an explicit dependency
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }
}

/// A resource in the dependency graph
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    /// Unique identifier within the graph
    pub id: String,
    pub kind: String,
    /// Desired inputs
    pub inputs: Attributes,
    /// Explicit dependencies as declared
    pub depends_on: Vec<String>,
    /// Position in the declaration set, used for stable ordering
    pub index: usize,
}

impl ResourceNode {
    pub(crate) fn from_declaration(decl: Declaration, index: usize) -> Self {
        Self {
            id: decl.name,
            kind: decl.kind,
            inputs: decl.attributes,
            depends_on: decl.depends_on,
            index,
        }
    }

    /// All references found in the inputs
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        for value in self.inputs.values() {
            value.collect_references(&mut refs);
        }
        refs
    }

    /// Ids this node depends on: referenced nodes plus explicit dependencies
    pub fn dependency_ids(&self) -> BTreeSet<&str> {
        self.references()
            .into_iter()
            .map(|r| r.node.as_str())
            .chain(self.depends_on.iter().map(String::as_str))
            .collect()
    }

    /// Whether `recorded` names a different dependency set than this node
    pub fn dependencies_differ(&self, recorded: &[String]) -> bool {
        recorded.iter().map(String::as_str).collect::<BTreeSet<_>>() != self.dependency_ids()
    }
}
