//! Core types for declarative resource management

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::retry::RetryConfig;

/// Attribute map of a resource, ordered by name for stable diffs and output
pub type Attributes = BTreeMap<String, Value>;

/// A pointer to an output attribute of another resource
///
/// Serialized as `{ "$ref": "vpc", "output": "id" }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reference {
    /// Id of the resource that produces the value
    #[serde(rename = "$ref")]
    pub node: String,
    /// Name of the output attribute
    pub output: String,
}

impl Reference {
    pub fn new(node: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.node, self.output)
    }
}

/// An attribute value
///
/// Inputs may contain [`Reference`]s, nested at any depth. Values recorded in
/// state are always fully resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Ref(Reference),
    Map(Attributes),
}

impl Value {
    /// Collect every reference contained in this value
    pub fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Self::Ref(r) => out.push(r),
            Self::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            Self::Map(map) => map.values().for_each(|v| v.collect_references(out)),
            _ => {}
        }
    }

    /// Check if the value contains no references
    pub fn is_resolved(&self) -> bool {
        match self {
            Self::Ref(_) => false,
            Self::List(items) => items.iter().all(Value::is_resolved),
            Self::Map(map) => map.values().all(Value::is_resolved),
            _ => true,
        }
    }

    /// Replace every reference with the value returned by `lookup`
    ///
    /// Stops at the first reference `lookup` rejects.
    pub fn try_resolve<E, F>(&self, lookup: &mut F) -> Result<Value, E>
    where
        F: FnMut(&Reference) -> Result<Value, E>,
    {
        match self {
            Self::Ref(r) => lookup(r),
            Self::List(items) => items
                .iter()
                .map(|v| v.try_resolve(lookup))
                .collect::<Result<Vec<_>, E>>()
                .map(Self::List),
            Self::Map(map) => map
                .iter()
                .map(|(k, v)| v.try_resolve(lookup).map(|v| (k.clone(), v)))
                .collect::<Result<Attributes, E>>()
                .map(Self::Map),
            other => Ok(other.clone()),
        }
    }

    /// Get the value as a string slice, if it is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Ref(r) => write!(f, "{r}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Self::Ref(r)
    }
}

/// Operation planned for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Create,
    Update,
    /// Delete then create, required when an immutable field changes
    Replace,
    Delete,
    NoOp,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        }
    }

    /// Check if the operation changes anything
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a resource during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Planned,
    Applying,
    Applied,
    Failed,
    /// Not attempted because a dependency did not apply or the run was cancelled
    Skipped,
}

impl NodeStatus {
    /// Check if the status is final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Applied | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Planned => "planned",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// Check if every resource reached its desired state
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.unchanged + self.failed + self.skipped
    }

    /// Count a terminal node outcome
    pub fn add(&mut self, operation: Operation, status: NodeStatus) {
        match status {
            NodeStatus::Failed => self.failed += 1,
            NodeStatus::Skipped => self.skipped += 1,
            NodeStatus::Applied => match operation {
                Operation::Create => self.created += 1,
                Operation::Update => self.updated += 1,
                Operation::Replace => self.replaced += 1,
                Operation::Delete => self.deleted += 1,
                Operation::NoOp => self.unchanged += 1,
            },
            NodeStatus::Pending | NodeStatus::Planned | NodeStatus::Applying => {}
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum number of provider calls in flight
    pub jobs: usize,
    /// Backoff policy for retryable provider errors
    pub retry: RetryConfig,
    /// Upper bound on a single provider call
    pub call_timeout: Option<Duration>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryConfig::default(),
            call_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested() -> Value {
        let mut route = Attributes::new();
        route.insert("cidr_block".into(), "0.0.0.0/0".into());
        route.insert("gateway_id".into(), Reference::new("igw", "id").into());
        Value::List(vec![Value::Map(route)])
    }

    #[test]
    fn test_collect_nested_references() {
        let value = nested();
        let mut refs = Vec::new();
        value.collect_references(&mut refs);
        assert_eq!(refs, vec![&Reference::new("igw", "id")]);
        assert!(!value.is_resolved());
    }

    #[test]
    fn test_try_resolve() {
        let resolved = nested()
            .try_resolve(&mut |r: &Reference| -> Result<Value, ()> {
                Ok(Value::String(format!("{}-123", r.node)))
            })
            .unwrap();
        assert!(resolved.is_resolved());
        assert!(resolved.to_string().contains("\"igw-123\""));
    }

    #[test]
    fn test_try_resolve_rejects() {
        let err = nested()
            .try_resolve(&mut |r: &Reference| Err::<Value, _>(r.clone()))
            .unwrap_err();
        assert_eq!(err, Reference::new("igw", "id"));
    }

    #[test]
    fn test_reference_serde_shape() {
        let value: Value = serde_json::from_str(r#"{"$ref": "vpc", "output": "id"}"#).unwrap();
        assert_eq!(value, Value::Ref(Reference::new("vpc", "id")));

        let map: Value = serde_json::from_str(r#"{"node": "vpc", "port": 80}"#).unwrap();
        assert!(matches!(map, Value::Map(_)));
    }

    #[test]
    fn test_int_stays_int() {
        let value: Value = serde_json::from_str("3306").unwrap();
        assert_eq!(value, Value::Int(3306));
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = ExecuteSummary::default();
        summary.add(Operation::Create, NodeStatus::Applied);
        summary.add(Operation::NoOp, NodeStatus::Applied);
        summary.add(Operation::Update, NodeStatus::Skipped);
        assert_eq!(summary.total_changes(), 1);
        assert_eq!(summary.total(), 3);
        assert!(!summary.is_success());
    }
}
