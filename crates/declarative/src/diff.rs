//! Attribute-level diffing between desired inputs and recorded state

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::planner::ChangeEntry;
use crate::provider::KindSchema;
use crate::types::{Attributes, Operation, Reference, Value};

const SENSITIVE: &str = "(sensitive)";

/// A single attribute that differs from the recorded state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub attribute: String,
    /// Rendered recorded value, `None` if the attribute was not recorded
    pub before: Option<String>,
    /// Rendered desired value, `None` if the attribute was removed
    pub after: Option<String>,
    /// The attribute is immutable for its kind
    pub forces_replace: bool,
}

/// Compare desired inputs against recorded inputs
///
/// `lookup` resolves references for the comparison; a reference it cannot
/// answer is unknown until apply and always counts as a change. Sensitive
/// fields are redacted in the rendered values.
pub fn diff_attributes<F>(
    desired: &Attributes,
    recorded: Option<&Attributes>,
    schema: &KindSchema,
    mut lookup: F,
) -> Vec<AttributeChange>
where
    F: FnMut(&Reference) -> Option<Value>,
{
    let empty = Attributes::new();
    let recorded = recorded.unwrap_or(&empty);
    let keys: BTreeSet<&String> = desired.keys().chain(recorded.keys()).collect();

    let mut changes = Vec::new();
    for key in keys {
        let before = recorded.get(key);
        let after = desired
            .get(key)
            .map(|v| v.try_resolve(&mut |r: &Reference| lookup(r).ok_or_else(|| r.clone())));

        let rendered_after = match &after {
            None => None,
            Some(Ok(value)) if Some(value) == before => continue,
            Some(Ok(value)) => Some(render(key, value, schema)),
            Some(Err(reference)) => Some(if schema.is_sensitive(key) {
                SENSITIVE.to_string()
            } else {
                format!("(known after apply: {reference})")
            }),
        };

        changes.push(AttributeChange {
            attribute: key.clone(),
            before: before.map(|v| render(key, v, schema)),
            after: rendered_after,
            forces_replace: schema.is_immutable(key),
        });
    }
    changes
}

fn render(key: &str, value: &Value, schema: &KindSchema) -> String {
    if schema.is_sensitive(key) {
        SENSITIVE.to_string()
    } else {
        value.to_string()
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub creates: usize,
    pub updates: usize,
    pub replaces: usize,
    pub deletes: usize,
    pub unchanged: usize,
}

impl DiffSummary {
    pub fn from_entries(entries: &[ChangeEntry]) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            match entry.operation {
                Operation::Create => summary.creates += 1,
                Operation::Update => summary.updates += 1,
                Operation::Replace => summary.replaces += 1,
                Operation::Delete => summary.deletes += 1,
                Operation::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group changed entries by resource kind
pub fn group_by_kind(entries: &[ChangeEntry]) -> BTreeMap<&str, Vec<&ChangeEntry>> {
    let mut groups: BTreeMap<&str, Vec<&ChangeEntry>> = BTreeMap::new();
    for entry in entries.iter().filter(|e| e.operation.is_change()) {
        groups.entry(entry.kind.as_str()).or_default().push(entry);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, Value)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn schema() -> KindSchema {
        let mut schema = KindSchema::default();
        schema.immutable.insert("engine".into());
        schema.sensitive.insert("password".into());
        schema
    }

    #[test]
    fn test_identical_is_empty() {
        let inputs = attrs(&[("engine", "mysql".into()), ("storage", Value::Int(10))]);
        assert!(diff_attributes(&inputs, Some(&inputs), &schema(), |_| None).is_empty());
    }

    #[test]
    fn test_changed_added_removed() {
        let desired = attrs(&[("engine", "postgres".into()), ("multi_az", true.into())]);
        let recorded = attrs(&[("engine", "mysql".into()), ("storage", Value::Int(10))]);
        let changes = diff_attributes(&desired, Some(&recorded), &schema(), |_| None);

        let names: Vec<_> = changes.iter().map(|c| c.attribute.as_str()).collect();
        assert_eq!(names, vec!["engine", "multi_az", "storage"]);
        assert!(changes[0].forces_replace);
        assert_eq!(changes[0].before.as_deref(), Some("\"mysql\""));
        assert_eq!(changes[1].before, None);
        assert_eq!(changes[2].after, None);
    }

    #[test]
    fn test_reference_resolved_against_lookup() {
        let desired = attrs(&[("vpc_id", Reference::new("vpc", "id").into())]);
        let recorded = attrs(&[("vpc_id", "vpc-1".into())]);

        let same = diff_attributes(&desired, Some(&recorded), &schema(), |_| Some("vpc-1".into()));
        assert!(same.is_empty());

        let unknown = diff_attributes(&desired, Some(&recorded), &schema(), |_| None);
        assert_eq!(
            unknown[0].after.as_deref(),
            Some("(known after apply: ${vpc.id})")
        );
    }

    #[test]
    fn test_sensitive_redacted() {
        let desired = attrs(&[("password", "hunter2".into())]);
        let recorded = attrs(&[("password", "password".into())]);
        let changes = diff_attributes(&desired, Some(&recorded), &schema(), |_| None);
        assert_eq!(changes[0].before.as_deref(), Some(SENSITIVE));
        assert_eq!(changes[0].after.as_deref(), Some(SENSITIVE));
    }
}
