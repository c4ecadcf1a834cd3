//! Planner - diffs the desired graph against recorded state
//!
//! The result is a [`ChangeSet`]: one entry per declared or recorded
//! resource, in an order where creates and updates follow their
//! dependencies and deletes follow the deletes of their former dependents.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::diff::{AttributeChange, DiffSummary, diff_attributes};
use crate::error::{PlanError, StateError};
use crate::graph::ResourceGraph;
use crate::provider::ProviderRegistry;
use crate::state::{StateRecord, StateStore};
use crate::types::{Operation, Value};

/// How to treat a replace of a resource that others reference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacePolicy {
    /// Always allow replacement
    Allow,
    /// Honour the kind's `replace_while_referenced` flag
    #[default]
    Enforce,
}

/// Options for planning
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub replace_policy: ReplacePolicy,
}

/// One planned operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEntry {
    /// Resource id
    pub id: String,
    pub kind: String,
    pub operation: Operation,
    /// Topological depth within the change set
    pub rank: usize,
    /// Entries that must complete before this one starts
    pub waits_on: Vec<String>,
    /// Attribute differences behind the operation
    pub changes: Vec<AttributeChange>,
    /// The recorded dependency set no longer matches the declaration
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dependencies_changed: bool,
}

/// Ordered list of operations reconciling desired and recorded state
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeSet {
    pub entries: Vec<ChangeEntry>,
    /// Version stamped on records written by applying this change set
    pub generation: u64,
}

impl ChangeSet {
    pub fn get(&self, id: &str) -> Option<&ChangeEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn operation(&self, id: &str) -> Option<Operation> {
        self.get(id).map(|e| e.operation)
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_entries(&self.entries)
    }

    /// Check if applying would change anything
    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.operation.is_change())
    }

    /// Check if unchanged resources have outdated dependency records
    pub fn has_stale_dependencies(&self) -> bool {
        self.entries.iter().any(|e| e.dependencies_changed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let symbol = match entry.operation {
                Operation::Create => "+",
                Operation::Update => "~",
                Operation::Replace => "-/+",
                Operation::Delete => "-",
                Operation::NoOp => " ",
            };
            writeln!(f, "{symbol:>3} {} ({}) {}", entry.id, entry.kind, entry.operation)?;
            for change in &entry.changes {
                writeln!(
                    f,
                    "      {}: {} -> {}{}",
                    change.attribute,
                    change.before.as_deref().unwrap_or("(none)"),
                    change.after.as_deref().unwrap_or("(removed)"),
                    if change.forces_replace { " (forces replace)" } else { "" }
                )?;
            }
        }
        Ok(())
    }
}

/// Builds change sets
pub struct Planner<'a> {
    registry: &'a ProviderRegistry,
    options: PlanOptions,
}

/// A change set entry before ordering
struct Pending {
    id: String,
    kind: String,
    operation: Operation,
    changes: Vec<AttributeChange>,
    waits_on: BTreeSet<String>,
    dependencies_changed: bool,
}

impl<'a> Planner<'a> {
    pub fn new(registry: &'a ProviderRegistry) -> Self {
        Self {
            registry,
            options: PlanOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PlanOptions) -> Self {
        self.options = options;
        self
    }

    /// Plan the deletion of every recorded resource
    pub fn plan_destroy(&self, store: &dyn StateStore) -> Result<ChangeSet, PlanError> {
        self.plan(&ResourceGraph::default(), store)
    }

    /// Diff `graph` against `store` and order the resulting operations
    pub fn plan(&self, graph: &ResourceGraph, store: &dyn StateStore) -> Result<ChangeSet, PlanError> {
        if let Some(dangling) = graph.dangling().first() {
            return Err(PlanError::DanglingReference {
                from: dangling.from.clone(),
                target: dangling.target.clone(),
            });
        }

        let records = load_records(graph, store)?;
        let generation = records.values().map(|r| r.version).max().unwrap_or(0) + 1;

        let mut pending: Vec<Pending> = Vec::with_capacity(graph.len() + records.len());
        let mut operations: HashMap<&str, Operation> = HashMap::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        // Upstream operations must be known before a node's references can
        // be compared, so classify in topological order.
        for node in graph.topological_order() {
            let provider = self.registry.get(&node.kind).ok_or_else(|| PlanError::UnknownKind {
                id: node.id.clone(),
                kind: node.kind.clone(),
            })?;
            let schema = provider.schema();
            let record = records.get(node.id.as_str());

            let (operation, changes) = match record {
                None => (
                    Operation::Create,
                    diff_attributes(&node.inputs, None, schema, |r| {
                        known_output(&operations, &records, &r.node, &r.output)
                    }),
                ),
                Some(record) => {
                    let changes = diff_attributes(&node.inputs, Some(&record.inputs), schema, |r| {
                        known_output(&operations, &records, &r.node, &r.output)
                    });
                    let operation = if record.kind != node.kind
                        || changes.iter().any(|c| c.forces_replace)
                    {
                        Operation::Replace
                    } else if changes.is_empty() {
                        Operation::NoOp
                    } else {
                        Operation::Update
                    };
                    (operation, changes)
                }
            };

            if operation == Operation::Replace
                && self.options.replace_policy == ReplacePolicy::Enforce
                && !schema.replace_while_referenced
            {
                let dependents = graph.dependents_of(&node.id);
                if !dependents.is_empty() {
                    return Err(PlanError::ReplacePolicy {
                        id: node.id.clone(),
                        kind: node.kind.clone(),
                        dependents: dependents.into_iter().map(String::from).collect(),
                    });
                }
            }

            let dependencies_changed =
                record.is_some_and(|r| node.dependencies_differ(&r.dependencies));

            log::debug!("Planned {} {} ({} changes)", operation, node.id, changes.len());
            operations.insert(node.id.as_str(), operation);
            positions.insert(node.id.clone(), node.index);
            pending.push(Pending {
                id: node.id.clone(),
                kind: node.kind.clone(),
                operation,
                changes,
                waits_on: graph
                    .dependencies_of(&node.id)
                    .into_iter()
                    .map(String::from)
                    .collect(),
                dependencies_changed,
            });
        }

        // Recorded but no longer declared
        let mut position = graph.len();
        for (id, record) in records.iter().filter(|(id, _)| !graph.contains(id)) {
            if !self.registry.contains(&record.kind) {
                return Err(PlanError::UnknownKind {
                    id: id.clone(),
                    kind: record.kind.clone(),
                });
            }
            log::debug!("Planned delete {id}");
            positions.insert(id.clone(), position);
            position += 1;
            pending.push(Pending {
                id: id.clone(),
                kind: record.kind.clone(),
                operation: Operation::Delete,
                changes: Vec::new(),
                waits_on: BTreeSet::new(),
                dependencies_changed: false,
            });
        }

        // A delete waits for everything that depended on the resource when
        // it was last applied: deletes of removed dependents, and updates of
        // remaining ones that drop the dependency. A replace also waits for
        // the deletes of its former dependents.
        let planned: HashMap<String, Operation> =
            pending.iter().map(|p| (p.id.clone(), p.operation)).collect();
        for (dependent, record) in &records {
            let dependent_op = planned.get(dependent).copied();
            for dependency in &record.dependencies {
                let waits = match planned.get(dependency) {
                    Some(Operation::Delete) => true,
                    Some(Operation::Replace) => dependent_op == Some(Operation::Delete),
                    _ => false,
                };
                if !waits {
                    continue;
                }
                if let Some(entry) = pending.iter_mut().find(|p| &p.id == dependency) {
                    entry.waits_on.insert(dependent.clone());
                }
            }
        }

        let entries = order(pending, &positions)?;
        Ok(ChangeSet {
            entries,
            generation,
        })
    }
}

/// Read and validate records for declared and recorded ids
fn load_records(
    graph: &ResourceGraph,
    store: &dyn StateStore,
) -> Result<BTreeMap<String, StateRecord>, StateError> {
    let ids: BTreeSet<String> = graph
        .nodes()
        .iter()
        .map(|n| n.id.clone())
        .chain(store.ids()?)
        .collect();

    let mut records = BTreeMap::new();
    for id in ids {
        if let Some(record) = store.read(&id)? {
            record.validate(&id)?;
            records.insert(id, record);
        }
    }
    Ok(records)
}

/// Output of an upstream resource as far as it is known at plan time
///
/// Resources being created or replaced have no usable outputs yet.
fn known_output(
    operations: &HashMap<&str, Operation>,
    records: &BTreeMap<String, StateRecord>,
    node: &str,
    output: &str,
) -> Option<Value> {
    match operations.get(node) {
        Some(Operation::Update | Operation::NoOp) => records
            .get(node)
            .and_then(|r| r.outputs.get(output))
            .cloned(),
        _ => None,
    }
}

/// Kahn's algorithm over the pending entries, ties broken by position
fn order(
    pending: Vec<Pending>,
    positions: &HashMap<String, usize>,
) -> Result<Vec<ChangeEntry>, StateError> {
    let mut by_position: BTreeMap<usize, Pending> = pending
        .into_iter()
        .map(|p| (positions[&p.id], p))
        .collect();

    let mut in_degree: HashMap<usize, usize> = HashMap::new();
    let mut waiting: HashMap<usize, Vec<usize>> = HashMap::new();
    for (&position, entry) in &by_position {
        in_degree.insert(position, entry.waits_on.len());
        for dependency in &entry.waits_on {
            waiting.entry(positions[dependency]).or_default().push(position);
        }
    }

    let mut ready: BTreeSet<usize> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(&position, _)| position)
        .collect();
    let mut ranks: HashMap<String, usize> = HashMap::new();
    let mut entries = Vec::with_capacity(by_position.len());

    while let Some(position) = ready.pop_first() {
        let Some(entry) = by_position.remove(&position) else {
            continue;
        };
        let rank = entry
            .waits_on
            .iter()
            .filter_map(|d| ranks.get(d))
            .map(|r| r + 1)
            .max()
            .unwrap_or(0);
        ranks.insert(entry.id.clone(), rank);

        for dependent in waiting.get(&position).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(*dependent);
                }
            }
        }

        entries.push(ChangeEntry {
            id: entry.id,
            kind: entry.kind,
            operation: entry.operation,
            rank,
            waits_on: entry.waits_on.into_iter().collect(),
            changes: entry.changes,
            dependencies_changed: entry.dependencies_changed,
        });
    }

    if !by_position.is_empty() {
        let stuck: Vec<String> = by_position.into_values().map(|p| p.id).collect();
        return Err(StateError::corruption(format!(
            "recorded dependencies form a cycle among: {}",
            stuck.join(", ")
        )));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::KindSchema;
    use crate::resource::Declaration;
    use crate::state::MemoryStore;
    use crate::testing::FakeProvider;
    use crate::types::{Attributes, Reference};
    use std::sync::Arc;

    fn registry(schema: KindSchema) -> ProviderRegistry {
        ProviderRegistry::new().with_fallback(Arc::new(FakeProvider::with_schema(schema)))
    }

    fn immutable_cidr() -> KindSchema {
        let mut schema = KindSchema::default();
        schema.immutable.insert("cidr".into());
        schema
    }

    fn record(id: &str, inputs: &[(&str, &str)], dependencies: &[&str], version: u64) -> StateRecord {
        let inputs: Attributes = inputs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect();
        let mut outputs = inputs.clone();
        outputs.insert("id".into(), format!("{id}#0").into());
        StateRecord {
            kind: "test".into(),
            inputs,
            outputs,
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            version,
        }
    }

    fn store(records: Vec<(&str, StateRecord)>) -> MemoryStore {
        MemoryStore::from(
            records
                .into_iter()
                .map(|(id, r)| (id.to_string(), r))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn ids(changeset: &ChangeSet) -> Vec<&str> {
        changeset.entries.iter().map(|e| e.id.as_str()).collect()
    }

    /// vpc <- subnet <- app, where app only depends on subnet explicitly
    fn network(cidr: &str) -> ResourceGraph {
        ResourceGraph::build(vec![
            Declaration::new("vpc", "test").with("cidr", cidr),
            Declaration::new("subnet", "test").with("vpc_id", Reference::new("vpc", "id")),
            Declaration::new("app", "test")
                .with("name", "web")
                .depends_on("subnet"),
        ])
        .unwrap()
    }

    fn network_state() -> MemoryStore {
        let mut subnet = record("subnet", &[("vpc_id", "vpc#0")], &["vpc"], 1);
        subnet.outputs.insert("id".into(), "subnet#0".into());
        store(vec![
            ("vpc", record("vpc", &[("cidr", "10.0.0.0/16")], &[], 1)),
            ("subnet", subnet),
            ("app", record("app", &[("name", "web")], &["subnet"], 1)),
        ])
    }

    #[test]
    fn test_empty_state_creates_in_dependency_order() {
        let registry = registry(KindSchema::default());
        let changeset = Planner::new(&registry)
            .plan(&network("10.0.0.0/16"), &MemoryStore::new())
            .unwrap();

        assert_eq!(ids(&changeset), vec!["vpc", "subnet", "app"]);
        assert!(changeset.entries.iter().all(|e| e.operation == Operation::Create));
        let ranks: Vec<_> = changeset.entries.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![0, 1, 2]);
        assert_eq!(changeset.get("subnet").unwrap().waits_on, vec!["vpc".to_string()]);
        assert_eq!(changeset.generation, 1);
    }

    #[test]
    fn test_matching_state_is_all_no_op() {
        let registry = registry(immutable_cidr());
        let changeset = Planner::new(&registry)
            .plan(&network("10.0.0.0/16"), &network_state())
            .unwrap();

        assert!(!changeset.has_changes());
        assert_eq!(changeset.summary().unchanged, 3);
        assert_eq!(changeset.generation, 2);
    }

    #[test]
    fn test_mutable_change_is_update() {
        let registry = registry(KindSchema::default());
        let changeset = Planner::new(&registry)
            .plan(&network("10.1.0.0/16"), &network_state())
            .unwrap();

        assert_eq!(changeset.operation("vpc"), Some(Operation::Update));
        // Outputs of an update are compared using recorded values
        assert_eq!(changeset.operation("subnet"), Some(Operation::NoOp));
        let change = &changeset.get("vpc").unwrap().changes[0];
        assert_eq!(change.attribute, "cidr");
        assert!(!change.forces_replace);
    }

    #[test]
    fn test_replace_propagates_to_referencing_resources_only() {
        let registry = registry(immutable_cidr());
        let changeset = Planner::new(&registry)
            .plan(&network("10.1.0.0/16"), &network_state())
            .unwrap();

        assert_eq!(changeset.operation("vpc"), Some(Operation::Replace));
        assert_eq!(changeset.operation("subnet"), Some(Operation::Update));
        assert_eq!(changeset.operation("app"), Some(Operation::NoOp));

        let subnet = changeset.get("subnet").unwrap();
        assert_eq!(
            subnet.changes[0].after.as_deref(),
            Some("(known after apply: ${vpc.id})")
        );
        assert_eq!(ids(&changeset), vec!["vpc", "subnet", "app"]);
    }

    #[test]
    fn test_kind_change_forces_replace() {
        let registry = registry(KindSchema::default());
        let graph = ResourceGraph::build(vec![
            Declaration::new("vpc", "other").with("cidr", "10.0.0.0/16"),
        ])
        .unwrap();
        let state = store(vec![("vpc", record("vpc", &[("cidr", "10.0.0.0/16")], &[], 1))]);
        let changeset = Planner::new(&registry).plan(&graph, &state).unwrap();
        assert_eq!(changeset.operation("vpc"), Some(Operation::Replace));
    }

    #[test]
    fn test_removed_resources_deleted_dependents_first() {
        let registry = registry(KindSchema::default());
        let graph = ResourceGraph::build(vec![
            Declaration::new("vpc", "test").with("cidr", "10.0.0.0/16"),
        ])
        .unwrap();
        let changeset = Planner::new(&registry).plan(&graph, &network_state()).unwrap();

        assert_eq!(changeset.operation("vpc"), Some(Operation::NoOp));
        assert_eq!(changeset.operation("subnet"), Some(Operation::Delete));
        assert_eq!(changeset.operation("app"), Some(Operation::Delete));

        let position = |id: &str| ids(&changeset).iter().position(|i| *i == id).unwrap();
        assert!(position("app") < position("subnet"));
        assert_eq!(changeset.get("subnet").unwrap().waits_on, vec!["app".to_string()]);
    }

    #[test]
    fn test_removing_middle_resource_leaves_neighbours_unchanged() {
        // vpc <- subnet <- app; subnet goes away along with app's link to it
        let registry = registry(KindSchema::default());
        let graph = ResourceGraph::build(vec![
            Declaration::new("vpc", "test").with("cidr", "10.0.0.0/16"),
            Declaration::new("app", "test").with("name", "web"),
        ])
        .unwrap();
        let changeset = Planner::new(&registry).plan(&graph, &network_state()).unwrap();

        assert_eq!(changeset.operation("vpc"), Some(Operation::NoOp));
        assert_eq!(changeset.operation("app"), Some(Operation::NoOp));
        assert_eq!(changeset.operation("subnet"), Some(Operation::Delete));
        assert_eq!(changeset.summary().deletes, 1);
        assert_eq!(changeset.get("subnet").unwrap().waits_on, vec!["app".to_string()]);

        let position = |id: &str| ids(&changeset).iter().position(|i| *i == id).unwrap();
        assert!(position("app") < position("subnet"));

        assert!(changeset.get("app").unwrap().dependencies_changed);
        assert!(!changeset.get("vpc").unwrap().dependencies_changed);
        assert!(changeset.has_stale_dependencies());
    }

    #[test]
    fn test_added_dependency_is_flagged_without_changes() {
        let registry = registry(KindSchema::default());
        let graph = ResourceGraph::build(vec![
            Declaration::new("vpc", "test").with("cidr", "10.0.0.0/16"),
            Declaration::new("subnet", "test").with("vpc_id", Reference::new("vpc", "id")),
            Declaration::new("app", "test")
                .with("name", "web")
                .depends_on("subnet")
                .depends_on("vpc"),
        ])
        .unwrap();
        let changeset = Planner::new(&registry).plan(&graph, &network_state()).unwrap();

        assert!(!changeset.has_changes());
        assert!(changeset.get("app").unwrap().dependencies_changed);
        assert!(!changeset.get("subnet").unwrap().dependencies_changed);
    }

    #[test]
    fn test_replace_waits_for_deletes_of_former_dependents() {
        let registry = registry(immutable_cidr());
        let graph = ResourceGraph::build(vec![
            Declaration::new("vpc", "test").with("cidr", "10.1.0.0/16"),
        ])
        .unwrap();
        let changeset = Planner::new(&registry).plan(&graph, &network_state()).unwrap();

        assert_eq!(changeset.operation("vpc"), Some(Operation::Replace));
        assert_eq!(ids(&changeset), vec!["app", "subnet", "vpc"]);
        assert_eq!(changeset.get("vpc").unwrap().waits_on, vec!["subnet".to_string()]);
    }

    #[test]
    fn test_plan_destroy_reverses_dependencies() {
        let registry = registry(KindSchema::default());
        let changeset = Planner::new(&registry).plan_destroy(&network_state()).unwrap();

        assert_eq!(ids(&changeset), vec!["app", "subnet", "vpc"]);
        assert!(changeset.entries.iter().all(|e| e.operation == Operation::Delete));
        assert_eq!(changeset.summary().deletes, 3);
    }

    #[test]
    fn test_destroy_of_empty_state_is_empty() {
        let registry = registry(KindSchema::default());
        let changeset = Planner::new(&registry).plan_destroy(&MemoryStore::new()).unwrap();
        assert!(changeset.is_empty());
    }

    #[test]
    fn test_replace_policy() {
        let mut schema = immutable_cidr();
        schema.replace_while_referenced = false;
        let registry = registry(schema);
        let graph = network("10.1.0.0/16");

        let err = Planner::new(&registry).plan(&graph, &network_state()).unwrap_err();
        match err {
            PlanError::ReplacePolicy { id, dependents, .. } => {
                assert_eq!(id, "vpc");
                assert_eq!(dependents, vec!["subnet".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let changeset = Planner::new(&registry)
            .with_options(PlanOptions {
                replace_policy: ReplacePolicy::Allow,
            })
            .plan(&graph, &network_state())
            .unwrap();
        assert_eq!(changeset.operation("vpc"), Some(Operation::Replace));
    }

    #[test]
    fn test_dangling_reference_rejected() {
        let registry = registry(KindSchema::default());
        let graph = ResourceGraph::build(vec![
            Declaration::new("subnet", "test").with("vpc_id", Reference::new("vpc", "id")),
        ])
        .unwrap();
        let err = Planner::new(&registry).plan(&graph, &MemoryStore::new()).unwrap_err();
        assert!(matches!(err, PlanError::DanglingReference { ref target, .. } if target == "vpc"));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let registry = ProviderRegistry::new();
        let err = Planner::new(&registry)
            .plan(&network("10.0.0.0/16"), &MemoryStore::new())
            .unwrap_err();
        assert!(matches!(err, PlanError::UnknownKind { .. }));
    }

    #[test]
    fn test_corrupt_record_rejected() {
        let registry = registry(KindSchema::default());
        let mut broken = record("vpc", &[("cidr", "10.0.0.0/16")], &[], 1);
        broken.outputs.clear();
        let err = Planner::new(&registry)
            .plan(&network("10.0.0.0/16"), &store(vec![("vpc", broken)]))
            .unwrap_err();
        assert!(matches!(err, PlanError::State(StateError::Corruption { .. })));
    }

    #[test]
    fn test_display_marks_operations() {
        let registry = registry(immutable_cidr());
        let changeset = Planner::new(&registry)
            .plan(&network("10.1.0.0/16"), &network_state())
            .unwrap();
        let rendered = changeset.to_string();
        assert!(rendered.contains("-/+ vpc (test) replace"));
        assert!(rendered.contains("(forces replace)"));
    }
}
