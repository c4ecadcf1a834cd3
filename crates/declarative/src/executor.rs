//! Execution engine - applies a change set with dependency-gated parallelism
//!
//! Every entry carries a counter of unfinished entries it waits on. Entries
//! whose counter is zero are spawned on a bounded `rayon` pool; when an
//! entry finishes, the worker decrements the counters of the entries waiting
//! on it and spawns those that reach zero. A failed or skipped entry poisons
//! its waiters, which then finish as skipped without calling the provider.

use rayon::Scope;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use crate::context::{CancelToken, ConfirmCallback, ProgressCallback};
use crate::diff::diff_attributes;
use crate::error::{ExecuteError, NodeError, ProviderError};
use crate::graph::ResourceGraph;
use crate::planner::{ChangeEntry, ChangeSet};
use crate::provider::{Provider, ProviderRegistry};
use crate::resource::ResourceNode;
use crate::retry::with_retry;
use crate::state::{StateRecord, StateStore};
use crate::types::{Attributes, ExecuteOptions, ExecuteSummary, NodeStatus, Operation, Reference, Value};

/// Outcome for a single resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReport {
    pub id: String,
    pub kind: String,
    /// Operation performed; may differ from the plan when a no-op was promoted
    pub operation: Operation,
    pub status: NodeStatus,
    #[serde(skip)]
    pub error: Option<NodeError>,
    /// Why the resource was skipped
    pub reason: Option<String>,
    /// Provider call attempts made for the last call
    pub attempts: u32,
}

impl NodeReport {
    fn planned(entry: &ChangeEntry) -> Self {
        Self {
            id: entry.id.clone(),
            kind: entry.kind.clone(),
            operation: entry.operation,
            status: NodeStatus::Planned,
            error: None,
            reason: None,
            attempts: 0,
        }
    }
}

/// Result of executing a change set
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    /// Per-resource outcomes, in change set order
    pub nodes: Vec<NodeReport>,
    pub summary: ExecuteSummary,
    /// False when the user declined to proceed
    pub confirmed: bool,
    pub cancelled: bool,
}

impl ApplyReport {
    fn from_nodes(nodes: Vec<NodeReport>, confirmed: bool, cancelled: bool) -> Self {
        let mut summary = ExecuteSummary::default();
        for node in &nodes {
            summary.add(node.operation, node.status);
        }
        Self {
            nodes,
            summary,
            confirmed,
            cancelled,
        }
    }

    pub fn get(&self, id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn status(&self, id: &str) -> Option<NodeStatus> {
        self.get(id).map(|n| n.status)
    }

    /// Check if every resource reached `applied`
    pub fn is_success(&self) -> bool {
        self.confirmed && self.summary.is_success()
    }

    /// Resources that failed
    pub fn failures(&self) -> impl Iterator<Item = &NodeReport> {
        self.nodes.iter().filter(|n| n.status == NodeStatus::Failed)
    }
}

/// Applies change sets through registered providers
pub struct Executor<'a> {
    registry: &'a ProviderRegistry,
    options: ExecuteOptions,
    cancel: CancelToken,
}

impl<'a> Executor<'a> {
    pub fn new(registry: &'a ProviderRegistry) -> Self {
        Self {
            registry,
            options: ExecuteOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    /// Use an externally controlled cancellation token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Execute a change set
    ///
    /// `graph` must be the graph the change set was planned from. Records
    /// are written to `store` as each resource completes.
    pub fn execute<P, C>(
        &self,
        graph: &ResourceGraph,
        changeset: &ChangeSet,
        store: &dyn StateStore,
        progress: &P,
        confirm: &mut C,
    ) -> Result<ApplyReport, ExecuteError>
    where
        P: ProgressCallback,
        C: ConfirmCallback,
    {
        let planned: Vec<NodeReport> = changeset.entries.iter().map(NodeReport::planned).collect();

        if !changeset.has_changes() {
            record_dependencies(graph, changeset, store)?;
            let nodes = planned
                .into_iter()
                .map(|n| NodeReport {
                    status: NodeStatus::Applied,
                    ..n
                })
                .collect();
            return Ok(ApplyReport::from_nodes(nodes, true, false));
        }

        let prompt = format!("Apply {} changes?", changeset.summary().total());
        let confirmed = confirm
            .confirm(&prompt)
            .map_err(|e| ExecuteError::Confirm(format!("{e:#}")))?;
        if !confirmed {
            let nodes = planned
                .into_iter()
                .map(|n| NodeReport {
                    status: NodeStatus::Skipped,
                    reason: Some("not confirmed".into()),
                    ..n
                })
                .collect();
            return Ok(ApplyReport::from_nodes(nodes, false, false));
        }

        let work = self.prepare(graph, changeset, store)?;
        let positions: HashMap<&str, usize> = changeset
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.as_str(), i))
            .collect();

        let mut dependents = vec![Vec::new(); changeset.len()];
        let mut pending = Vec::with_capacity(changeset.len());
        for (idx, entry) in changeset.entries.iter().enumerate() {
            let mut count = 0;
            for dependency in &entry.waits_on {
                let &dep = positions
                    .get(dependency.as_str())
                    .ok_or_else(|| ExecuteError::UnknownResource(dependency.clone()))?;
                dependents[dep].push(idx);
                count += 1;
            }
            pending.push(AtomicUsize::new(count));
        }

        let run = Run {
            work,
            dependents,
            poisoned: (0..changeset.len()).map(|_| AtomicBool::new(false)).collect(),
            pending,
            outputs: RwLock::new(HashMap::new()),
            board: Mutex::new(planned),
            store,
            progress,
            options: &self.options,
            cancel: &self.cancel,
            generation: changeset.generation,
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .thread_name(|i| format!("apply-{i}"))
            .build()
            .map_err(|e| ExecuteError::Pool(e.to_string()))?;

        progress.on_start(changeset.len());
        log::info!(
            "Applying {} entries with {} workers",
            changeset.len(),
            self.options.jobs.max(1)
        );

        pool.scope(|scope| {
            for (idx, counter) in run.pending.iter().enumerate() {
                if counter.load(Ordering::Acquire) == 0 {
                    run.schedule(scope, idx);
                }
            }
        });

        let nodes = match run.board.into_inner() {
            Ok(nodes) => nodes,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(ApplyReport::from_nodes(nodes, true, self.cancel.is_cancelled()))
    }

    /// Pair each entry with its node, record and providers
    fn prepare<'g>(
        &self,
        graph: &'g ResourceGraph,
        changeset: &'g ChangeSet,
        store: &dyn StateStore,
    ) -> Result<Vec<Work<'g>>, ExecuteError> {
        changeset
            .entries
            .iter()
            .map(|entry| {
                let node = graph.node(&entry.id);
                let record = store.read(&entry.id)?;
                if node.is_none() && record.is_none() {
                    return Err(ExecuteError::UnknownResource(entry.id.clone()));
                }

                let lookup = |kind: &str| {
                    self.registry
                        .get(kind)
                        .ok_or_else(|| ExecuteError::UnknownKind {
                            id: entry.id.clone(),
                            kind: kind.to_string(),
                        })
                };
                let provider = lookup(node.map_or(entry.kind.as_str(), |n| n.kind.as_str()))?;
                let previous = match &record {
                    Some(r) => Some(lookup(&r.kind)?),
                    None => None,
                };

                Ok(Work {
                    entry,
                    node,
                    record,
                    provider,
                    previous,
                })
            })
            .collect()
    }
}

/// Everything a worker needs to apply one entry
struct Work<'a> {
    entry: &'a ChangeEntry,
    /// Declared node; `None` for deletes
    node: Option<&'a ResourceNode>,
    record: Option<StateRecord>,
    /// Provider for the declared kind
    provider: Arc<dyn Provider>,
    /// Provider for the recorded kind
    previous: Option<Arc<dyn Provider>>,
}

/// Shared state of one execution
struct Run<'a, P> {
    work: Vec<Work<'a>>,
    dependents: Vec<Vec<usize>>,
    /// Unfinished entries each entry waits on
    pending: Vec<AtomicUsize>,
    /// Set when an entry waited on did not apply
    poisoned: Vec<AtomicBool>,
    /// Outputs of completed entries, readable by their dependents
    outputs: RwLock<HashMap<String, Attributes>>,
    board: Mutex<Vec<NodeReport>>,
    store: &'a dyn StateStore,
    progress: &'a P,
    options: &'a ExecuteOptions,
    cancel: &'a CancelToken,
    generation: u64,
}

impl<'a, P: ProgressCallback> Run<'a, P> {
    fn schedule<'s>(&'s self, scope: &Scope<'s>, idx: usize) {
        scope.spawn(move |scope| self.run_entry(scope, idx));
    }

    fn run_entry<'s>(&'s self, scope: &Scope<'s>, idx: usize) {
        let report = if self.cancel.is_cancelled() {
            self.skipped(idx, "run cancelled")
        } else if self.poisoned[idx].load(Ordering::Acquire) {
            self.skipped(idx, "a dependency did not apply")
        } else {
            self.apply(idx)
        };

        let applied = report.status == NodeStatus::Applied;
        self.progress.on_node_complete(&report);
        self.update_board(idx, |slot| *slot = report);

        for &dependent in &self.dependents[idx] {
            if !applied {
                self.poisoned[dependent].store(true, Ordering::Release);
            }
            if self.pending[dependent].fetch_sub(1, Ordering::AcqRel) == 1 {
                self.schedule(scope, dependent);
            }
        }
    }

    fn skipped(&self, idx: usize, reason: &str) -> NodeReport {
        log::debug!("Skipping {}: {}", self.work[idx].entry.id, reason);
        NodeReport {
            status: NodeStatus::Skipped,
            reason: Some(reason.to_string()),
            ..NodeReport::planned(self.work[idx].entry)
        }
    }

    fn apply(&self, idx: usize) -> NodeReport {
        let work = &self.work[idx];
        let entry = work.entry;
        self.update_board(idx, |slot| slot.status = NodeStatus::Applying);
        if entry.operation.is_change() {
            self.progress.on_node_start(&entry.id, entry.operation);
        }

        let mut attempts = 0;
        let result = match entry.operation {
            Operation::Delete => self.delete(work, &mut attempts).map(|()| Operation::Delete),
            planned => self.converge(work, planned, &mut attempts),
        };

        let mut report = NodeReport::planned(entry);
        report.attempts = attempts;
        match result {
            Ok(operation) => {
                log::debug!("{} {}: applied", operation, entry.id);
                report.operation = operation;
                report.status = NodeStatus::Applied;
            }
            Err(error) => {
                log::warn!("{} {} failed: {}", entry.operation, entry.id, error);
                report.status = NodeStatus::Failed;
                report.error = Some(error);
            }
        }
        report
    }

    /// Create, update or replace a declared resource, returning what was done
    fn converge(
        &self,
        work: &Work<'_>,
        planned: Operation,
        attempts: &mut u32,
    ) -> Result<Operation, NodeError> {
        let Some(node) = work.node else {
            return Err(NodeError::State(format!("{} is not declared", work.entry.id)));
        };
        let inputs = self.resolve(node)?;

        let operation = match (planned, &work.record) {
            (Operation::NoOp, Some(record)) if record.inputs == inputs => {
                if node.dependencies_differ(&record.dependencies) {
                    self.store.write(
                        &node.id,
                        StateRecord {
                            dependencies: dependency_list(node),
                            version: self.generation,
                            ..record.clone()
                        },
                    )?;
                    log::debug!("{} dependencies recorded", node.id);
                }
                self.publish(&node.id, record.outputs.clone());
                return Ok(Operation::NoOp);
            }
            // An upstream update changed an output this resource consumes
            (Operation::NoOp, Some(record)) => {
                let schema = work.provider.schema();
                let changes = diff_attributes(&inputs, Some(&record.inputs), schema, |_| None);
                let promoted = if changes.iter().any(|c| c.forces_replace) {
                    Operation::Replace
                } else {
                    Operation::Update
                };
                log::info!("{} promoted to {} after upstream changes", node.id, promoted);
                promoted
            }
            (Operation::NoOp, None) => Operation::Create,
            (other, _) => other,
        };

        let outputs = match (operation, &work.record) {
            (Operation::Update, Some(record)) => {
                let physical_id = physical_id(record, &node.id)?;
                let inputs = inputs.clone();
                self.call(&node.id, &work.provider, attempts, move |p| {
                    p.update(&physical_id, &inputs)
                })?
            }
            (Operation::Replace, Some(_)) => {
                self.delete(work, attempts)?;
                self.create(node, &work.provider, &inputs, attempts)?
            }
            _ => self.create(node, &work.provider, &inputs, attempts)?,
        };

        if outputs.get("id").and_then(Value::as_str).is_none() {
            return Err(NodeError::Provider(ProviderError::new(
                "provider returned no `id` output",
            )));
        }

        let record = StateRecord {
            kind: node.kind.clone(),
            inputs,
            outputs: outputs.clone(),
            dependencies: dependency_list(node),
            version: self.generation,
        };
        self.store.write(&node.id, record)?;
        self.publish(&node.id, outputs);
        Ok(operation)
    }

    fn create(
        &self,
        node: &ResourceNode,
        provider: &Arc<dyn Provider>,
        inputs: &Attributes,
        attempts: &mut u32,
    ) -> Result<Attributes, NodeError> {
        let id = node.id.clone();
        let inputs = inputs.clone();
        self.call(&node.id, provider, attempts, move |p| p.create(&id, &inputs))
    }

    /// Delete the recorded resource and its record
    fn delete(&self, work: &Work<'_>, attempts: &mut u32) -> Result<(), NodeError> {
        let id = &work.entry.id;
        let (Some(record), Some(provider)) = (&work.record, &work.previous) else {
            return Ok(());
        };
        let physical_id = physical_id(record, id)?;
        self.call(id, provider, attempts, move |p| p.delete(&physical_id))?;
        self.store.delete(id)?;
        Ok(())
    }

    /// Resolve references in a node's inputs from published outputs
    fn resolve(&self, node: &ResourceNode) -> Result<Attributes, NodeError> {
        let outputs = match self.outputs.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut lookup = |r: &Reference| -> Result<Value, NodeError> {
            let produced = outputs.get(&r.node).ok_or_else(|| NodeError::Resolution {
                reference: r.clone(),
                reason: "resource has not been applied".into(),
            })?;
            produced.get(&r.output).cloned().ok_or_else(|| NodeError::Resolution {
                reference: r.clone(),
                reason: format!("{} has no output named {}", r.node, r.output),
            })
        };
        node.inputs
            .iter()
            .map(|(k, v)| v.try_resolve(&mut lookup).map(|v| (k.clone(), v)))
            .collect()
    }

    fn publish(&self, id: &str, outputs: Attributes) {
        match self.outputs.write() {
            Ok(mut guard) => guard.insert(id.to_string(), outputs),
            Err(poisoned) => poisoned.into_inner().insert(id.to_string(), outputs),
        };
    }

    /// Call the provider with retry and timeout
    fn call<T, F>(
        &self,
        id: &str,
        provider: &Arc<dyn Provider>,
        attempts: &mut u32,
        op: F,
    ) -> Result<T, NodeError>
    where
        T: Send + 'static,
        F: Fn(&dyn Provider) -> Result<T, ProviderError> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let timeout = self.options.call_timeout;
        with_retry(
            &self.options.retry,
            self.cancel,
            |error: &NodeError| match error {
                NodeError::Timeout(_) => true,
                NodeError::Provider(e) => provider.is_retryable(e),
                _ => false,
            },
            |attempt, error, delay| {
                log::warn!("{id}: attempt {attempt} failed ({error}), retrying in {delay:?}");
                self.progress.on_retry(id, attempt, error, delay);
            },
            |attempt| {
                *attempts = attempt;
                invoke(provider, &op, timeout)
            },
        )
    }

    fn update_board(&self, idx: usize, f: impl FnOnce(&mut NodeReport)) {
        match self.board.lock() {
            Ok(mut board) => f(&mut board[idx]),
            Err(poisoned) => f(&mut poisoned.into_inner()[idx]),
        }
    }
}

fn dependency_list(node: &ResourceNode) -> Vec<String> {
    node.dependency_ids().into_iter().map(String::from).collect()
}

/// Rewrite the dependency sets of unchanged resources
///
/// No provider is called; only the records change.
fn record_dependencies(
    graph: &ResourceGraph,
    changeset: &ChangeSet,
    store: &dyn StateStore,
) -> Result<(), ExecuteError> {
    for entry in changeset.entries.iter().filter(|e| e.dependencies_changed) {
        let (Some(node), Some(record)) = (graph.node(&entry.id), store.read(&entry.id)?) else {
            continue;
        };
        store.write(
            &entry.id,
            StateRecord {
                dependencies: dependency_list(node),
                version: changeset.generation,
                ..record
            },
        )?;
        log::debug!("{} dependencies recorded", entry.id);
    }
    Ok(())
}

fn physical_id(record: &StateRecord, id: &str) -> Result<String, NodeError> {
    record
        .physical_id()
        .map(String::from)
        .ok_or_else(|| NodeError::State(format!("record for {id} has no physical id")))
}

/// Run a single provider call, bounded by `timeout` when set
///
/// A timed-out call keeps running on its own thread; its result is dropped.
fn invoke<T, F>(
    provider: &Arc<dyn Provider>,
    op: &Arc<F>,
    timeout: Option<Duration>,
) -> Result<T, NodeError>
where
    T: Send + 'static,
    F: Fn(&dyn Provider) -> Result<T, ProviderError> + Send + Sync + 'static,
{
    let Some(timeout) = timeout else {
        return (**op)(provider.as_ref()).map_err(NodeError::Provider);
    };

    let (tx, rx) = mpsc::channel();
    let provider = Arc::clone(provider);
    let op = Arc::clone(op);
    thread::spawn(move || {
        let _ = tx.send((*op)(provider.as_ref()));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result.map_err(NodeError::Provider),
        Err(RecvTimeoutError::Timeout) => Err(NodeError::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(NodeError::Provider(ProviderError::new(
            "provider call panicked",
        ))),
    }
}
