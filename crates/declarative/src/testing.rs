//! Scripted provider shared by the planner and executor tests

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::context::CancelToken;
use crate::error::ProviderError;
use crate::provider::{KindSchema, Provider};
use crate::types::{Attributes, Value};

/// Records calls and returns scripted failures
///
/// Physical ids have the form `<node>#<n>`, so calls on existing resources
/// can be traced back to the node that created them.
#[derive(Default)]
pub(crate) struct FakeProvider {
    pub schema: KindSchema,
    pub delay: Duration,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, VecDeque<ProviderError>>>,
    sequence: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    cancel_during: Mutex<Option<(String, CancelToken)>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(schema: KindSchema) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    /// Sleep in every call
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Fail the next calls for `node` with the given errors, in order
    pub fn fail(&self, node: &str, errors: impl IntoIterator<Item = ProviderError>) {
        self.failures
            .lock()
            .unwrap()
            .entry(node.to_string())
            .or_default()
            .extend(errors);
    }

    /// Cancel `token` while a call for `node` is in flight
    pub fn cancel_during(&self, node: &str, token: CancelToken) {
        *self.cancel_during.lock().unwrap() = Some((node.to_string(), token));
    }

    /// Calls made so far, as `<op> <node>`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn enter(&self, op: &str, node: &str) -> Result<(), ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some((target, token)) = self.cancel_during.lock().unwrap().as_ref()
            && target == node
        {
            token.cancel();
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.calls.lock().unwrap().push(format!("{op} {node}"));
        let scripted = self
            .failures
            .lock()
            .unwrap()
            .get_mut(node)
            .and_then(VecDeque::pop_front);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match scripted {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn outputs(physical_id: String, inputs: &Attributes) -> Attributes {
        let mut outputs = inputs.clone();
        outputs.insert("id".into(), Value::String(physical_id));
        outputs
    }
}

fn node_of(physical_id: &str) -> &str {
    physical_id.split('#').next().unwrap_or(physical_id)
}

impl Provider for FakeProvider {
    fn create(&self, node_id: &str, inputs: &Attributes) -> Result<Attributes, ProviderError> {
        self.enter("create", node_id)?;
        let n = self.sequence.fetch_add(1, Ordering::SeqCst);
        Ok(Self::outputs(format!("{node_id}#{n}"), inputs))
    }

    fn update(&self, physical_id: &str, inputs: &Attributes) -> Result<Attributes, ProviderError> {
        self.enter("update", node_of(physical_id))?;
        Ok(Self::outputs(physical_id.to_string(), inputs))
    }

    fn delete(&self, physical_id: &str) -> Result<(), ProviderError> {
        self.enter("delete", node_of(physical_id))
    }

    fn schema(&self) -> &KindSchema {
        &self.schema
    }
}
