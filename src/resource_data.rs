//! The per-operation view of one resource instance.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::classify::ServiceErrors;
use crate::diff::{attribute_values_equal, values_equal};
use crate::error::ProviderError;
use crate::schema::{Schema, SchemaEntry};
use crate::timeouts::{Timeouts, TIMEOUTS_KEY};
use crate::types::Operation;
use crate::value::{Value, NULL};

/// Mutable view of a resource instance during one lifecycle operation.
///
/// Reads are layered: values written with [`set`](Self::set) win over the
/// planned state, which wins over the prior state. Callbacks read the
/// desired configuration through [`get`](Self::get) and record what the API
/// reports through `set`.
#[derive(Debug, Clone)]
pub struct ResourceData {
    resource_type: String,
    schema: Arc<Schema>,
    operation: Operation,
    id: String,
    prior: Option<BTreeMap<String, Value>>,
    planned: Option<BTreeMap<String, Value>>,
    set: BTreeMap<String, Value>,
    timeouts_block: Option<Value>,
    new_resource: bool,
    timeouts: Timeouts,
    cancel: CancellationToken,
    service: &'static ServiceErrors,
}

impl ResourceData {
    pub fn new(resource_type: impl Into<String>, schema: Arc<Schema>, operation: Operation) -> Self {
        Self {
            resource_type: resource_type.into(),
            schema,
            operation,
            id: String::new(),
            prior: None,
            planned: None,
            set: BTreeMap::new(),
            timeouts_block: None,
            new_resource: false,
            timeouts: Timeouts::default(),
            cancel: CancellationToken::new(),
            service: ServiceErrors::generic(),
        }
    }

    /// Seed the prior state. Its `id` becomes the resource id.
    pub fn with_prior(mut self, state: &Value) -> Self {
        if let Some(mut map) = state.as_map().cloned() {
            if let Some(block) = map.remove(TIMEOUTS_KEY) {
                self.timeouts_block = Some(block);
            }
            if let Some(Value::String(id)) = map.get("id") {
                self.id = id.clone();
            }
            self.prior = Some(map);
        }
        self
    }

    /// Seed the planned state.
    pub fn with_planned(mut self, state: &Value) -> Self {
        if let Some(mut map) = state.as_map().cloned() {
            if let Some(block) = map.remove(TIMEOUTS_KEY) {
                self.timeouts_block = Some(block);
            }
            if self.id.is_empty() {
                if let Some(Value::String(id)) = map.get("id") {
                    self.id = id.clone();
                }
            }
            self.planned = Some(map);
        }
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Error codes of the service behind this resource.
    pub fn with_service(mut self, service: &'static ServiceErrors) -> Self {
        self.service = service;
        self
    }

    pub fn service_errors(&self) -> &'static ServiceErrors {
        self.service
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub(crate) fn set_operation(&mut self, operation: Operation) {
        self.operation = operation;
    }

    /// The user's `timeouts` block, if one was carried in state.
    pub(crate) fn timeouts_block(&self) -> Option<&Value> {
        self.timeouts_block.as_ref()
    }

    fn layered(&self, key: &str) -> Option<&Value> {
        self.set
            .get(key)
            .or_else(|| self.planned.as_ref().and_then(|p| p.get(key)))
            .or_else(|| self.prior.as_ref().and_then(|p| p.get(key)))
    }

    fn prior_value(&self, path: &str) -> &Value {
        let (head, rest) = split_path(path);
        self.prior
            .as_ref()
            .and_then(|p| p.get(head))
            .and_then(|v| v.get_path(rest))
            .unwrap_or(&NULL)
    }

    /// The current value at `path` (`"name"`, `"rule.0.port"`).
    ///
    /// Returns null for anything unset.
    pub fn get(&self, path: &str) -> &Value {
        let (head, rest) = split_path(path);
        self.layered(head)
            .and_then(|v| v.get_path(rest))
            .unwrap_or(&NULL)
    }

    /// The value at `path` if it is known and not the zero value.
    pub fn get_ok(&self, path: &str) -> Option<&Value> {
        let value = self.get(path);
        (value.is_known() && !value.is_zero()).then_some(value)
    }

    /// Convenience for string attributes.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).as_str()
    }

    /// Record an observed value for a top-level key.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<(), ProviderError> {
        if self.operation == Operation::Plan {
            return Err(ProviderError::Sdk(format!(
                "set({}) is not allowed while planning",
                key
            )));
        }
        if key.contains('.') {
            return Err(ProviderError::Sdk(format!(
                "set({}): only top-level keys can be set",
                key
            )));
        }
        let value = value.into();
        if key == "id" {
            self.set_id(value.as_str().unwrap_or_default());
            return Ok(());
        }
        if !self.schema.block.contains(key) {
            return Err(ProviderError::Sdk(format!(
                "set({}): {} has no such attribute",
                key, self.resource_type
            )));
        }
        self.set.insert(key.to_string(), value);
        Ok(())
    }

    /// Whether the value at `path` differs between prior and current.
    pub fn has_change(&self, path: &str) -> bool {
        let (head, rest) = split_path(path);
        let old = self.prior_value(path);
        let new = self.get(path);
        match (rest.is_empty(), self.schema.get(head)) {
            (true, Some(SchemaEntry::Attribute(attr))) => !attribute_values_equal(attr, old, new),
            _ => !values_equal(old, new),
        }
    }

    /// Whether any of `paths` changed.
    pub fn has_changes(&self, paths: &[&str]) -> bool {
        paths.iter().any(|p| self.has_change(p))
    }

    /// The prior and current values at `path`.
    pub fn get_change(&self, path: &str) -> (Value, Value) {
        (self.prior_value(path).clone(), self.get(path).clone())
    }

    /// Set the resource id. An empty id means the resource is gone.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
        let value = if self.id.is_empty() {
            Value::Null
        } else {
            Value::String(self.id.clone())
        };
        self.set.insert("id".to_string(), value);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True while the resource is being created.
    pub fn is_new_resource(&self) -> bool {
        self.new_resource
    }

    /// Flag the resource as just created.
    pub fn mark_new_resource(&mut self) {
        self.new_resource = true;
    }

    pub(crate) fn clear_new_resource(&mut self) {
        self.new_resource = false;
    }

    /// The effective timeout for `op`.
    pub fn timeout(&self, op: Operation) -> Duration {
        self.timeouts.get(op)
    }

    /// Cancelled when the host stops the operation.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The state to hand back to the host, or null once the id is cleared.
    ///
    /// Values still unknown at this point were never reported by the API
    /// and are recorded as null.
    pub fn state(&self) -> serde_json::Value {
        self.build_state(true)
    }

    /// The prior state with observed values applied, ignoring the plan.
    ///
    /// Used when an update fails partway: planned values that never landed
    /// must not be recorded.
    pub(crate) fn partial_state(&self) -> serde_json::Value {
        self.build_state(false)
    }

    fn build_state(&self, include_planned: bool) -> serde_json::Value {
        if self.id.is_empty() {
            return serde_json::Value::Null;
        }
        let mut state = self.prior.clone().unwrap_or_default();
        if include_planned {
            if let Some(planned) = &self.planned {
                state.extend(planned.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        state.extend(self.set.iter().map(|(k, v)| (k.clone(), v.clone())));
        state.insert("id".to_string(), Value::String(self.id.clone()));
        if let Some(block) = &self.timeouts_block {
            state.insert(TIMEOUTS_KEY.to_string(), block.clone());
        }
        forget_unknowns(Value::Map(state)).to_json()
    }
}

fn split_path(path: &str) -> (&str, &str) {
    path.split_once('.').unwrap_or((path, ""))
}

fn forget_unknowns(value: Value) -> Value {
    match value {
        Value::Unknown => Value::Null,
        Value::List(items) => Value::List(items.into_iter().map(forget_unknowns).collect()),
        Value::Map(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (k, forget_unknowns(v)))
                .collect(),
        ),
        other => other,
    }
}
