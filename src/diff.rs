//! Plan computation.
//!
//! [`diff`] takes the prior state recorded by the host and the user's
//! configuration and produces a [`ResourceDiff`]: the planned state plus a
//! per-attribute record of what changes, what is not known until apply, and
//! whether the resource has to be replaced.
//!
//! Planning rules, per key:
//!
//! - a configured value wins
//! - otherwise the schema default, if any
//! - otherwise, for computed keys, the prior value when the resource exists
//!   and unknown when it is being created
//! - a diff suppressor that accepts `(old, new)` keeps the old value
//!
//! Equality is schema-aware: map order never matters, set elements are
//! compared as hash multisets, list order does matter, and an unset
//! collection equals an empty one.
//!
//! After the declarative pass, the resource's customize-diff hooks run in
//! order. If anything forces replacement, every computed key the user did
//! not configure becomes unknown, since the replacement will assign fresh
//! values.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::hashing;
use crate::meta::ProviderMeta;
use crate::schema::{
    join_path, Attribute, AttributeType, Block, BlockNestingMode, NestedBlock, Schema, SchemaEntry,
};
use crate::timeouts::{self, TIMEOUTS_KEY};
use crate::types::{AttributeChange, PlanResult};
use crate::validation;
use crate::value::{Value, NULL};

/// A customize-diff hook.
#[derive(Clone)]
pub struct CustomizeDiff(
    Arc<dyn Fn(&mut ResourceDiff<'_>, &ProviderMeta) -> Result<(), ProviderError> + Send + Sync>,
);

impl CustomizeDiff {
    pub fn new(
        f: impl Fn(&mut ResourceDiff<'_>, &ProviderMeta) -> Result<(), ProviderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self(Arc::new(f))
    }

    pub fn call(&self, diff: &mut ResourceDiff<'_>, meta: &ProviderMeta) -> Result<(), ProviderError> {
        (self.0)(diff, meta)
    }
}

impl fmt::Debug for CustomizeDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomizeDiff")
    }
}

/// The planned change to one top-level key.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDiff {
    pub old: Value,
    pub new: Value,
    /// The new value is only known after apply.
    pub new_computed: bool,
    /// This change cannot be applied in place.
    pub requires_new: bool,
}

/// A resource-level diff under construction.
#[derive(Debug)]
pub struct ResourceDiff<'a> {
    block: &'a Block,
    prior: Option<BTreeMap<String, Value>>,
    config: BTreeMap<String, Value>,
    planned: BTreeMap<String, Value>,
    attributes: BTreeMap<String, AttributeDiff>,
    requires_replace: bool,
    destroy: bool,
    timeouts: Option<Value>,
    set_by_hooks: BTreeSet<String>,
}

/// Compute the diff between `prior` state and `config`.
///
/// A `None` (or null) prior plans a create; a null `config` plans a destroy.
/// Invalid configurations fail with [`ProviderError::Diagnostics`].
pub fn diff<'a>(
    schema: &'a Schema,
    prior: Option<&Value>,
    config: &Value,
    meta: &ProviderMeta,
    hooks: &[CustomizeDiff],
) -> Result<ResourceDiff<'a>, ProviderError> {
    let prior = prior.filter(|p| !p.is_null()).map(object).transpose()?;
    let prior = prior.map(|mut p| {
        p.remove(TIMEOUTS_KEY);
        p
    });

    if config.is_null() {
        return Ok(ResourceDiff::destroy(&schema.block, prior));
    }

    validation::validate_result(schema, config).map_err(ProviderError::Diagnostics)?;

    let mut config = config.clone();
    let timeouts = timeouts::strip_timeouts(&mut config);
    let config = object(&config)?;

    let mut planned = plan_block(&schema.block, prior.as_ref(), &config, "");
    if !schema.block.contains("id") {
        let id = prior
            .as_ref()
            .and_then(|p| p.get("id"))
            .cloned()
            .unwrap_or(Value::Unknown);
        planned.insert("id".to_string(), id);
    }

    let mut d = ResourceDiff {
        block: &schema.block,
        prior,
        config,
        planned,
        attributes: BTreeMap::new(),
        requires_replace: false,
        destroy: false,
        timeouts,
        set_by_hooks: BTreeSet::new(),
    };
    let names: Vec<String> = schema.block.entries().map(|(k, _)| k.clone()).collect();
    for name in &names {
        d.recompute(name);
    }

    for hook in hooks {
        hook.call(&mut d, meta)?;
    }

    if d.requires_replace {
        d.plan_replacement();
    }
    Ok(d)
}

impl<'a> ResourceDiff<'a> {
    fn destroy(block: &'a Block, prior: Option<BTreeMap<String, Value>>) -> Self {
        let attributes = prior
            .iter()
            .flatten()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                (
                    k.clone(),
                    AttributeDiff {
                        old: v.clone(),
                        new: Value::Null,
                        new_computed: false,
                        requires_new: false,
                    },
                )
            })
            .collect();
        Self {
            block,
            prior,
            config: BTreeMap::new(),
            planned: BTreeMap::new(),
            attributes,
            requires_replace: false,
            destroy: true,
            timeouts: None,
            set_by_hooks: BTreeSet::new(),
        }
    }

    /// The prior value of a top-level key.
    pub fn get_old(&self, key: &str) -> &Value {
        self.prior
            .as_ref()
            .and_then(|p| p.get(key))
            .unwrap_or(&NULL)
    }

    /// The planned value of a top-level key.
    pub fn get_new(&self, key: &str) -> &Value {
        self.planned.get(key).unwrap_or(&NULL)
    }

    /// The raw configured value of a top-level key.
    pub fn get_config(&self, key: &str) -> &Value {
        self.config.get(key).unwrap_or(&NULL)
    }

    pub fn has_change(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeDiff> {
        self.attributes.get(key)
    }

    pub fn attributes(&self) -> &BTreeMap<String, AttributeDiff> {
        &self.attributes
    }

    /// Whether this diff creates a resource.
    pub fn is_create(&self) -> bool {
        self.prior.is_none() && !self.destroy
    }

    pub fn is_destroy(&self) -> bool {
        self.destroy
    }

    pub fn requires_replace(&self) -> bool {
        self.requires_replace
    }

    /// Whether applying this diff changes nothing.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && !self.requires_replace
    }

    /// Plan a computed key to a specific value.
    pub fn set_new(&mut self, key: &str, value: impl Into<Value>) -> Result<(), ProviderError> {
        self.check_computed("set_new", key)?;
        self.planned.insert(key.to_string(), value.into());
        self.set_by_hooks.insert(key.to_string());
        self.recompute(key);
        Ok(())
    }

    /// Plan a computed key as known only after apply.
    pub fn set_new_computed(&mut self, key: &str) -> Result<(), ProviderError> {
        self.check_computed("set_new_computed", key)?;
        self.planned.insert(key.to_string(), Value::Unknown);
        self.set_by_hooks.insert(key.to_string());
        self.recompute(key);
        Ok(())
    }

    /// Require replacement because `key` changes.
    pub fn force_new(&mut self, key: &str) -> Result<(), ProviderError> {
        let Some(attr) = self.attributes.get_mut(key) else {
            return Err(ProviderError::Sdk(format!(
                "force_new: no changes for {}",
                key
            )));
        };
        attr.requires_new = true;
        self.requires_replace = true;
        Ok(())
    }

    /// Drop the planned change to `key`, keeping its prior value.
    pub fn clear(&mut self, key: &str) -> Result<(), ProviderError> {
        if !self.block.contains(key) {
            return Err(ProviderError::Sdk(format!("clear: unknown key {}", key)));
        }
        let old = self.get_old(key).clone();
        self.planned.insert(key.to_string(), old);
        self.attributes.remove(key);
        self.requires_replace = self.attributes.values().any(|a| a.requires_new);
        Ok(())
    }

    /// The planned state as a value, including the `timeouts` block.
    pub fn planned_state(&self) -> Value {
        if self.destroy {
            return Value::Null;
        }
        let mut planned = self.planned.clone();
        if let Some(timeouts) = &self.timeouts {
            planned.insert(TIMEOUTS_KEY.to_string(), timeouts.clone());
        }
        Value::Map(planned)
    }

    /// Convert into the host's plan result.
    pub fn into_plan_result(self) -> PlanResult {
        let planned_state = self.planned_state().to_json();
        let changes = self
            .attributes
            .into_iter()
            .map(|(path, attr)| {
                let change = match (attr.old.is_null(), attr.new.is_null()) {
                    (true, _) => AttributeChange::added(path, attr.new.to_json()),
                    (false, true) => AttributeChange::removed(path, attr.old.to_json()),
                    (false, false) => {
                        AttributeChange::modified(path, attr.old.to_json(), attr.new.to_json())
                    },
                };
                if attr.requires_new {
                    change.forcing_replace()
                } else {
                    change
                }
            })
            .collect();
        PlanResult::with_changes(planned_state, changes, self.requires_replace)
    }

    fn check_computed(&self, op: &str, key: &str) -> Result<(), ProviderError> {
        match self.block.get(key) {
            None => Err(ProviderError::Sdk(format!("{}: unknown key {}", op, key))),
            Some(entry) if !entry.computed() => Err(ProviderError::Sdk(format!(
                "{} only operates on computed keys - {} is not one",
                op, key
            ))),
            Some(_) => Ok(()),
        }
    }

    fn recompute(&mut self, key: &str) {
        let Some(entry) = self.block.get(key) else {
            return;
        };
        let old = self.get_old(key).clone();
        let new = self.get_new(key).clone();
        let was_forced = self.attributes.get(key).is_some_and(|a| a.requires_new);

        let change = if self.prior.is_none() {
            Change {
                changed: !is_absent(&new),
                forces_new: false,
            }
        } else {
            compare_entry(entry, &old, &new)
        };

        if change.changed {
            let new_computed = !new.is_known();
            self.attributes.insert(
                key.to_string(),
                AttributeDiff {
                    old,
                    new,
                    new_computed,
                    requires_new: change.forces_new || was_forced,
                },
            );
        } else {
            self.attributes.remove(key);
        }
        self.requires_replace = self.attributes.values().any(|a| a.requires_new);
    }

    fn plan_replacement(&mut self) {
        let computed: Vec<String> = self
            .block
            .entries()
            .filter(|(name, entry)| {
                entry.computed()
                    && self.get_config(name).is_null()
                    && !self.set_by_hooks.contains(name.as_str())
            })
            .map(|(name, _)| name.clone())
            .collect();
        for name in computed {
            self.planned.insert(name.clone(), Value::Unknown);
            self.recompute(&name);
        }
        if !self.block.contains("id") {
            self.planned.insert("id".to_string(), Value::Unknown);
        }
    }
}

fn object(value: &Value) -> Result<BTreeMap<String, Value>, ProviderError> {
    match value {
        Value::Map(map) => Ok(map.clone()),
        other => Err(ProviderError::Validation(format!(
            "expected an object, got {}",
            other.type_name()
        ))),
    }
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::List(items) => items.is_empty(),
        Value::Map(map) => map.is_empty(),
        _ => false,
    }
}

fn plan_block(
    block: &Block,
    prior: Option<&BTreeMap<String, Value>>,
    config: &BTreeMap<String, Value>,
    path: &str,
) -> BTreeMap<String, Value> {
    let mut planned = BTreeMap::new();

    for (name, attr) in &block.attributes {
        let key = join_path(path, name);
        let old = prior.and_then(|p| p.get(name)).unwrap_or(&NULL);
        let cfg = config.get(name).unwrap_or(&NULL);
        let new = plan_attribute(attr, &key, prior.is_some(), old, cfg);
        planned.insert(name.clone(), new);
    }

    for (name, nested) in &block.blocks {
        let key = join_path(path, name);
        let exists = prior.is_some();
        let old = prior.and_then(|p| p.get(name)).unwrap_or(&NULL);
        let cfg = config.get(name).unwrap_or(&NULL);

        let mut new = if cfg.is_null() {
            match (nested.computed, exists) {
                (true, true) => old.clone(),
                (true, false) => Value::Unknown,
                (false, _) => Value::Null,
            }
        } else {
            plan_nested(nested, exists.then_some(old), cfg, &key)
        };
        if let Some(suppress) = &nested.diff_suppress {
            if exists && suppress.suppress(&key, old, &new) {
                new = old.clone();
            }
        }
        planned.insert(name.clone(), new);
    }

    planned
}

fn plan_attribute(attr: &Attribute, key: &str, exists: bool, old: &Value, cfg: &Value) -> Value {
    let new = if !cfg.is_null() {
        cfg.clone()
    } else if let Some(default) = &attr.default {
        default.clone()
    } else if attr.flags.computed {
        if exists {
            old.clone()
        } else {
            Value::Unknown
        }
    } else {
        Value::Null
    };

    match &attr.diff_suppress {
        Some(suppress) if exists && new.is_known() && suppress.suppress(key, old, &new) => {
            old.clone()
        },
        _ => new,
    }
}

fn plan_nested(nested: &NestedBlock, old: Option<&Value>, cfg: &Value, path: &str) -> Value {
    let plan_item = |old_item: Option<&Value>, cfg_item: &Value, item_path: &str| match cfg_item {
        Value::Map(cfg_map) => Value::Map(plan_block(
            &nested.block,
            old_item.and_then(Value::as_map),
            cfg_map,
            item_path,
        )),
        other => other.clone(),
    };

    match (nested.nesting_mode, cfg) {
        (_, Value::Unknown) => Value::Unknown,
        (BlockNestingMode::Single, Value::Map(_)) => {
            plan_item(old.and_then(single_item), cfg, path)
        },
        (BlockNestingMode::Single | BlockNestingMode::List, Value::List(items)) => {
            let old_items = old.and_then(Value::as_list).unwrap_or_default();
            let old_items = if nested.nesting_mode == BlockNestingMode::Single {
                old.and_then(single_item).map(std::slice::from_ref).unwrap_or_default()
            } else {
                old_items
            };
            Value::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let old_item = if old.is_some() { old_items.get(i) } else { None };
                        plan_item(old_item, item, &format!("{}.{}", path, i))
                    })
                    .collect(),
            )
        },
        (BlockNestingMode::Set, Value::List(items)) => {
            let old_items = old.and_then(Value::as_list).unwrap_or_default();
            let mut used = vec![false; old_items.len()];
            Value::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let item_path = format!("{}.{}", path, i);
                        if old.is_none() {
                            return plan_item(None, item, &item_path);
                        }
                        // Reuse the prior element this configuration describes, so its
                        // computed attributes carry over.
                        for (j, old_item) in old_items.iter().enumerate() {
                            if used[j] {
                                continue;
                            }
                            let candidate = plan_item(Some(old_item), item, &item_path);
                            if block_items_equal(&nested.block, &candidate, old_item) {
                                used[j] = true;
                                return candidate;
                            }
                        }
                        plan_item(None, item, &item_path)
                    })
                    .collect(),
            )
        },
        (BlockNestingMode::Map, Value::Map(items)) => {
            let old_items = old.and_then(Value::as_map);
            Value::Map(
                items
                    .iter()
                    .map(|(k, item)| {
                        let old_item = old_items.and_then(|m| m.get(k));
                        (k.clone(), plan_item(old_item, item, &format!("{}.{}", path, k)))
                    })
                    .collect(),
            )
        },
        (_, other) => other.clone(),
    }
}

fn single_item(value: &Value) -> Option<&Value> {
    match value {
        Value::Map(_) => Some(value),
        Value::List(items) => items.first(),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Change {
    changed: bool,
    forces_new: bool,
}

impl Change {
    const NONE: Change = Change {
        changed: false,
        forces_new: false,
    };

    fn or(self, other: Change) -> Change {
        Change {
            changed: self.changed || other.changed,
            forces_new: self.forces_new || other.forces_new,
        }
    }
}

fn compare_entry(entry: SchemaEntry<'_>, old: &Value, new: &Value) -> Change {
    match entry {
        SchemaEntry::Attribute(attr) => {
            let changed = !attribute_values_equal(attr, old, new);
            Change {
                changed,
                forces_new: changed && attr.force_new,
            }
        },
        SchemaEntry::Block(nested) => compare_nested(nested, old, new),
    }
}

/// Whether two values of an attribute are the same for diff purposes.
pub(crate) fn attribute_values_equal(attr: &Attribute, old: &Value, new: &Value) -> bool {
    match (&attr.attr_type, old, new) {
        (_, Value::Unknown, _) | (_, _, Value::Unknown) => {
            matches!((old, new), (Value::Unknown, Value::Unknown))
        },
        (AttributeType::Set(_), _, _) => {
            let default_hash = crate::schema::SetHash::default();
            let hash = attr.set_hash.as_ref().unwrap_or(&default_hash);
            let old_items = old.as_list().unwrap_or_default();
            let new_items = new.as_list().unwrap_or_default();
            (is_absent(old) && is_absent(new))
                || (old.as_list().is_some() || old.is_null())
                    && (new.as_list().is_some() || new.is_null())
                    && hashing::set_codes(old_items, |v| hash.hash(v))
                        == hashing::set_codes(new_items, |v| hash.hash(v))
        },
        _ => values_equal(old, new),
    }
}

/// Structural equality where unset equals empty and `1` equals `1.0`.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        },
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        },
        (Value::Null, other) | (other, Value::Null) => is_absent(other),
        _ => a == b,
    }
}

fn compare_nested(nested: &NestedBlock, old: &Value, new: &Value) -> Change {
    if matches!(old, Value::Unknown) || matches!(new, Value::Unknown) {
        let changed = !matches!((old, new), (Value::Unknown, Value::Unknown));
        return Change {
            changed,
            forces_new: changed && nested.force_new,
        };
    }

    let change = match nested.nesting_mode {
        BlockNestingMode::Single => compare_items(
            &nested.block,
            single_item(old).into_iter(),
            single_item(new).into_iter(),
        ),
        BlockNestingMode::List => compare_items(
            &nested.block,
            old.as_list().unwrap_or_default().iter(),
            new.as_list().unwrap_or_default().iter(),
        ),
        BlockNestingMode::Set => compare_set_items(nested, old, new),
        BlockNestingMode::Map => {
            let empty = BTreeMap::new();
            let old_items = old.as_map().unwrap_or(&empty);
            let new_items = new.as_map().unwrap_or(&empty);
            let keys: BTreeSet<&String> = old_items.keys().chain(new_items.keys()).collect();
            keys.into_iter().fold(Change::NONE, |acc, k| {
                acc.or(compare_block_item(
                    &nested.block,
                    old_items.get(k).unwrap_or(&NULL),
                    new_items.get(k).unwrap_or(&NULL),
                ))
            })
        },
    };

    Change {
        changed: change.changed,
        forces_new: change.changed && (nested.force_new || change.forces_new),
    }
}

fn compare_items<'v>(
    block: &Block,
    old: impl Iterator<Item = &'v Value>,
    new: impl Iterator<Item = &'v Value>,
) -> Change {
    let old: Vec<&Value> = old.collect();
    let new: Vec<&Value> = new.collect();
    let len = old.len().max(new.len());
    (0..len).fold(Change::NONE, |acc, i| {
        acc.or(compare_block_item(
            block,
            old.get(i).copied().unwrap_or(&NULL),
            new.get(i).copied().unwrap_or(&NULL),
        ))
    })
}

fn compare_set_items(nested: &NestedBlock, old: &Value, new: &Value) -> Change {
    let old_items = old.as_list().unwrap_or_default();
    let new_items = new.as_list().unwrap_or_default();

    let default_hash = crate::schema::SetHash::default();
    let hash = nested.set_hash.as_ref().unwrap_or(&default_hash);
    let old_codes = hashing::set_codes(old_items, |v| hash.hash(v));
    let new_codes = hashing::set_codes(new_items, |v| hash.hash(v));
    if old_codes == new_codes {
        return Change::NONE;
    }

    // Elements are replaced wholesale, so any force-new key inside forces
    // the whole resource.
    Change {
        changed: true,
        forces_new: nested.has_force_new_attribute(),
    }
}

fn compare_block_item(block: &Block, old: &Value, new: &Value) -> Change {
    let empty = BTreeMap::new();
    let old_map = old.as_map().unwrap_or(&empty);
    let new_map = new.as_map().unwrap_or(&empty);
    let change = block.entries().fold(Change::NONE, |acc, (name, entry)| {
        acc.or(compare_entry(
            entry,
            old_map.get(name).unwrap_or(&NULL),
            new_map.get(name).unwrap_or(&NULL),
        ))
    });
    if change.changed || is_absent(old) == is_absent(new) {
        change
    } else {
        // An item appeared or disappeared without any keys set.
        Change {
            changed: true,
            forces_new: false,
        }
    }
}

fn block_items_equal(block: &Block, a: &Value, b: &Value) -> bool {
    !compare_block_item(block, a, b).changed
}
