//! Schema types for describing provider and resource structure.
//!
//! A resource schema maps attribute names to descriptors. Scalar and
//! collection attributes are [`Attribute`]s; nested configuration blocks
//! are [`NestedBlock`]s. Besides shape, descriptors carry the behavior the
//! diff engine needs: force-new, defaults, validators, diff suppressors,
//! set hashing, and inter-attribute constraints.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::hashing;
use crate::value::Value;

/// The type of an attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// A string value.
    String,
    /// A 64-bit integer.
    Int64,
    /// A 64-bit floating point number.
    Float64,
    /// A boolean value.
    Bool,
    /// A list of values of a single type. Order is significant.
    List(Box<AttributeType>),
    /// A set of unique values of a single type. Order is ignored.
    Set(Box<AttributeType>),
    /// A map from string keys to values of a single type.
    Map(Box<AttributeType>),
}

impl AttributeType {
    /// Create a list type.
    pub fn list(element_type: AttributeType) -> Self {
        Self::List(Box::new(element_type))
    }

    /// Create a set type.
    pub fn set(element_type: AttributeType) -> Self {
        Self::Set(Box::new(element_type))
    }

    /// Create a map type.
    pub fn map(element_type: AttributeType) -> Self {
        Self::Map(Box::new(element_type))
    }

    /// Whether this is a list, set or map.
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::List(_) | Self::Set(_) | Self::Map(_))
    }
}

/// Describes how an attribute can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// The attribute is required in configuration.
    pub required: bool,
    /// The attribute is optional in configuration.
    pub optional: bool,
    /// The attribute is computed by the provider.
    pub computed: bool,
    /// The attribute is sensitive and must never be logged.
    pub sensitive: bool,
}

impl AttributeFlags {
    /// Create flags for a required attribute.
    pub fn required() -> Self {
        Self {
            required: true,
            ..Default::default()
        }
    }

    /// Create flags for an optional attribute.
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Default::default()
        }
    }

    /// Create flags for a computed attribute (read-only, set by provider).
    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Default::default()
        }
    }

    /// Create flags for an optional+computed attribute: the user may set it,
    /// otherwise the provider fills it in.
    pub fn optional_computed() -> Self {
        Self {
            optional: true,
            computed: true,
            ..Default::default()
        }
    }

    /// Mark the attribute as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Whether the attribute can only be set by the provider.
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }
}

/// A value predicate producing diagnostics for `(value, path)`.
#[derive(Clone)]
pub struct Validator(Arc<dyn Fn(&Value, &str) -> Vec<Diagnostic> + Send + Sync>);

impl Validator {
    /// Wrap a validation function.
    pub fn new(f: impl Fn(&Value, &str) -> Vec<Diagnostic> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Run the validator.
    pub fn validate(&self, value: &Value, path: &str) -> Vec<Diagnostic> {
        (self.0)(value, path)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Validator")
    }
}

/// A predicate over `(key, old, new)` that hides an otherwise-present diff.
#[derive(Clone)]
pub struct DiffSuppress(Arc<dyn Fn(&str, &Value, &Value) -> bool + Send + Sync>);

impl DiffSuppress {
    /// Wrap a suppression function.
    pub fn new(f: impl Fn(&str, &Value, &Value) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Whether the difference between `old` and `new` should be ignored.
    pub fn suppress(&self, key: &str, old: &Value, new: &Value) -> bool {
        (self.0)(key, old, new)
    }
}

impl fmt::Debug for DiffSuppress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DiffSuppress")
    }
}

/// Hash function deciding set-element identity.
#[derive(Clone)]
pub struct SetHash(Arc<dyn Fn(&Value) -> u64 + Send + Sync>);

impl SetHash {
    /// Wrap a hash function.
    pub fn new(f: impl Fn(&Value) -> u64 + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Hash one element.
    pub fn hash(&self, value: &Value) -> u64 {
        (self.0)(value)
    }
}

impl Default for SetHash {
    fn default() -> Self {
        Self::new(hashing::hash_value)
    }
}

impl fmt::Debug for SetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SetHash")
    }
}

/// Constraints that relate one key to others in the same block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KeyRelations {
    /// Keys that must not be set together with this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts_with: Vec<String>,
    /// Exactly one key of this group (which includes this key) must be set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exactly_one_of: Vec<String>,
    /// At least one key of this group (which includes this key) must be set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub at_least_one_of: Vec<String>,
}

/// Describes a single attribute in a schema.
#[derive(Debug, Clone, Serialize)]
pub struct Attribute {
    /// The type of the attribute.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Flags describing how the attribute can be used.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Human-readable description of the attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// If set, changing this attribute forces resource replacement.
    pub force_new: bool,
    /// Default value used when the attribute is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Minimum number of elements for collections.
    pub min_items: u32,
    /// Maximum number of elements for collections (0 = unlimited).
    pub max_items: u32,
    /// Constraints relating this attribute to others.
    #[serde(flatten)]
    pub relations: KeyRelations,
    /// Value validators, run in order over the attribute's whole value.
    #[serde(skip)]
    pub validators: Vec<Validator>,
    /// Diff suppressor.
    #[serde(skip)]
    pub diff_suppress: Option<DiffSuppress>,
    /// Element hash for set attributes.
    #[serde(skip)]
    pub set_hash: Option<SetHash>,
}

impl Attribute {
    /// Create a new attribute with the given type and flags.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
            force_new: false,
            default: None,
            min_items: 0,
            max_items: 0,
            relations: KeyRelations::default(),
            validators: Vec::new(),
            diff_suppress: None,
            set_hash: None,
        }
    }

    /// Create a required string attribute.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    /// Create an optional string attribute.
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional())
    }

    /// Create a computed string attribute.
    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::computed())
    }

    /// Create a required int64 attribute.
    pub fn required_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::required())
    }

    /// Create an optional int64 attribute.
    pub fn optional_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::optional())
    }

    /// Create a computed int64 attribute.
    pub fn computed_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::computed())
    }

    /// Create a required bool attribute.
    pub fn required_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::required())
    }

    /// Create an optional bool attribute.
    pub fn optional_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::optional())
    }

    /// Create a computed bool attribute.
    pub fn computed_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::computed())
    }

    /// Create an optional string map, the shape used for `tags`.
    pub fn optional_string_map() -> Self {
        Self::new(
            AttributeType::map(AttributeType::String),
            AttributeFlags::optional(),
        )
    }

    /// Create an optional set of strings.
    pub fn optional_string_set() -> Self {
        Self::new(
            AttributeType::set(AttributeType::String),
            AttributeFlags::optional(),
        )
    }

    /// Make the attribute optional and computed.
    pub fn optional_computed(mut self) -> Self {
        self.flags.required = false;
        self.flags.optional = true;
        self.flags.computed = true;
        self
    }

    /// Set the description for this attribute.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark this attribute as forcing resource replacement when changed.
    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Set a default value for this attribute.
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Mark this attribute as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.flags.sensitive = true;
        self
    }

    /// Append a validator.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Set the diff suppressor.
    pub fn with_diff_suppress(mut self, suppress: DiffSuppress) -> Self {
        self.diff_suppress = Some(suppress);
        self
    }

    /// Set the element hash used for set identity.
    pub fn with_set_hash(mut self, hash: SetHash) -> Self {
        self.set_hash = Some(hash);
        self
    }

    /// Set the minimum number of elements.
    pub fn with_min_items(mut self, min: u32) -> Self {
        self.min_items = min;
        self
    }

    /// Set the maximum number of elements.
    pub fn with_max_items(mut self, max: u32) -> Self {
        self.max_items = max;
        self
    }

    /// Declare keys this attribute conflicts with.
    pub fn with_conflicts_with(mut self, keys: &[&str]) -> Self {
        self.relations.conflicts_with = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Declare an exactly-one-of group.
    pub fn with_exactly_one_of(mut self, keys: &[&str]) -> Self {
        self.relations.exactly_one_of = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Declare an at-least-one-of group.
    pub fn with_at_least_one_of(mut self, keys: &[&str]) -> Self {
        self.relations.at_least_one_of = keys.iter().map(|k| k.to_string()).collect();
        self
    }
}

/// The nesting mode for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockNestingMode {
    /// A single nested block (at most one).
    #[default]
    Single,
    /// A list of nested blocks (zero or more, ordered).
    List,
    /// A set of nested blocks (zero or more, unordered, unique).
    Set,
    /// A map of nested blocks keyed by string.
    Map,
}

/// A block of attributes and nested blocks.
///
/// Keys are kept sorted so diffs and diagnostics come out in a stable order.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Block {
    /// The attributes within this block.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Attribute>,
    /// Nested blocks within this block.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub blocks: BTreeMap<String, NestedBlock>,
    /// Human-readable description of the block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A borrowed view of one key in a block.
#[derive(Debug, Clone, Copy)]
pub enum SchemaEntry<'a> {
    /// A plain attribute.
    Attribute(&'a Attribute),
    /// A nested block.
    Block(&'a NestedBlock),
}

impl<'a> SchemaEntry<'a> {
    /// Whether a change to this key forces replacement on its own.
    pub fn force_new(&self) -> bool {
        match self {
            SchemaEntry::Attribute(a) => a.force_new,
            SchemaEntry::Block(b) => b.force_new,
        }
    }

    /// Whether the provider may fill this key in.
    pub fn computed(&self) -> bool {
        match self {
            SchemaEntry::Attribute(a) => a.flags.computed,
            SchemaEntry::Block(b) => b.computed,
        }
    }

    /// Whether only the provider may set this key.
    pub fn computed_only(&self) -> bool {
        match self {
            SchemaEntry::Attribute(a) => a.flags.is_computed_only(),
            SchemaEntry::Block(b) => b.computed && !b.optional,
        }
    }

    /// Whether this key is sensitive.
    pub fn sensitive(&self) -> bool {
        match self {
            SchemaEntry::Attribute(a) => a.flags.sensitive,
            SchemaEntry::Block(_) => false,
        }
    }

    /// The diff suppressor, if any.
    pub fn diff_suppress(&self) -> Option<&'a DiffSuppress> {
        match self {
            SchemaEntry::Attribute(a) => a.diff_suppress.as_ref(),
            SchemaEntry::Block(b) => b.diff_suppress.as_ref(),
        }
    }

    /// The relations of this key.
    pub fn relations(&self) -> &'a KeyRelations {
        match self {
            SchemaEntry::Attribute(a) => &a.relations,
            SchemaEntry::Block(b) => &b.relations,
        }
    }
}

impl Block {
    /// Create a new empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute to this block.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Add a nested block to this block.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.blocks.insert(name.into(), block);
        self
    }

    /// Set the description for this block.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Look up a key.
    pub fn get(&self, name: &str) -> Option<SchemaEntry<'_>> {
        if let Some(attr) = self.attributes.get(name) {
            return Some(SchemaEntry::Attribute(attr));
        }
        self.blocks.get(name).map(SchemaEntry::Block)
    }

    /// Whether the block declares `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name) || self.blocks.contains_key(name)
    }

    /// All keys with their descriptors, attributes before blocks.
    pub fn entries(&self) -> impl Iterator<Item = (&String, SchemaEntry<'_>)> {
        self.attributes
            .iter()
            .map(|(k, a)| (k, SchemaEntry::Attribute(a)))
            .chain(self.blocks.iter().map(|(k, b)| (k, SchemaEntry::Block(b))))
    }

    fn internal_validate(&self, path: &str, problems: &mut Vec<String>) {
        for (name, attr) in &self.attributes {
            let key = join_path(path, name);
            let flags = &attr.flags;
            if flags.required && flags.optional {
                problems.push(format!("{}: cannot be both required and optional", key));
            }
            if flags.required && flags.computed {
                problems.push(format!("{}: cannot be both required and computed", key));
            }
            if !flags.required && !flags.optional && !flags.computed {
                problems.push(format!(
                    "{}: one of required, optional or computed must be set",
                    key
                ));
            }
            if flags.required && attr.default.is_some() {
                problems.push(format!("{}: default cannot be set with required", key));
            }
            if flags.is_computed_only() {
                if attr.default.is_some() {
                    problems.push(format!("{}: default is not valid for computed-only", key));
                }
                if !attr.validators.is_empty() {
                    problems.push(format!("{}: validators are not valid for computed-only", key));
                }
                if attr.force_new {
                    problems.push(format!("{}: force_new is not valid for computed-only", key));
                }
            }
            if attr.max_items > 0 && attr.min_items > attr.max_items {
                problems.push(format!("{}: min_items is greater than max_items", key));
            }
            if (attr.min_items > 0 || attr.max_items > 0) && !attr.attr_type.is_collection() {
                problems.push(format!("{}: min_items/max_items need a collection type", key));
            }
            if attr.set_hash.is_some() && !matches!(attr.attr_type, AttributeType::Set(_)) {
                problems.push(format!("{}: set_hash needs a set type", key));
            }
            if path.is_empty() && name == "id" && !flags.is_computed_only() {
                problems.push("id: must be computed-only".to_string());
            }
            self.validate_relations(name, &attr.relations, &key, problems);
        }
        for (name, nested) in &self.blocks {
            let key = join_path(path, name);
            if nested.max_items > 0 && nested.min_items > nested.max_items {
                problems.push(format!("{}: min_items is greater than max_items", key));
            }
            if nested.nesting_mode == BlockNestingMode::Single && nested.max_items > 1 {
                problems.push(format!("{}: single blocks allow at most one item", key));
            }
            self.validate_relations(name, &nested.relations, &key, problems);
            nested.block.internal_validate(&key, problems);
        }
    }

    fn validate_relations(
        &self,
        name: &str,
        relations: &KeyRelations,
        key: &str,
        problems: &mut Vec<String>,
    ) {
        for other in &relations.conflicts_with {
            match self.get(other) {
                None => problems.push(format!(
                    "{}: conflicts_with references unknown key '{}'",
                    key, other
                )),
                Some(SchemaEntry::Attribute(a)) if a.flags.required => problems.push(format!(
                    "{}: conflicts_with cannot contain required key '{}'",
                    key, other
                )),
                Some(_) if other == name => {
                    problems.push(format!("{}: conflicts_with cannot contain itself", key))
                },
                Some(_) => {},
            }
        }
        for other in relations
            .exactly_one_of
            .iter()
            .chain(relations.at_least_one_of.iter())
        {
            if !self.contains(other) {
                problems.push(format!("{}: key group references unknown key '{}'", key, other));
            }
        }
    }
}

/// A nested block with its nesting mode and constraints.
#[derive(Debug, Clone, Serialize)]
pub struct NestedBlock {
    /// The block definition.
    #[serde(flatten)]
    pub block: Block,
    /// How the block is nested (single, list, set, map).
    pub nesting_mode: BlockNestingMode,
    /// Minimum number of blocks required.
    pub min_items: u32,
    /// Maximum number of blocks allowed (0 = unlimited).
    pub max_items: u32,
    /// Changing the block forces replacement.
    pub force_new: bool,
    /// The block may be omitted (with `computed`, the provider fills it in).
    pub optional: bool,
    /// The provider may fill the block in.
    pub computed: bool,
    /// Constraints relating this block to other keys.
    #[serde(flatten)]
    pub relations: KeyRelations,
    /// Diff suppressor applied to the whole block value.
    #[serde(skip)]
    pub diff_suppress: Option<DiffSuppress>,
    /// Element hash for set-nested blocks.
    #[serde(skip)]
    pub set_hash: Option<SetHash>,
}

impl NestedBlock {
    fn with_mode(block: Block, nesting_mode: BlockNestingMode, max_items: u32) -> Self {
        Self {
            block,
            nesting_mode,
            min_items: 0,
            max_items,
            force_new: false,
            optional: true,
            computed: false,
            relations: KeyRelations::default(),
            diff_suppress: None,
            set_hash: None,
        }
    }

    /// Create a single nested block (0 or 1 allowed).
    pub fn single(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::Single, 1)
    }

    /// Create a list of nested blocks.
    pub fn list(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::List, 0)
    }

    /// Create a set of nested blocks.
    pub fn set(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::Set, 0)
    }

    /// Create a map of nested blocks.
    pub fn map(block: Block) -> Self {
        Self::with_mode(block, BlockNestingMode::Map, 0)
    }

    /// Set the minimum number of blocks required.
    pub fn with_min_items(mut self, min: u32) -> Self {
        self.min_items = min;
        if min > 0 {
            self.optional = false;
        }
        self
    }

    /// Set the maximum number of blocks allowed.
    pub fn with_max_items(mut self, max: u32) -> Self {
        self.max_items = max;
        self
    }

    /// Mark the block as forcing replacement when changed.
    pub fn with_force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    /// Let the provider fill the block in when the user omits it.
    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    /// Set the diff suppressor.
    pub fn with_diff_suppress(mut self, suppress: DiffSuppress) -> Self {
        self.diff_suppress = Some(suppress);
        self
    }

    /// Set the element hash used for set-nested identity.
    pub fn with_set_hash(mut self, hash: SetHash) -> Self {
        self.set_hash = Some(hash);
        self
    }

    /// Declare keys this block conflicts with.
    pub fn with_conflicts_with(mut self, keys: &[&str]) -> Self {
        self.relations.conflicts_with = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Whether any attribute inside the block, at any depth, forces replacement.
    pub fn has_force_new_attribute(&self) -> bool {
        self.block.attributes.values().any(|a| a.force_new)
            || self
                .block
                .blocks
                .values()
                .any(|b| b.force_new || b.has_force_new_attribute())
    }
}

/// Schema for a resource or the provider configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Schema {
    /// The version of this schema (for state upgrades).
    pub version: u64,
    /// The root block containing all attributes and nested blocks.
    #[serde(flatten)]
    pub block: Block,
}

impl Schema {
    /// Create a new schema with the given version.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            block: Block::new(),
        }
    }

    /// Create a schema at version 0.
    pub fn v0() -> Self {
        Self::new(0)
    }

    /// Add an attribute to the schema.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.block.attributes.insert(name.into(), attr);
        self
    }

    /// Add a nested block to the schema.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.block.blocks.insert(name.into(), block);
        self
    }

    /// Look up a top-level key.
    pub fn get(&self, name: &str) -> Option<SchemaEntry<'_>> {
        self.block.get(name)
    }

    /// Check that the schema itself is well formed.
    ///
    /// Called when a resource is registered, so a malformed schema fails at
    /// provider construction instead of during some later plan.
    pub fn internal_validate(&self) -> Result<(), ProviderError> {
        let mut problems = Vec::new();
        self.block.internal_validate("", &mut problems);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ProviderError::Sdk(format!(
                "invalid schema: {}",
                problems.join("; ")
            )))
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::v0()
    }
}

/// Schema for the provider configuration and its resources.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ProviderSchema {
    /// Schema for provider configuration.
    pub provider: Schema,
    /// Schemas for each resource type.
    pub resources: BTreeMap<String, Schema>,
}

impl ProviderSchema {
    /// Create a new empty provider schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider configuration schema.
    pub fn with_provider_config(mut self, schema: Schema) -> Self {
        self.provider = schema;
        self
    }

    /// Add a resource schema.
    pub fn with_resource(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// An error that prevents the operation from completing.
    Error,
    /// A warning that doesn't prevent the operation but should be addressed.
    Warning,
}

/// A diagnostic message from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity of the diagnostic.
    pub severity: DiagnosticSeverity,
    /// A short summary of the issue.
    pub summary: String,
    /// A detailed description of the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The attribute path where the issue occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Add detail to this diagnostic.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the attribute path for this diagnostic.
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    /// Whether this is an error.
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

/// Whether any diagnostic is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

pub(crate) fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_flags() {
        let required = AttributeFlags::required();
        assert!(required.required);
        assert!(!required.optional);
        assert!(!required.computed);

        let computed = AttributeFlags::computed();
        assert!(computed.is_computed_only());

        let optional_computed = AttributeFlags::optional_computed();
        assert!(optional_computed.optional);
        assert!(optional_computed.computed);
        assert!(!optional_computed.is_computed_only());

        let sensitive = AttributeFlags::required().sensitive();
        assert!(sensitive.sensitive);
    }

    #[test]
    fn test_attribute_builders() {
        let attr = Attribute::optional_string()
            .with_description("A test attribute")
            .with_force_new()
            .with_default("red")
            .with_conflicts_with(&["other"]);

        assert_eq!(attr.attr_type, AttributeType::String);
        assert!(attr.flags.optional);
        assert_eq!(attr.description, Some("A test attribute".to_string()));
        assert!(attr.force_new);
        assert_eq!(attr.default, Some(Value::from("red")));
        assert_eq!(attr.relations.conflicts_with, vec!["other".to_string()]);
    }

    #[test]
    fn test_schema_builder_and_lookup() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("id", Attribute::computed_string())
            .with_block(
                "config",
                NestedBlock::single(
                    Block::new().with_attribute("enabled", Attribute::optional_bool()),
                ),
            );

        assert!(matches!(schema.get("name"), Some(SchemaEntry::Attribute(_))));
        assert!(matches!(schema.get("config"), Some(SchemaEntry::Block(_))));
        assert!(schema.get("missing").is_none());
        assert_eq!(schema.block.entries().count(), 3);
        assert!(schema.internal_validate().is_ok());
    }

    #[test]
    fn test_internal_validate_rejects_required_computed() {
        let mut attr = Attribute::required_string();
        attr.flags.computed = true;
        let schema = Schema::v0().with_attribute("name", attr);
        let err = schema.internal_validate().unwrap_err();
        assert!(err.to_string().contains("required and computed"));
    }

    #[test]
    fn test_internal_validate_rejects_bad_relations() {
        let schema = Schema::v0()
            .with_attribute("a", Attribute::optional_string().with_conflicts_with(&["b"]))
            .with_attribute("c", Attribute::required_string())
            .with_attribute("d", Attribute::optional_string().with_conflicts_with(&["c"]));
        let err = schema.internal_validate().unwrap_err().to_string();
        assert!(err.contains("unknown key 'b'"));
        assert!(err.contains("required key 'c'"));
    }

    #[test]
    fn test_internal_validate_rejects_settable_id() {
        let schema = Schema::v0().with_attribute("id", Attribute::optional_string());
        assert!(schema.internal_validate().is_err());
    }

    #[test]
    fn test_internal_validate_rejects_computed_only_force_new() {
        let schema =
            Schema::v0().with_attribute("arn", Attribute::computed_string().with_force_new());
        assert!(schema.internal_validate().is_err());
    }

    #[test]
    fn test_diagnostic() {
        let err = Diagnostic::error("Invalid configuration")
            .with_detail("The value must be positive")
            .with_attribute("count");

        assert_eq!(err.severity, DiagnosticSeverity::Error);
        assert_eq!(err.summary, "Invalid configuration");
        assert_eq!(err.detail, Some("The value must be positive".to_string()));
        assert_eq!(err.attribute, Some("count".to_string()));
        assert!(has_errors(&[err]));
        assert!(!has_errors(&[Diagnostic::warning("meh")]));
    }

    #[test]
    fn test_nested_block_modes() {
        let single = NestedBlock::single(Block::new());
        assert_eq!(single.nesting_mode, BlockNestingMode::Single);
        assert_eq!(single.max_items, 1);

        let list = NestedBlock::list(
            Block::new().with_attribute("port", Attribute::required_int64().with_force_new()),
        )
        .with_min_items(1)
        .with_max_items(5);
        assert_eq!(list.nesting_mode, BlockNestingMode::List);
        assert_eq!(list.min_items, 1);
        assert!(!list.optional);
        assert!(list.has_force_new_attribute());
    }

    #[test]
    fn test_schema_serializes_without_callbacks() {
        let schema = Schema::v0().with_attribute(
            "name",
            Attribute::required_string().with_validator(Validator::new(|_, _| vec![])),
        );
        let json = serde_json::to_value(&schema).unwrap();
        assert_eq!(json["attributes"]["name"]["type"], "string");
        assert_eq!(json["attributes"]["name"]["required"], true);
    }
}
