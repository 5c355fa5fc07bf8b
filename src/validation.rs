//! Configuration validation.
//!
//! This module checks a resource configuration against its [`Schema`]:
//! types, presence of required keys, collection bounds, per-attribute
//! validators, and the inter-key constraints (`conflicts_with`,
//! `exactly_one_of`, `at_least_one_of`). Any error diagnostic makes the
//! plan invalid.
//!
//! # Example
//!
//! ```
//! use hemmer_aws_core::schema::{Schema, Attribute};
//! use hemmer_aws_core::validation::validate;
//! use hemmer_aws_core::value::Value;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("count", Attribute::optional_int64());
//!
//! let diagnostics = validate(&schema, &Value::from(json!({"name": "test", "count": 42})));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &Value::from(json!({"name": "test", "count": "x"})));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("count".to_string()));
//! ```

use std::collections::{BTreeMap, BTreeSet};

use crate::schema::{
    join_path, Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, DiagnosticSeverity,
    NestedBlock, Schema,
};
use crate::timeouts::TIMEOUTS_KEY;
use crate::value::Value;

/// Validate a configuration against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null (unknown counts as present)
/// - Computed-only attributes must not be set
/// - Keys not declared in the schema are rejected
/// - Attribute types must match the schema; unknown values are not type checked
/// - Collections and nested blocks honor min/max item constraints
/// - Validators run on every known, non-null value
/// - Inter-key constraints are enforced within each block
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Validate a configuration, returning Ok if valid or Err with diagnostics.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.iter().any(Diagnostic::is_error) {
        Err(diagnostics)
    } else {
        Ok(())
    }
}

/// Check if a configuration is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    !validate(schema, value).iter().any(Diagnostic::is_error)
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Map(map) => map,
        Value::Null | Value::Unknown => return,
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value.type_name()))
                    .with_attribute_if_not_empty(path),
            );
            return;
        },
    };

    for key in obj.keys() {
        if !block.contains(key) && !(path.is_empty() && key == TIMEOUTS_KEY) {
            let key_path = join_path(path, key);
            diagnostics.push(
                Diagnostic::error(format!("Unsupported argument '{}'", key_path))
                    .with_detail("An argument with this name is not expected here")
                    .with_attribute(key_path),
            );
        }
    }

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);
    }

    for (name, nested_block) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested_block, obj.get(name), &block_path, diagnostics);
    }

    validate_relations(block, obj, path, diagnostics);
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(_) if attr.flags.is_computed_only() => {
            diagnostics.push(
                Diagnostic::error(format!("Attribute '{}' is read-only", path))
                    .with_detail("This attribute is computed by the provider and cannot be set")
                    .with_attribute(path),
            );
        },
        Some(Value::Unknown) => {},
        Some(v) => {
            let before = diagnostics.len();
            validate_attribute_type(&attr.attr_type, v, path, diagnostics);
            if diagnostics.len() > before {
                return;
            }
            validate_item_count(attr.min_items, attr.max_items, collection_len(v), path, diagnostics);
            if v.is_known() {
                for validator in &attr.validators {
                    diagnostics.extend(validator.validate(v, path));
                }
            }
        },
    }
}

fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match (attr_type, value) {
        (_, Value::Unknown) => {},
        (AttributeType::String, Value::String(_)) => {},
        (AttributeType::Int64, v) if v.as_i64().is_some() => {},
        (AttributeType::Float64, Value::Int(_) | Value::Float(_)) => {},
        (AttributeType::Bool, Value::Bool(_)) => {},
        (AttributeType::List(element_type) | AttributeType::Set(element_type), Value::List(items)) => {
            for (i, elem) in items.iter().enumerate() {
                let elem_path = format!("{}.{}", path, i);
                validate_attribute_type(element_type, elem, &elem_path, diagnostics);
            }
        },
        (AttributeType::Map(value_type), Value::Map(obj)) => {
            for (key, val) in obj {
                let key_path = format!("{}.{}", path, key);
                validate_attribute_type(value_type, val, &key_path, diagnostics);
            }
        },
        (expected, got) => diagnostics.push(type_error(path, type_label(expected), got)),
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match (nested.nesting_mode, value) {
        (_, None | Some(Value::Null)) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "Block '{}' requires at least {} item(s)",
                        path, nested.min_items
                    ))
                    .with_attribute(path),
                );
            }
        },
        (_, Some(Value::Unknown)) => {},
        (BlockNestingMode::Single, Some(v @ Value::Map(_))) => {
            validate_block(&nested.block, v, path, diagnostics);
        },
        (BlockNestingMode::Single | BlockNestingMode::List | BlockNestingMode::Set, Some(Value::List(items))) => {
            validate_item_count(nested.min_items, nested.max_items, Some(items.len()), path, diagnostics);
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{}.{}", path, i);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        },
        (BlockNestingMode::Map, Some(Value::Map(obj))) => {
            validate_item_count(nested.min_items, nested.max_items, Some(obj.len()), path, diagnostics);
            for (key, item) in obj {
                let item_path = format!("{}.{}", path, key);
                validate_block(&nested.block, item, &item_path, diagnostics);
            }
        },
        (mode, Some(v)) => {
            let expected = match mode {
                BlockNestingMode::Map => "map",
                _ => "list",
            };
            diagnostics.push(
                Diagnostic::error(format!("Expected {} for block '{}'", expected, path))
                    .with_detail(format!("Got {}", v.type_name()))
                    .with_attribute(path),
            );
        },
    }
}

fn validate_item_count(
    min_items: u32,
    max_items: u32,
    len: Option<usize>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let Some(len) = len else {
        return;
    };
    let len = len as u32;

    if len < min_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "'{}' requires at least {} item(s), got {}",
                path, min_items, len
            ))
            .with_attribute(path),
        );
    }

    // 0 means unlimited
    if max_items > 0 && len > max_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "'{}' allows at most {} item(s), got {}",
                path, max_items, len
            ))
            .with_attribute(path),
        );
    }
}

fn validate_relations(
    block: &Block,
    obj: &BTreeMap<String, Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let is_set = |key: &str| obj.get(key).is_some_and(|v| !v.is_null());

    let mut reported_conflicts = BTreeSet::new();
    let mut reported_groups = BTreeSet::new();

    for (name, entry) in block.entries() {
        let relations = entry.relations();

        if is_set(name) {
            for other in &relations.conflicts_with {
                let pair = if name < other {
                    (name.clone(), other.clone())
                } else {
                    (other.clone(), name.clone())
                };
                if is_set(other) && reported_conflicts.insert(pair) {
                    let key_path = join_path(path, name);
                    diagnostics.push(
                        Diagnostic::error(format!(
                            "'{}' conflicts with '{}'",
                            key_path,
                            join_path(path, other)
                        ))
                        .with_attribute(key_path),
                    );
                }
            }
        }

        if !relations.exactly_one_of.is_empty() {
            let group = normalized_group(name, &relations.exactly_one_of);
            let count = group.iter().filter(|k| is_set(k.as_str())).count();
            if count != 1 && reported_groups.insert(("exactly", group.clone())) {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "exactly one of `{}` must be specified",
                        qualified(path, &group)
                    ))
                    .with_detail(format!("{} of them are set", count))
                    .with_attribute_if_not_empty(path),
                );
            }
        }

        if !relations.at_least_one_of.is_empty() {
            let group = normalized_group(name, &relations.at_least_one_of);
            if !group.iter().any(|k| is_set(k.as_str())) && reported_groups.insert(("at_least", group.clone()))
            {
                diagnostics.push(
                    Diagnostic::error(format!(
                        "one of `{}` must be specified",
                        qualified(path, &group)
                    ))
                    .with_attribute_if_not_empty(path),
                );
            }
        }
    }
}

fn normalized_group(name: &str, group: &[String]) -> Vec<String> {
    let mut keys: BTreeSet<String> = group.iter().cloned().collect();
    keys.insert(name.to_string());
    keys.into_iter().collect()
}

fn qualified(path: &str, keys: &[String]) -> String {
    keys.iter()
        .map(|k| join_path(path, k))
        .collect::<Vec<_>>()
        .join(",")
}

// Helper functions

fn collection_len(value: &Value) -> Option<usize> {
    match value {
        Value::List(items) => Some(items.len()),
        Value::Map(map) => Some(map.len()),
        _ => None,
    }
}

fn type_label(attr_type: &AttributeType) -> &'static str {
    match attr_type {
        AttributeType::String => "string",
        AttributeType::Int64 => "int64",
        AttributeType::Float64 => "float64",
        AttributeType::Bool => "bool",
        AttributeType::List(_) => "list",
        AttributeType::Set(_) => "set",
        AttributeType::Map(_) => "map",
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic {
        severity: DiagnosticSeverity::Error,
        summary: format!("Invalid type for attribute '{}'", path),
        detail: Some(format!("Expected {}, got {}", expected, got.type_name())),
        attribute: Some(path.to_string()),
    }
}

trait DiagnosticExt {
    fn with_attribute_if_not_empty(self, path: &str) -> Self;
}

impl DiagnosticExt for Diagnostic {
    fn with_attribute_if_not_empty(self, path: &str) -> Self {
        if path.is_empty() {
            self
        } else {
            self.with_attribute(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, AttributeFlags, Block, NestedBlock, Schema, Validator};
    use crate::value::UNKNOWN_VALUE;
    use serde_json::json;

    fn check(schema: &Schema, json: serde_json::Value) -> Vec<Diagnostic> {
        validate(schema, &Value::from(json))
    }

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(check(&schema, json!({"name": "test"})).is_empty());

        let diagnostics = check(&schema, json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("name".to_string()));

        assert_eq!(check(&schema, json!({"name": null})).len(), 1);

        let diagnostics = check(&schema, json!({"name": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_unknown_satisfies_required_and_skips_type_check() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("count", Attribute::optional_int64());
        assert!(check(&schema, json!({"name": UNKNOWN_VALUE, "count": UNKNOWN_VALUE})).is_empty());
    }

    #[test]
    fn test_computed_only_attribute_cannot_be_set() {
        let schema = Schema::v0().with_attribute("arn", Attribute::computed_string());
        assert!(check(&schema, json!({})).is_empty());

        let diagnostics = check(&schema, json!({"arn": "arn:aws:s3:::b"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("read-only"));
    }

    #[test]
    fn test_unsupported_argument() {
        let schema = Schema::v0().with_attribute("name", Attribute::optional_string());
        let diagnostics = check(&schema, json!({"nmae": "typo"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("nmae".to_string()));

        // The timeouts block is always accepted at the root.
        assert!(check(&schema, json!({"timeouts": {"create": "5m"}})).is_empty());
    }

    #[test]
    fn test_validate_int64() {
        let schema = Schema::v0().with_attribute("count", Attribute::required_int64());

        assert!(check(&schema, json!({"count": 42})).is_empty());
        assert!(check(&schema, json!({"count": 42.0})).is_empty());
        assert_eq!(check(&schema, json!({"count": 42.5})).len(), 1);
        assert_eq!(check(&schema, json!({"count": "42"})).len(), 1);
    }

    #[test]
    fn test_validate_list_elements() {
        let schema = Schema::v0().with_attribute(
            "names",
            Attribute::new(
                AttributeType::list(AttributeType::String),
                AttributeFlags::required(),
            )
            .with_max_items(2),
        );

        assert!(check(&schema, json!({"names": ["a", "b"]})).is_empty());

        let diagnostics = check(&schema, json!({"names": ["a", 123]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("names.1".to_string()));

        let diagnostics = check(&schema, json!({"names": ["a", "b", "c"]}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at most 2"));
    }

    #[test]
    fn test_validate_map() {
        let schema = Schema::v0().with_attribute("labels", Attribute::optional_string_map());

        assert!(check(&schema, json!({"labels": {"env": "prod"}})).is_empty());

        let diagnostics = check(&schema, json!({"labels": {"env": "prod", "count": 42}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("labels.count".to_string()));
    }

    #[test]
    fn test_validators_run_with_path() {
        let schema = Schema::v0().with_attribute(
            "name",
            Attribute::required_string().with_validator(Validator::new(|v, path| {
                if v.as_str().is_some_and(|s| s.len() > 3) {
                    vec![Diagnostic::error("too long").with_attribute(path)]
                } else {
                    vec![]
                }
            })),
        );

        assert!(check(&schema, json!({"name": "abc"})).is_empty());
        let diagnostics = check(&schema, json!({"name": "abcd"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("name".to_string()));

        // Validators do not run against unknown values.
        assert!(check(&schema, json!({"name": UNKNOWN_VALUE})).is_empty());
    }

    #[test]
    fn test_conflicts_with_is_reported_once() {
        let schema = Schema::v0()
            .with_attribute("a", Attribute::optional_string().with_conflicts_with(&["b"]))
            .with_attribute("b", Attribute::optional_string().with_conflicts_with(&["a"]));

        assert!(check(&schema, json!({"a": "x"})).is_empty());
        let diagnostics = check(&schema, json!({"a": "x", "b": "y"}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "'a' conflicts with 'b'");
    }

    #[test]
    fn test_conflicts_with_declared_on_one_side_only() {
        let schema = Schema::v0()
            .with_attribute("a", Attribute::optional_string())
            .with_attribute("b", Attribute::optional_string().with_conflicts_with(&["a"]));

        let diagnostics = check(&schema, json!({"a": "x", "b": "y"}));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_exactly_one_of() {
        let schema = Schema::v0()
            .with_attribute("a", Attribute::optional_string().with_exactly_one_of(&["a", "b"]))
            .with_attribute("b", Attribute::optional_string().with_exactly_one_of(&["a", "b"]));

        assert!(check(&schema, json!({"a": "x"})).is_empty());

        let diagnostics = check(&schema, json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "exactly one of `a,b` must be specified");

        assert_eq!(check(&schema, json!({"a": "x", "b": "y"})).len(), 1);
    }

    #[test]
    fn test_at_least_one_of() {
        let schema = Schema::v0()
            .with_attribute("a", Attribute::optional_string().with_at_least_one_of(&["b"]))
            .with_attribute("b", Attribute::optional_string());

        assert!(check(&schema, json!({"a": "x", "b": "y"})).is_empty());
        assert!(check(&schema, json!({"b": "y"})).is_empty());
        let diagnostics = check(&schema, json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].summary, "one of `a,b` must be specified");
    }

    #[test]
    fn test_validate_nested_block_list() {
        let schema = Schema::v0().with_block(
            "ingress",
            NestedBlock::list(Block::new().with_attribute("port", Attribute::required_int64()))
                .with_min_items(1)
                .with_max_items(3),
        );

        assert!(check(&schema, json!({"ingress": [{"port": 80}, {"port": 443}]})).is_empty());

        let diagnostics = check(&schema, json!({"ingress": []}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at least 1"));

        let diagnostics = check(
            &schema,
            json!({"ingress": [{"port": 80}, {"port": 443}, {"port": 8080}, {"port": 9090}]}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("at most 3"));

        let diagnostics = check(&schema, json!({"ingress": [{"port": "eighty"}]}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("ingress.0.port".to_string()));
    }

    #[test]
    fn test_validate_single_block_as_object_or_list() {
        let schema = Schema::v0().with_block(
            "config",
            NestedBlock::single(Block::new().with_attribute("enabled", Attribute::required_bool())),
        );

        assert!(check(&schema, json!({"config": {"enabled": true}})).is_empty());
        assert!(check(&schema, json!({"config": [{"enabled": true}]})).is_empty());
        assert!(check(&schema, json!({})).is_empty());

        let diagnostics = check(&schema, json!({"config": {"enabled": "yes"}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("config.enabled".to_string()));
    }

    #[test]
    fn test_validate_deeply_nested() {
        let schema = Schema::v0().with_block(
            "network",
            NestedBlock::list(
                Block::new()
                    .with_attribute("name", Attribute::required_string())
                    .with_block(
                        "subnet",
                        NestedBlock::list(
                            Block::new().with_attribute("cidr", Attribute::required_string()),
                        ),
                    ),
            ),
        );

        let diagnostics = check(
            &schema,
            json!({"network": [{"name": "vpc-1", "subnet": [{"cidr": 123}]}]}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute,
            Some("network.0.subnet.0.cidr".to_string())
        );
    }

    #[test]
    fn test_result_helpers() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(is_valid(&schema, &Value::from(json!({"name": "test"}))));
        assert!(!is_valid(&schema, &Value::from(json!({}))));
        assert!(validate_result(&schema, &Value::from(json!({"name": "test"}))).is_ok());
        assert_eq!(
            validate_result(&schema, &Value::from(json!({}))).unwrap_err().len(),
            1
        );
    }

    #[test]
    fn test_validate_root_not_object() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());
        let diagnostics = check(&schema, json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
    }
}
