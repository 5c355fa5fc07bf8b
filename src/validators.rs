//! Stock validators and diff suppressors.
//!
//! These are the building blocks resource schemas attach with
//! [`Attribute::with_validator`](crate::schema::Attribute::with_validator)
//! and [`Attribute::with_diff_suppress`](crate::schema::Attribute::with_diff_suppress).
//! Validators skip values of the wrong type; type errors are reported by
//! [`validate`](crate::validation::validate) itself.

use crate::arn::Arn;
use crate::cidr;
use crate::schema::{Diagnostic, DiffSuppress, Validator};
use crate::tags::AWS_TAG_PREFIX;
use crate::value::Value;

/// Longest tag key AWS accepts.
pub const MAX_TAG_KEY_LEN: usize = 128;

fn invalid(path: &str, summary: String) -> Vec<Diagnostic> {
    vec![Diagnostic::error(summary).with_attribute(path)]
}

/// String length must be within `[min, max]` characters.
pub fn string_len_between(min: usize, max: usize) -> Validator {
    Validator::new(move |value, path| match value.as_str() {
        Some(s) if !(min..=max).contains(&s.chars().count()) => invalid(
            path,
            format!(
                "expected length of {} to be in the range ({} - {}), got {}",
                path,
                min,
                max,
                s.chars().count()
            ),
        ),
        _ => vec![],
    })
}

/// String must be one of `allowed`.
pub fn string_in_slice(allowed: &[&str], ignore_case: bool) -> Validator {
    let allowed: Vec<String> = allowed.iter().map(|s| s.to_string()).collect();
    Validator::new(move |value, path| {
        let Some(s) = value.as_str() else {
            return vec![];
        };
        let found = allowed.iter().any(|a| {
            if ignore_case {
                a.eq_ignore_ascii_case(s)
            } else {
                a == s
            }
        });
        if found {
            vec![]
        } else {
            invalid(
                path,
                format!("expected {} to be one of [{}], got {}", path, allowed.join(", "), s),
            )
        }
    })
}

/// String must start with `prefix`.
pub fn string_matches_prefix(prefix: &str) -> Validator {
    let prefix = prefix.to_string();
    Validator::new(move |value, path| match value.as_str() {
        Some(s) if !s.starts_with(&prefix) => invalid(
            path,
            format!("expected {} to start with '{}', got {}", path, prefix, s),
        ),
        _ => vec![],
    })
}

/// Integer must be within `[min, max]`.
pub fn int_between(min: i64, max: i64) -> Validator {
    Validator::new(move |value, path| match value.as_i64() {
        Some(i) if !(min..=max).contains(&i) => invalid(
            path,
            format!("expected {} to be in the range ({} - {}), got {}", path, min, max, i),
        ),
        _ => vec![],
    })
}

/// String must parse as an ARN.
pub fn valid_arn() -> Validator {
    Validator::new(|value, path| match value.as_str() {
        Some(s) => match Arn::parse(s) {
            Ok(_) => vec![],
            Err(e) => invalid(path, format!("{} is an invalid ARN: {}", path, e.message())),
        },
        None => vec![],
    })
}

/// String must be a CIDR block with no host bits set.
pub fn valid_cidr_network() -> Validator {
    Validator::new(|value, path| {
        let Some(s) = value.as_str() else {
            return vec![];
        };
        match cidr::canonical_cidr(s) {
            Err(e) => invalid(path, format!("{}: {}", path, e.message())),
            Ok(canonical) if !cidr::is_network_address(s) => invalid(
                path,
                format!(
                    "{} is not a network address: {} (did you mean {}?)",
                    path, s, canonical
                ),
            ),
            Ok(_) => vec![],
        }
    })
}

/// String must be a JSON document.
pub fn valid_json() -> Validator {
    Validator::new(|value, path| match value.as_str() {
        Some(s) => match serde_json::from_str::<serde_json::Value>(s) {
            Ok(_) => vec![],
            Err(e) => invalid(path, format!("{} contains an invalid JSON: {}", path, e)),
        },
        None => vec![],
    })
}

/// Every key of a map must be a legal user tag key.
pub fn valid_tag_key() -> Validator {
    Validator::new(|value, path| {
        let Some(map) = value.as_map() else {
            return vec![];
        };
        map.keys()
            .filter_map(|key| tag_key_problem(key).map(|p| (key, p)))
            .map(|(key, problem)| {
                Diagnostic::error(format!("invalid tag key '{}': {}", key, problem))
                    .with_attribute(format!("{}.{}", path, key))
            })
            .collect()
    })
}

fn tag_key_problem(key: &str) -> Option<&'static str> {
    if key.is_empty() {
        Some("must not be empty")
    } else if key.chars().count() > MAX_TAG_KEY_LEN {
        Some("must be at most 128 characters")
    } else if key.to_ascii_lowercase().starts_with(AWS_TAG_PREFIX) {
        Some("the aws: prefix is reserved")
    } else {
        None
    }
}

/// Apply `inner` to every element of a list or set, or every value of a map.
pub fn each(inner: Validator) -> Validator {
    Validator::new(move |value, path| match value {
        Value::List(items) => items
            .iter()
            .enumerate()
            .flat_map(|(i, item)| inner.validate(item, &format!("{}.{}", path, i)))
            .collect(),
        Value::Map(map) => map
            .iter()
            .flat_map(|(k, v)| inner.validate(v, &format!("{}.{}", path, k)))
            .collect(),
        other => inner.validate(other, path),
    })
}

/// Ignore differences in letter case.
pub fn suppress_case_insensitive() -> DiffSuppress {
    DiffSuppress::new(|_, old, new| match (old.as_str(), new.as_str()) {
        (Some(o), Some(n)) => o.eq_ignore_ascii_case(n),
        _ => false,
    })
}

/// Ignore differences between CIDR blocks that denote the same network.
pub fn suppress_equivalent_cidr() -> DiffSuppress {
    DiffSuppress::new(|_, old, new| match (old.as_str(), new.as_str()) {
        (Some(o), Some(n)) => cidr::cidrs_equivalent(o, n),
        _ => false,
    })
}

/// Ignore whitespace and key-order differences between JSON documents.
pub fn suppress_equivalent_json() -> DiffSuppress {
    DiffSuppress::new(|_, old, new| {
        let parse = |v: &Value| {
            v.as_str()
                .and_then(|s| serde_json::from_str::<serde_json::Value>(s).ok())
        };
        match (parse(old), parse(new)) {
            (Some(o), Some(n)) => o == n,
            _ => false,
        }
    })
}

/// Ignore an optional single block the user omitted but the API reports.
pub fn suppress_missing_optional_block() -> DiffSuppress {
    DiffSuppress::new(|_, old, new| {
        let new_missing = match new {
            Value::Null => true,
            Value::List(items) => items.is_empty(),
            _ => false,
        };
        let old_single = match old {
            Value::List(items) => items.len() == 1,
            Value::Map(_) => true,
            _ => false,
        };
        new_missing && old_single
    })
}
