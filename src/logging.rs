//! Logging and tracing utilities.
//!
//! Logs go to **stderr**; stdout belongs to the plugin host. Filtering is
//! controlled through `RUST_LOG`:
//!
//! ```bash
//! # Show debug logs for the reconciliation core only
//! RUST_LOG=hemmer_aws_core=debug ./hemmer-provider-aws
//!
//! # Trace every waiter poll
//! RUST_LOG=info,hemmer_aws_core::waiter=trace ./hemmer-provider-aws
//! ```
//!
//! Resource state can carry secrets. Anything that logs a state object runs
//! it through [`redact_sensitive`] first.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::schema::{Block, BlockNestingMode, Schema};

/// Replacement for sensitive values in logged state.
pub const REDACTED: &str = "(sensitive value)";

fn try_init_with(default_level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .try_init()
        .is_ok()
}

/// Initialize the default logging subscriber at `info` unless `RUST_LOG`
/// says otherwise.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`] with a different default level.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    if !try_init_with(default_level) {
        panic!("a global tracing subscriber is already set");
    }
}

/// Try to initialize logging, returning false if already initialized.
pub fn try_init_logging() -> bool {
    try_init_with("info")
}

/// Copy `state` with every sensitive attribute replaced by [`REDACTED`].
///
/// Null values stay null so logs still show which attributes are unset.
pub fn redact_sensitive(schema: &Schema, state: &serde_json::Value) -> serde_json::Value {
    redact_block(&schema.block, state)
}

fn redact_block(block: &Block, value: &serde_json::Value) -> serde_json::Value {
    let Some(object) = value.as_object() else {
        return value.clone();
    };
    let mut out = object.clone();
    for (key, attr) in &block.attributes {
        if attr.flags.sensitive {
            if let Some(v) = out.get_mut(key) {
                if !v.is_null() {
                    *v = serde_json::Value::String(REDACTED.to_string());
                }
            }
        }
    }
    for (key, nested) in &block.blocks {
        let Some(v) = out.get_mut(key) else {
            continue;
        };
        *v = match (&nested.nesting_mode, &*v) {
            (_, serde_json::Value::Array(items)) => {
                serde_json::Value::Array(
                    items.iter().map(|item| redact_block(&nested.block, item)).collect(),
                )
            }
            (BlockNestingMode::Map, serde_json::Value::Object(entries)) => {
                serde_json::Value::Object(
                    entries
                        .iter()
                        .map(|(k, item)| (k.clone(), redact_block(&nested.block, item)))
                        .collect(),
                )
            }
            (_, other) => redact_block(&nested.block, other),
        };
    }
    serde_json::Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, NestedBlock};
    use serde_json::json;

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new("info").is_ok());
        assert!(EnvFilter::try_new("hemmer_aws_core=debug").is_ok());
        assert!(EnvFilter::try_new("warn,hemmer_aws_core::waiter=trace").is_ok());
    }

    #[test]
    fn test_redact_sensitive() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("password", Attribute::optional_string().sensitive())
            .with_attribute("token", Attribute::optional_string().sensitive())
            .with_block(
                "user",
                NestedBlock::list(
                    Block::new()
                        .with_attribute("login", Attribute::required_string())
                        .with_attribute("secret", Attribute::required_string().sensitive()),
                ),
            )
            .with_block(
                "auth",
                NestedBlock::single(
                    Block::new().with_attribute("key", Attribute::required_string().sensitive()),
                ),
            );

        let state = json!({
            "name": "db",
            "password": "hunter2",
            "token": null,
            "user": [{"login": "a", "secret": "s1"}, {"login": "b", "secret": "s2"}],
            "auth": {"key": "k"}
        });

        assert_eq!(
            redact_sensitive(&schema, &state),
            json!({
                "name": "db",
                "password": REDACTED,
                "token": null,
                "user": [{"login": "a", "secret": REDACTED}, {"login": "b", "secret": REDACTED}],
                "auth": {"key": REDACTED}
            })
        );
    }

    #[test]
    fn test_redact_non_object_is_unchanged() {
        let schema = Schema::v0().with_attribute("p", Attribute::optional_string().sensitive());
        assert_eq!(redact_sensitive(&schema, &json!(null)), json!(null));
    }
}
