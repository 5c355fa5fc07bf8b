//! Per-operation timeouts.
//!
//! A resource bakes in its own defaults; the user may override them with a
//! `timeouts` block in the resource configuration:
//!
//! ```text
//! timeouts = { create = "30m", delete = "1h30m" }
//! ```

use std::time::Duration;

use tokio::time::Instant;

use crate::error::ProviderError;
use crate::types::Operation;
use crate::value::Value;

/// Configuration key holding user timeout overrides.
pub const TIMEOUTS_KEY: &str = "timeouts";

/// Timeout applied when neither the resource nor the user sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Upper bound on any single timeout, user supplied or not.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// The instant `timeout` from now, clamped to [`MAX_TIMEOUT`].
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout.min(MAX_TIMEOUT)
}

/// Timeouts for each lifecycle operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Option<Duration>,
    pub read: Option<Duration>,
    pub update: Option<Duration>,
    pub delete: Option<Duration>,
    pub default: Option<Duration>,
}

impl Timeouts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_create(mut self, timeout: Duration) -> Self {
        self.create = Some(timeout);
        self
    }

    pub fn with_read(mut self, timeout: Duration) -> Self {
        self.read = Some(timeout);
        self
    }

    pub fn with_update(mut self, timeout: Duration) -> Self {
        self.update = Some(timeout);
        self
    }

    pub fn with_delete(mut self, timeout: Duration) -> Self {
        self.delete = Some(timeout);
        self
    }

    pub fn with_default(mut self, timeout: Duration) -> Self {
        self.default = Some(timeout);
        self
    }

    /// The effective timeout for `op`.
    ///
    /// Plan and import are bounded by the read timeout.
    pub fn get(&self, op: Operation) -> Duration {
        let specific = match op {
            Operation::Create => self.create,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
            Operation::Read | Operation::Plan | Operation::Import => self.read,
        };
        specific.or(self.default).unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Layer user overrides from a configuration's `timeouts` block on top
    /// of these defaults.
    pub fn with_overrides(mut self, config: &Value) -> Result<Self, ProviderError> {
        let block = match config.as_map().and_then(|m| m.get(TIMEOUTS_KEY)) {
            None | Some(Value::Null) | Some(Value::Unknown) => return Ok(self),
            Some(Value::List(items)) if items.is_empty() => return Ok(self),
            // Blocks may arrive wrapped in a single-element list.
            Some(Value::List(items)) if items.len() == 1 => &items[0],
            Some(other) => other,
        };
        let Some(entries) = block.as_map() else {
            return Err(ProviderError::Validation(format!(
                "{} must be an object, got {}",
                TIMEOUTS_KEY,
                block.type_name()
            )));
        };

        for (key, value) in entries {
            // Unknown until apply.
            if value.is_null() || matches!(value, Value::Unknown) {
                continue;
            }
            let raw = value.as_str().ok_or_else(|| {
                ProviderError::Validation(format!("{}.{} must be a duration string", TIMEOUTS_KEY, key))
            })?;
            let duration = parse_duration(raw)?;
            let slot = match key.as_str() {
                "create" => &mut self.create,
                "read" => &mut self.read,
                "update" => &mut self.update,
                "delete" => &mut self.delete,
                "default" => &mut self.default,
                other => {
                    return Err(ProviderError::Validation(format!(
                        "unsupported timeout '{}': expected one of create, read, update, delete, default",
                        other
                    )))
                }
            };
            *slot = Some(duration);
        }
        Ok(self)
    }
}

/// Remove the `timeouts` block from a configuration object, returning it.
pub fn strip_timeouts(config: &mut Value) -> Option<Value> {
    match config {
        Value::Map(map) => map.remove(TIMEOUTS_KEY),
        _ => None,
    }
}

/// Parse a duration such as `"30s"`, `"10m"`, `"1h30m"` or `"500ms"`.
pub fn parse_duration(s: &str) -> Result<Duration, ProviderError> {
    let invalid = || ProviderError::Validation(format!("invalid duration '{}'", s));
    let s = s.trim();
    if s.is_empty() {
        return Err(invalid());
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(invalid)?;
        if digits == 0 {
            return Err(invalid());
        }
        let amount: f64 = rest[..digits].parse().map_err(|_| invalid())?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_len] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return Err(invalid()),
        };
        rest = &rest[unit_len..];
        let part = Duration::try_from_secs_f64(amount * seconds_per_unit).map_err(|_| invalid())?;
        total = total.checked_add(part).ok_or_else(invalid)?;
    }
    if total > MAX_TIMEOUT {
        return Err(ProviderError::Validation(format!(
            "duration '{}' exceeds the maximum of {}h",
            s,
            MAX_TIMEOUT.as_secs() / 3600
        )));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("m").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("ten minutes").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_overflow() {
        for raw in ["99999999999999999999h", "5124095576030432h", "18446744073709551615s1s", "721h"] {
            let err = parse_duration(raw).unwrap_err();
            assert!(matches!(err, ProviderError::Validation(_)), "{}", raw);
        }
        assert_eq!(parse_duration("720h").unwrap(), MAX_TIMEOUT);

        let huge = Value::from(json!({"timeouts": {"create": "99999999999999999999h"}}));
        assert!(Timeouts::new().with_overrides(&huge).is_err());
    }

    #[tokio::test]
    async fn test_deadline_is_clamped() {
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline <= Instant::now() + MAX_TIMEOUT);
    }

    #[test]
    fn test_fallback_order() {
        let timeouts = Timeouts::new().with_create(Duration::from_secs(60));
        assert_eq!(timeouts.get(Operation::Create), Duration::from_secs(60));
        assert_eq!(timeouts.get(Operation::Delete), DEFAULT_TIMEOUT);

        let timeouts = timeouts.with_default(Duration::from_secs(5));
        assert_eq!(timeouts.get(Operation::Delete), Duration::from_secs(5));
        assert_eq!(timeouts.get(Operation::Create), Duration::from_secs(60));
    }

    #[test]
    fn test_user_overrides() {
        let base = Timeouts::new().with_create(Duration::from_secs(60));
        let config = Value::from(json!({"name": "x", "timeouts": {"create": "2m", "delete": "1h"}}));
        let timeouts = base.with_overrides(&config).unwrap();
        assert_eq!(timeouts.get(Operation::Create), Duration::from_secs(120));
        assert_eq!(timeouts.get(Operation::Delete), Duration::from_secs(3600));
        assert_eq!(timeouts.get(Operation::Read), DEFAULT_TIMEOUT);

        let wrapped = Value::from(json!({"timeouts": [{"update": "45s"}]}));
        let timeouts = base.with_overrides(&wrapped).unwrap();
        assert_eq!(timeouts.get(Operation::Update), Duration::from_secs(45));

        let bad = Value::from(json!({"timeouts": {"forever": "1h"}}));
        assert!(base.with_overrides(&bad).is_err());
    }

    #[test]
    fn test_strip_timeouts() {
        let mut config = Value::from(json!({"name": "x", "timeouts": {"create": "2m"}}));
        assert!(strip_timeouts(&mut config).is_some());
        assert_eq!(config, Value::from(json!({"name": "x"})));
    }
}
