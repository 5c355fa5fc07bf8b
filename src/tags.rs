//! Tag reconciliation.
//!
//! Every service speaks its own tag dialect (lists of `{Key, Value}`
//! structs, flat maps, per-call tag specifications). They all translate to
//! and from [`KeyValueTags`], and everything else here (default tags,
//! ignore filters, add/remove computation) works over that one model.
//!
//! Resources expose two attributes:
//!
//! - `tags`: what the user declared, which is what the configuration is
//!   diffed against
//! - `tags_all`: the effective set, provider defaults merged underneath the
//!   user's tags, minus ignored keys

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::diff::ResourceDiff;
use crate::error::ProviderError;
use crate::meta::ProviderMeta;
use crate::resource_data::ResourceData;
use crate::schema::{Attribute, AttributeFlags, AttributeType};
use crate::validators;
use crate::value::Value;

/// Prefix reserved for tags managed by AWS itself.
pub const AWS_TAG_PREFIX: &str = "aws:";

/// Attribute holding the user's tags.
pub const TAGS_KEY: &str = "tags";

/// Attribute holding the effective tags.
pub const TAGS_ALL_KEY: &str = "tags_all";

/// Canonical tag set: key to value, ordered by key, case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyValueTags(BTreeMap<String, String>);

/// A provider-native tag representation.
pub trait NativeTag {
    fn key(&self) -> &str;
    fn value(&self) -> &str;
    fn from_pair(key: String, value: String) -> Self;
}

impl KeyValueTags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Sorted keys.
    pub fn keys(&self) -> Vec<String> {
        self.0.keys().cloned().collect()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    /// Right-biased merge: entries in `other` win.
    pub fn merge(&self, other: &KeyValueTags) -> KeyValueTags {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        KeyValueTags(merged)
    }

    /// Drop keys matched by the ignore configuration.
    pub fn ignore(&self, config: &IgnoreConfig) -> KeyValueTags {
        self.filter(|k, _| !config.matches(k))
    }

    /// Drop keys with the reserved `aws:` prefix.
    pub fn ignore_aws(&self) -> KeyValueTags {
        self.filter(|k, _| !k.starts_with(AWS_TAG_PREFIX))
    }

    /// Drop entries that merely repeat a provider default.
    pub fn remove_default_config(&self, defaults: &DefaultConfig) -> KeyValueTags {
        self.filter(|k, v| defaults.tags.get(k) != Some(v))
    }

    /// Entries present here but absent from `new`.
    pub fn removed(&self, new: &KeyValueTags) -> KeyValueTags {
        self.filter(|k, _| !new.contains_key(k))
    }

    /// Entries in `new` that are missing here or carry a different value.
    pub fn updated(&self, new: &KeyValueTags) -> KeyValueTags {
        new.filter(|k, v| self.get(k) != Some(v))
    }

    fn filter(&self, keep: impl Fn(&str, &str) -> bool) -> KeyValueTags {
        KeyValueTags(
            self.0
                .iter()
                .filter(|(k, v)| keep(k.as_str(), v.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn from_native<T: NativeTag>(tags: &[T]) -> KeyValueTags {
        tags.iter()
            .map(|t| (t.key().to_string(), t.value().to_string()))
            .collect()
    }

    pub fn to_native<T: NativeTag>(&self) -> Vec<T> {
        self.0
            .iter()
            .map(|(k, v)| T::from_pair(k.clone(), v.clone()))
            .collect()
    }

    /// Read a tag map attribute. Null means no tags.
    pub fn from_value(value: &Value) -> Result<KeyValueTags, ProviderError> {
        match value {
            Value::Null => Ok(KeyValueTags::new()),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => Ok((k.clone(), s.clone())),
                    other => Err(ProviderError::Validation(format!(
                        "tag '{}' must be a string, got {}",
                        k,
                        other.type_name()
                    ))),
                })
                .collect(),
            other => Err(ProviderError::Validation(format!(
                "tags must be a map, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::from(self.0.clone())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KeyValueTags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        KeyValueTags(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Provider-level tags merged into every resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultConfig {
    #[serde(default)]
    pub tags: KeyValueTags,
}

impl DefaultConfig {
    pub fn new(tags: KeyValueTags) -> Self {
        Self { tags }
    }

    /// Defaults with the user's tags merged on top.
    pub fn merge_tags(&self, user: &KeyValueTags) -> KeyValueTags {
        self.tags.merge(user)
    }

    /// Keys the user sets to a value different from the default.
    pub fn collisions(&self, user: &KeyValueTags) -> Vec<String> {
        user.iter()
            .filter(|(k, v)| self.tags.get(k).is_some_and(|d| d != v.as_str()))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

/// Tag keys the reconciler neither adds nor removes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Exact keys.
    #[serde(default)]
    pub keys: BTreeSet<String>,
    /// Key prefixes.
    #[serde(default)]
    pub key_prefixes: BTreeSet<String>,
}

impl IgnoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.keys.insert(key.into());
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefixes.insert(prefix.into());
        self
    }

    pub fn matches(&self, key: &str) -> bool {
        self.keys.contains(key) || self.key_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.key_prefixes.is_empty()
    }
}

/// The tag calls needed to move observed tags to the effective set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagsDiff {
    pub to_add: KeyValueTags,
    pub to_remove: KeyValueTags,
}

impl TagsDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

fn collision_error(keys: &[String]) -> ProviderError {
    ProviderError::Validation(format!(
        "tags {} collide with provider default_tags with a different value; \
         remove them from the resource or make the values match",
        keys.iter()
            .map(|k| format!("\"{}\"", k))
            .collect::<Vec<_>>()
            .join(", ")
    ))
}

/// Compute the effective tag set for a resource.
///
/// Fails when a user tag shadows a default tag with a different value.
pub fn effective_tags(
    user: &KeyValueTags,
    defaults: &DefaultConfig,
    ignore: &IgnoreConfig,
) -> Result<KeyValueTags, ProviderError> {
    let collisions = defaults.collisions(user);
    if !collisions.is_empty() {
        return Err(collision_error(&collisions));
    }
    Ok(defaults.merge_tags(user).ignore(ignore))
}

/// Work out which tags to add and remove.
///
/// Ignored keys never appear in either half of the result, and neither do
/// AWS-reserved keys. With `require_one`, an empty effective set is an
/// error.
pub fn reconcile(
    user: &KeyValueTags,
    observed: &KeyValueTags,
    defaults: &DefaultConfig,
    ignore: &IgnoreConfig,
    require_one: bool,
) -> Result<TagsDiff, ProviderError> {
    let effective = effective_tags(user, defaults, ignore)?;
    if require_one && effective.is_empty() {
        return Err(ProviderError::Validation(
            "this resource requires at least one tag after default and ignored tags are applied"
                .to_string(),
        ));
    }

    let observed = observed.ignore(ignore).ignore_aws();
    Ok(TagsDiff {
        to_add: observed.updated(&effective),
        to_remove: observed.removed(&effective),
    })
}

/// Service-specific tag endpoints.
#[async_trait]
pub trait TagUpdater: Send + Sync {
    /// Remove the given keys from the resource.
    async fn untag_resource(&self, identifier: &str, keys: &[String]) -> Result<(), ProviderError>;

    /// Add or overwrite the given tags on the resource.
    async fn tag_resource(&self, identifier: &str, tags: &KeyValueTags) -> Result<(), ProviderError>;
}

/// Move a resource's tags from `old` to `new`, removes first.
///
/// `old` and `new` are effective tag sets (`tags_all`).
pub async fn update_tags<U: TagUpdater + ?Sized>(
    updater: &U,
    identifier: &str,
    old: &KeyValueTags,
    new: &KeyValueTags,
    ignore: &IgnoreConfig,
) -> Result<(), ProviderError> {
    let old = old.ignore(ignore).ignore_aws();
    let new = new.ignore(ignore).ignore_aws();

    let removed = old.removed(&new);
    if !removed.is_empty() {
        debug!(identifier, keys = ?removed.keys(), "removing tags");
        updater.untag_resource(identifier, &removed.keys()).await?;
    }

    let updated = old.updated(&new);
    if !updated.is_empty() {
        debug!(identifier, keys = ?updated.keys(), "adding tags");
        updater.tag_resource(identifier, &updated).await?;
    }

    Ok(())
}

/// Schema for a resource's `tags` attribute.
pub fn tags_schema() -> Attribute {
    Attribute::optional_string_map().with_validator(validators::valid_tag_key())
}

/// Schema for a resource's `tags_all` attribute.
pub fn tags_all_schema() -> Attribute {
    Attribute::new(
        AttributeType::map(AttributeType::String),
        AttributeFlags::computed(),
    )
}

/// Customize-diff hook planning `tags_all` and rejecting default-tag
/// collisions.
pub fn tags_customize_diff(
    diff: &mut ResourceDiff<'_>,
    meta: &ProviderMeta,
) -> Result<(), ProviderError> {
    let config = diff.get_config(TAGS_KEY).clone();
    if !config.is_known() {
        return diff.set_new_computed(TAGS_ALL_KEY);
    }

    let user = KeyValueTags::from_value(&config)?;
    let all = effective_tags(&user, meta.default_tags(), meta.ignore_tags())?;
    diff.set_new(TAGS_ALL_KEY, all.to_value())
}

/// Record observed tags on the resource during Read.
///
/// `tags_all` receives the effective set. `tags` receives the user's view:
/// observed tags minus those that only repeat a provider default, so the
/// configuration does not diff against defaults.
pub fn set_tags_from_observed(
    d: &mut ResourceData,
    observed: &KeyValueTags,
    meta: &ProviderMeta,
) -> Result<(), ProviderError> {
    let all = observed.ignore_aws().ignore(meta.ignore_tags());
    let configured = KeyValueTags::from_value(d.get(TAGS_KEY)).unwrap_or_default();

    let user: KeyValueTags = all
        .iter()
        .filter(|(k, v)| {
            configured.get(k) == Some(v.as_str())
                || meta.default_tags().tags.get(k) != Some(v.as_str())
        })
        .collect();

    d.set(TAGS_KEY, user.to_value())?;
    d.set(TAGS_ALL_KEY, all.to_value())
}
