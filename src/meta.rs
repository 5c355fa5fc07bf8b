//! Provider configuration and the shared meta handle.
//!
//! The host configures the provider once. The resulting [`ProviderMeta`] is
//! handed to every lifecycle callback and never mutated afterwards; clones
//! share the same configuration, clients and root cancellation token.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::arn::{self, Arn};
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, NestedBlock, Schema};
use crate::tags::{DefaultConfig, IgnoreConfig};

/// Provider configuration as declared by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Region API calls are sent to.
    #[serde(default)]
    pub region: Option<String>,
    /// Partition; derived from the region when unset.
    #[serde(default)]
    pub partition: Option<String>,
    /// Account the credentials belong to.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Tags applied to every resource.
    #[serde(default)]
    pub default_tags: DefaultConfig,
    /// Tags the provider must never add or remove.
    #[serde(default)]
    pub ignore_tags: IgnoreConfig,
}

impl ProviderConfig {
    /// Parse the provider configuration object.
    ///
    /// Region falls back to `AWS_REGION`, then `AWS_DEFAULT_REGION`.
    pub fn from_json(config: &serde_json::Value) -> Result<Self, ProviderError> {
        Self::from_json_with_env(config, |name| std::env::var(name).ok())
    }

    /// Like [`from_json`](Self::from_json) with an explicit environment.
    pub fn from_json_with_env(
        config: &serde_json::Value,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ProviderError> {
        let mut config = config.clone();
        if config.is_null() {
            config = serde_json::Value::Object(Default::default());
        }
        // Single blocks may arrive as a one-element list.
        if let Some(obj) = config.as_object_mut() {
            for key in ["default_tags", "ignore_tags"] {
                if let Some(serde_json::Value::Array(items)) = obj.get(key) {
                    let unwrapped = items.first().cloned().unwrap_or(serde_json::Value::Null);
                    obj.insert(key.to_string(), unwrapped);
                }
                if obj.get(key).is_some_and(serde_json::Value::is_null) {
                    obj.remove(key);
                }
            }
        }

        let mut parsed: ProviderConfig = serde_json::from_value(config)
            .map_err(|e| ProviderError::Configuration(format!("invalid provider configuration: {}", e)))?;

        if parsed.region.as_deref().map_or(true, str::is_empty) {
            parsed.region = env("AWS_REGION")
                .or_else(|| env("AWS_DEFAULT_REGION"))
                .filter(|r| !r.is_empty());
        }
        Ok(parsed)
    }

    /// The configuration schema presented to the host.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "region",
                Attribute::optional_string().with_description("Region for API calls"),
            )
            .with_attribute("partition", Attribute::optional_string())
            .with_attribute("account_id", Attribute::optional_string())
            .with_block(
                "default_tags",
                NestedBlock::single(Block::new().with_attribute(
                    "tags",
                    Attribute::optional_string_map(),
                )),
            )
            .with_block(
                "ignore_tags",
                NestedBlock::single(
                    Block::new()
                        .with_attribute("keys", Attribute::optional_string_set())
                        .with_attribute("key_prefixes", Attribute::optional_string_set()),
                ),
            )
    }

    /// The configured region, or an error if none could be resolved.
    pub fn region(&self) -> Result<&str, ProviderError> {
        self.region
            .as_deref()
            .ok_or_else(|| ProviderError::Configuration("region is not set".to_string()))
    }

    /// The partition, explicit or derived from the region.
    pub fn partition(&self) -> &str {
        match (&self.partition, &self.region) {
            (Some(p), _) if !p.is_empty() => p.as_str(),
            (_, Some(region)) => arn::partition_for_region(region),
            _ => "aws",
        }
    }
}

/// Shared handle passed to every lifecycle callback.
#[derive(Clone)]
pub struct ProviderMeta {
    config: Arc<ProviderConfig>,
    clients: Arc<dyn Any + Send + Sync>,
    cancel: CancellationToken,
}

impl ProviderMeta {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config: Arc::new(config),
            clients: Arc::new(()),
            cancel: CancellationToken::new(),
        }
    }

    /// Attach the SDK clients resources will use.
    pub fn with_clients(mut self, clients: Arc<dyn Any + Send + Sync>) -> Self {
        self.clients = clients;
        self
    }

    /// Use `cancel` as the root cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Borrow the clients as their concrete type.
    pub fn clients<C: Any>(&self) -> Result<&C, ProviderError> {
        self.clients.downcast_ref::<C>().ok_or_else(|| {
            ProviderError::Configuration(format!(
                "provider clients are not a {}",
                std::any::type_name::<C>()
            ))
        })
    }

    pub fn region(&self) -> &str {
        self.config.region.as_deref().unwrap_or_default()
    }

    pub fn partition(&self) -> &str {
        self.config.partition()
    }

    pub fn account_id(&self) -> &str {
        self.config.account_id.as_deref().unwrap_or_default()
    }

    pub fn default_tags(&self) -> &DefaultConfig {
        &self.config.default_tags
    }

    pub fn ignore_tags(&self) -> &IgnoreConfig {
        &self.config.ignore_tags
    }

    /// Root cancellation token. Cancelling it stops every operation.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// A regional ARN in this provider's partition, region and account.
    pub fn arn(&self, service: &str, resource: impl Into<String>) -> Arn {
        Arn::new(
            self.partition(),
            service,
            self.region(),
            self.account_id(),
            resource,
        )
    }

    /// An ARN for a global service (no region).
    pub fn global_arn(&self, service: &str, resource: impl Into<String>) -> Arn {
        Arn::new(self.partition(), service, "", self.account_id(), resource)
    }
}

impl Default for ProviderMeta {
    fn default() -> Self {
        Self::new(ProviderConfig::default())
    }
}

impl fmt::Debug for ProviderMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderMeta")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
