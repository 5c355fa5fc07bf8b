//! The host-facing provider surface.
//!
//! The host orchestrator drives a provider through [`ProviderService`]:
//! it fetches the schema, configures the provider once, then plans and
//! applies resources concurrently. State crosses this boundary as
//! `serde_json::Value` objects; values unknown until apply are the
//! [`UNKNOWN_VALUE`](crate::value::UNKNOWN_VALUE) sentinel string.

use crate::error::ProviderError;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::types::{ImportedResource, PlanResult, ProviderMetadata};

/// Trait the host calls into.
///
/// [`Provider`](crate::Provider) implements it over a registry of
/// [`Resource`](crate::Resource)s; test doubles can implement it directly.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Return the provider configuration schema and every resource schema.
    fn schema(&self) -> ProviderSchema;

    /// Return provider metadata. By default, derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: self.schema().resources.keys().cloned().collect(),
            importable: Vec::new(),
        }
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(
        &self,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure the provider. Called once per plugin invocation.
    async fn configure(&self, config: serde_json::Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Stop the provider, cancelling in-flight operations.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Plan a resource. `prior_state` is `None` on create; a null `config`
    /// plans a destroy.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<serde_json::Value>,
        config: serde_json::Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a resource from its planned state, returning the observed state.
    async fn create(
        &self,
        resource_type: &str,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Refresh a resource. `None` means it no longer exists.
    async fn read(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, ProviderError>;

    /// Update a resource in place, returning the observed state.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: serde_json::Value,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError>;

    /// Delete a resource.
    async fn delete(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<(), ProviderError>;

    /// Import existing infrastructure into management.
    async fn import_resource(
        &self,
        resource_type: &str,
        _id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        Err(ProviderError::Import(format!(
            "{} does not support import",
            resource_type
        )))
    }
}
