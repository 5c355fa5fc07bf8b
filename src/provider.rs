//! The resource registry and lifecycle dispatcher.
//!
//! [`Provider`] owns every registered [`Resource`] and implements
//! [`ProviderService`] on top of them. For each host call it builds a
//! [`ResourceData`] view, runs the resource callback under the operation's
//! timeout with panics caught and cancellation observed, and wraps any error
//! with the resource type, id and operation.

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::diff::{self, ResourceDiff};
use crate::error::ProviderError;
use crate::logging::redact_sensitive;
use crate::meta::{ProviderConfig, ProviderMeta};
use crate::resource::Resource;
use crate::resource_data::ResourceData;
use crate::schema::{has_errors, Diagnostic, ProviderSchema};
use crate::service::ProviderService;
use crate::timeouts::TIMEOUTS_KEY;
use crate::types::{ImportedResource, Operation, PlanResult, ProviderMetadata};
use crate::validation;
use crate::value::Value;

/// Builds the SDK clients shared by every resource from the configuration.
pub type ClientFactory =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn Any + Send + Sync>, ProviderError> + Send + Sync>;

/// A provider: a set of resources plus the meta built at configure time.
///
/// # Example
///
/// ```ignore
/// use hemmer_aws_core::{Provider, Resource, Importer};
///
/// let provider = Provider::new()
///     .with_client_factory(|config| Ok(Arc::new(Clients::new(config.region()?)?)))
///     .with_resource(
///         Resource::new("aws_sqs_queue", queue_schema(), Queue)
///             .with_importer(Importer::PassThrough)
///             .with_tags(),
///     )?;
/// ```
pub struct Provider {
    resources: BTreeMap<String, Resource>,
    client_factory: Option<ClientFactory>,
    meta: OnceLock<ProviderMeta>,
    cancel: CancellationToken,
}

impl Provider {
    pub fn new() -> Self {
        Self {
            resources: BTreeMap::new(),
            client_factory: None,
            meta: OnceLock::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a resource. Malformed schemas and duplicate names are
    /// rejected here rather than at plan time.
    pub fn with_resource(mut self, resource: Resource) -> Result<Self, ProviderError> {
        resource.internal_validate()?;
        if self.resources.contains_key(resource.name()) {
            return Err(ProviderError::Sdk(format!(
                "resource {} is registered twice",
                resource.name()
            )));
        }
        self.resources.insert(resource.name().to_string(), resource);
        Ok(self)
    }

    pub fn with_client_factory(
        mut self,
        factory: impl Fn(&ProviderConfig) -> Result<Arc<dyn Any + Send + Sync>, ProviderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.client_factory = Some(Arc::new(factory));
        self
    }

    /// Look up a registered resource.
    pub fn resource(&self, resource_type: &str) -> Result<&Resource, ProviderError> {
        self.resources
            .get(resource_type)
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    /// The meta built by `configure`.
    pub fn meta(&self) -> Result<&ProviderMeta, ProviderError> {
        self.meta
            .get()
            .ok_or_else(|| ProviderError::Configuration("provider is not configured".to_string()))
    }

    fn data(&self, resource: &Resource, operation: Operation, meta: &ProviderMeta) -> ResourceData {
        ResourceData::new(resource.name(), resource.schema().clone(), operation)
            .with_timeouts(resource.timeouts().clone())
            .with_cancellation(meta.cancellation().child_token())
            .with_service(resource.service_errors())
    }
}

impl Default for Provider {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one callback under `timeout`, catching panics and honoring `cancel`.
async fn guarded<T>(
    operation: Operation,
    timeout: Duration,
    cancel: &CancellationToken,
    callback: impl Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    let callback = AssertUnwindSafe(callback).catch_unwind();
    tokio::select! {
        result = tokio::time::timeout(timeout, callback) => match result {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(ProviderError::Panic(panic_message(panic.as_ref()))),
            Err(_) => Err(ProviderError::timeout(
                format!("{} to complete ({:?})", operation, timeout),
                None,
            )),
        },
        _ = cancel.cancelled() => Err(ProviderError::Cancelled(format!("{} was stopped", operation))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

/// An apply failure after the object may have changed.
///
/// Returns the error with `state` attached when there is a state to record.
fn applied_with_error(state: serde_json::Value, source: ProviderError) -> ProviderError {
    if state.is_null() {
        return source;
    }
    ProviderError::PartialUpdate {
        state,
        source: Box::new(source),
    }
}

fn prior_id(state: &Value) -> &str {
    state.get_path("id").and_then(Value::as_str).unwrap_or_default()
}

#[async_trait::async_trait]
impl ProviderService for Provider {
    fn schema(&self) -> ProviderSchema {
        self.resources.values().fold(
            ProviderSchema::new().with_provider_config(ProviderConfig::schema()),
            |schema, resource| schema.with_resource(resource.name(), resource.schema().as_ref().clone()),
        )
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: self.resources.keys().cloned().collect(),
            importable: self
                .resources
                .values()
                .filter(|r| r.importer().is_supported())
                .map(|r| r.name().to_string())
                .collect(),
        }
    }

    #[instrument(skip_all, name = "provider.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validation::validate(
            &ProviderConfig::schema(),
            &Value::from_json(&config),
        ))
    }

    #[instrument(skip_all, name = "provider.configure")]
    async fn configure(&self, config: serde_json::Value) -> Result<Vec<Diagnostic>, ProviderError> {
        debug!("Configure called");
        let mut diagnostics = validation::validate(&ProviderConfig::schema(), &Value::from_json(&config));
        if has_errors(&diagnostics) {
            warn!(diagnostics = diagnostics.len(), "Configure completed with errors");
            return Ok(diagnostics);
        }

        let parsed = ProviderConfig::from_json(&config)?;
        if parsed.region.is_none() {
            diagnostics.push(
                Diagnostic::error("region is not set")
                    .with_detail("Set region in the provider configuration or the AWS_REGION environment variable.")
                    .with_attribute("region"),
            );
            warn!("Configure completed with errors");
            return Ok(diagnostics);
        }

        let clients = match &self.client_factory {
            Some(factory) => Some(factory(&parsed)?),
            None => None,
        };
        let region = parsed.region.clone().unwrap_or_default();
        let partition = parsed.partition().to_string();
        let mut meta = ProviderMeta::new(parsed).with_cancellation(self.cancel.clone());
        if let Some(clients) = clients {
            meta = meta.with_clients(clients);
        }
        self.meta.set(meta).map_err(|_| {
            ProviderError::Configuration("provider is already configured".to_string())
        })?;

        info!(region = %region, partition = %partition, "Configure completed successfully");
        Ok(diagnostics)
    }

    #[instrument(skip_all, name = "provider.stop")]
    async fn stop(&self) -> Result<(), ProviderError> {
        info!("Stop called, cancelling in-flight operations");
        self.cancel.cancel();
        Ok(())
    }

    #[instrument(skip(self, config), name = "provider.validate_resource_config")]
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: serde_json::Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let diagnostics = validation::validate(resource.schema(), &Value::from_json(&config));
        if has_errors(&diagnostics) {
            warn!(diagnostics = diagnostics.len(), "ValidateResourceConfig completed with errors");
        }
        Ok(diagnostics)
    }

    #[instrument(skip(self, prior_state, config), name = "provider.plan")]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<serde_json::Value>,
        config: serde_json::Value,
    ) -> Result<PlanResult, ProviderError> {
        let resource = self.resource(resource_type)?;
        let meta = self.meta()?;
        let prior = prior_state.as_ref().map(Value::from_json);
        let id = prior.as_ref().map(prior_id).unwrap_or_default().to_string();
        let config = Value::from_json(&config);
        debug!(is_create = prior.as_ref().map_or(true, |v| v.is_null()), "Plan called");

        if let Err(e) = resource.timeouts().clone().with_overrides(&config) {
            let diagnostic = Diagnostic::error(e.message()).with_attribute(TIMEOUTS_KEY);
            return Err(ProviderError::Diagnostics(vec![diagnostic]).with_context(
                resource_type,
                &id,
                Operation::Plan,
            ));
        }

        let result = guarded(
            Operation::Plan,
            resource.timeouts().get(Operation::Plan),
            meta.cancellation(),
            async {
                diff::diff(
                    resource.schema(),
                    prior.as_ref(),
                    &config,
                    meta,
                    resource.customize_diff(),
                )
                .map(ResourceDiff::into_plan_result)
            },
        )
        .await
        .map_err(|e| e.with_context(resource_type, &id, Operation::Plan));

        match &result {
            Ok(plan) => info!(
                changes = plan.changes.len(),
                requires_replace = plan.requires_replace,
                "Plan completed"
            ),
            Err(e) => error!(error = %e, "Plan failed"),
        }
        result
    }

    #[instrument(skip(self, planned_state), name = "provider.create")]
    async fn create(
        &self,
        resource_type: &str,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let meta = self.meta()?;
        let planned = Value::from_json(&planned_state);
        let timeouts = resource
            .timeouts()
            .clone()
            .with_overrides(&planned)
            .map_err(|e| e.with_context(resource_type, "", Operation::Create))?;
        let mut d = self
            .data(resource, Operation::Create, meta)
            .with_planned(&planned)
            .with_timeouts(timeouts);
        let cancel = d.cancellation().clone();
        info!("Create called");

        d.mark_new_resource();
        let created = guarded(
            Operation::Create,
            d.timeout(Operation::Create),
            &cancel,
            resource.handler().create(&mut d, meta),
        )
        .await;
        if let Err(e) = created {
            error!(error = %e, id = %d.id(), "Create failed");
            let e = e.with_context(resource_type, d.id(), Operation::Create);
            return Err(applied_with_error(d.state(), e));
        }
        if d.id().is_empty() {
            return Err(ProviderError::Sdk("create completed without setting an id".to_string())
                .with_context(resource_type, "", Operation::Create));
        }

        d.set_operation(Operation::Read);
        let read = guarded(
            Operation::Read,
            d.timeout(Operation::Read),
            &cancel,
            resource.handler().read(&mut d, meta),
        )
        .await;
        d.clear_new_resource();
        if let Err(e) = read {
            error!(error = %e, id = %d.id(), "Read after create failed");
            let e = e.with_context(resource_type, d.id(), Operation::Read);
            return Err(applied_with_error(d.state(), e));
        }
        if d.id().is_empty() {
            return Err(ProviderError::NotFound(
                "resource disappeared immediately after creation".to_string(),
            )
            .with_context(resource_type, "", Operation::Create));
        }

        let state = d.state();
        info!(id = %d.id(), "Create completed successfully");
        debug!(state = %redact_sensitive(resource.schema(), &state), "created state");
        Ok(state)
    }

    #[instrument(skip(self, current_state), name = "provider.read")]
    async fn read(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<Option<serde_json::Value>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let meta = self.meta()?;
        let prior = Value::from_json(&current_state);
        let timeouts = resource
            .timeouts()
            .clone()
            .with_overrides(&prior)
            .map_err(|e| e.with_context(resource_type, prior_id(&prior), Operation::Read))?;
        let mut d = self
            .data(resource, Operation::Read, meta)
            .with_prior(&prior)
            .with_timeouts(timeouts);
        if d.id().is_empty() {
            return Ok(None);
        }
        let cancel = d.cancellation().clone();
        debug!(id = %d.id(), "Read called");

        guarded(
            Operation::Read,
            d.timeout(Operation::Read),
            &cancel,
            resource.handler().read(&mut d, meta),
        )
        .await
        .map_err(|e| {
            error!(error = %e, "Read failed");
            e.with_context(resource_type, d.id(), Operation::Read)
        })?;

        if d.id().is_empty() {
            info!("Resource no longer exists");
            return Ok(None);
        }
        let state = d.state();
        debug!(state = %redact_sensitive(resource.schema(), &state), "Read completed");
        Ok(Some(state))
    }

    #[instrument(skip(self, prior_state, planned_state), name = "provider.update")]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: serde_json::Value,
        planned_state: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let meta = self.meta()?;
        let prior = Value::from_json(&prior_state);
        let planned = Value::from_json(&planned_state);
        let timeouts = resource
            .timeouts()
            .clone()
            .with_overrides(&planned)
            .map_err(|e| e.with_context(resource_type, prior_id(&prior), Operation::Update))?;
        let mut d = self
            .data(resource, Operation::Update, meta)
            .with_prior(&prior)
            .with_planned(&planned)
            .with_timeouts(timeouts);
        let cancel = d.cancellation().clone();
        info!(id = %d.id(), "Update called");

        let updated = guarded(
            Operation::Update,
            d.timeout(Operation::Update),
            &cancel,
            resource.handler().update(&mut d, meta),
        )
        .await;
        if let Err(e) = updated {
            error!(error = %e, id = %d.id(), "Update failed");
            let e = e.with_context(resource_type, d.id(), Operation::Update);
            return Err(applied_with_error(d.partial_state(), e));
        }

        d.set_operation(Operation::Read);
        let read = guarded(
            Operation::Read,
            d.timeout(Operation::Read),
            &cancel,
            resource.handler().read(&mut d, meta),
        )
        .await;
        if let Err(e) = read {
            error!(error = %e, id = %d.id(), "Read after update failed");
            let e = e.with_context(resource_type, d.id(), Operation::Read);
            return Err(applied_with_error(d.state(), e));
        }
        if d.id().is_empty() {
            return Err(ProviderError::NotFound(
                "resource disappeared during update".to_string(),
            )
            .with_context(resource_type, prior_id(&prior), Operation::Update));
        }

        info!(id = %d.id(), "Update completed successfully");
        Ok(d.state())
    }

    #[instrument(skip(self, current_state), name = "provider.delete")]
    async fn delete(
        &self,
        resource_type: &str,
        current_state: serde_json::Value,
    ) -> Result<(), ProviderError> {
        let resource = self.resource(resource_type)?;
        let meta = self.meta()?;
        let prior = Value::from_json(&current_state);
        let timeouts = resource
            .timeouts()
            .clone()
            .with_overrides(&prior)
            .map_err(|e| e.with_context(resource_type, prior_id(&prior), Operation::Delete))?;
        let mut d = self
            .data(resource, Operation::Delete, meta)
            .with_prior(&prior)
            .with_timeouts(timeouts);
        if d.id().is_empty() {
            return Ok(());
        }
        let cancel = d.cancellation().clone();
        info!(id = %d.id(), "Delete called");

        match guarded(
            Operation::Delete,
            d.timeout(Operation::Delete),
            &cancel,
            resource.handler().delete(&mut d, meta),
        )
        .await
        {
            Ok(()) => {
                info!(id = %d.id(), "Delete completed successfully");
                Ok(())
            }
            Err(e) if e.is_not_found_for(resource.service_errors()) => {
                info!(id = %d.id(), "Resource was already deleted");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Delete failed");
                Err(e.with_context(resource_type, d.id(), Operation::Delete))
            }
        }
    }

    #[instrument(skip(self), name = "provider.import_resource")]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let meta = self.meta()?;
        let mut d = self.data(resource, Operation::Import, meta);
        let cancel = d.cancellation().clone();
        let timeout = d.timeout(Operation::Import);
        info!("Import called");

        guarded(Operation::Import, timeout, &cancel, async {
            resource.importer().import(id, &mut d, meta)
        })
        .await
        .map_err(|e| e.with_context(resource_type, id, Operation::Import))?;
        if d.id().is_empty() {
            return Err(ProviderError::Import("importer did not set an id".to_string())
                .with_context(resource_type, id, Operation::Import));
        }

        d.set_operation(Operation::Read);
        guarded(
            Operation::Read,
            d.timeout(Operation::Read),
            &cancel,
            resource.handler().read(&mut d, meta),
        )
        .await
        .map_err(|e| e.with_context(resource_type, d.id(), Operation::Import))?;
        if d.id().is_empty() {
            return Err(ProviderError::Import(format!(
                "cannot import non-existent remote object ({})",
                id
            ))
            .with_context(resource_type, id, Operation::Import));
        }

        info!(id = %d.id(), "Import completed successfully");
        Ok(vec![ImportedResource::new(resource_type, d.state())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::read_not_found;
    use crate::importer::Importer;
    use crate::resource::ResourceHandler;
    use crate::schema::{Attribute, Schema};
    use crate::timeouts::Timeouts;
    use async_trait::async_trait;
    use serde_json::json;

    /// A handler whose behavior is picked by the `mode` attribute.
    struct Scripted;

    #[async_trait]
    impl ResourceHandler for Scripted {
        async fn create(&self, d: &mut ResourceData, _: &ProviderMeta) -> Result<(), ProviderError> {
            match d.get_str("mode").unwrap_or_default() {
                "panic" => panic!("boom in create"),
                "hang" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
                "no-id" => Ok(()),
                "half" => {
                    d.set_id("half-1");
                    Err(ProviderError::api("InvalidParameterValue", "bad setting"))
                }
                _ => {
                    d.set_id("obj-1");
                    Ok(())
                }
            }
        }

        async fn read(&self, d: &mut ResourceData, _: &ProviderMeta) -> Result<(), ProviderError> {
            match d.get_str("mode") {
                Some("vanish") => d.set_id(""),
                Some("cache-missing") => {
                    return read_not_found(d, cache_missing());
                }
                _ => {}
            }
            Ok(())
        }

        async fn update(&self, d: &mut ResourceData, _: &ProviderMeta) -> Result<(), ProviderError> {
            if d.get_str("mode") == Some("fail-update") {
                return Err(ProviderError::api("Throttling", "slow down"));
            }
            Ok(())
        }

        async fn delete(&self, d: &mut ResourceData, _: &ProviderMeta) -> Result<(), ProviderError> {
            match d.id() {
                "gone" => Err(ProviderError::api("ResourceNotFoundException", "no such thing")),
                "gone-cache" => Err(cache_missing()),
                _ => Ok(()),
            }
        }
    }

    fn cache_missing() -> ProviderError {
        ProviderError::api("InvalidParameterValue", "Cache cluster c-1 does not exist")
    }

    fn provider() -> Provider {
        let schema = Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("mode", Attribute::optional_string());
        Provider::new()
            .with_resource(
                Resource::new("aws_scripted", schema, Scripted)
                    .with_timeouts(Timeouts::new().with_create(Duration::from_secs(60))),
            )
            .unwrap()
    }

    async fn configured() -> Provider {
        let provider = provider();
        let diagnostics = provider.configure(json!({"region": "us-east-1"})).await.unwrap();
        assert!(diagnostics.is_empty());
        provider
    }

    #[tokio::test]
    async fn test_unknown_resource_and_unconfigured() {
        let provider = provider();
        let err = provider.read("aws_nope", json!({"id": "x"})).await.unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));

        let err = provider.read("aws_scripted", json!({"id": "x"})).await.unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_configure_once() {
        let provider = configured().await;
        assert_eq!(provider.meta().unwrap().region(), "us-east-1");
        let err = provider.configure(json!({"region": "us-west-2"})).await.unwrap_err();
        assert!(err.to_string().contains("already configured"));
    }

    #[tokio::test]
    async fn test_configure_reports_diagnostics() {
        let provider = provider();
        let diagnostics = provider.configure(json!({"region": 3})).await.unwrap();
        assert!(has_errors(&diagnostics));
        assert!(provider.meta().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let schema = Schema::v0().with_attribute("id", Attribute::computed_string());
        let err = provider()
            .with_resource(Resource::new("aws_scripted", schema, Scripted))
            .err()
            .unwrap();
        assert!(err.to_string().contains("registered twice"));
    }

    #[tokio::test]
    async fn test_panic_is_recovered() {
        let provider = configured().await;
        let err = provider
            .create("aws_scripted", json!({"mode": "panic"}))
            .await
            .unwrap_err();
        assert!(matches!(err.root(), ProviderError::Panic(msg) if msg == "boom in create"));
        assert!(err.to_string().starts_with("create aws_scripted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_timeout() {
        let provider = configured().await;
        let err = provider
            .create("aws_scripted", json!({"mode": "hang", "timeouts": {"create": "5s"}}))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_oversized_timeout_is_rejected() {
        let provider = configured().await;
        let config = json!({"mode": "ok", "timeouts": {"create": "99999999999999999999h"}});

        let err = provider.plan("aws_scripted", None, config.clone()).await.unwrap_err();
        match err.root() {
            ProviderError::Diagnostics(diagnostics) => {
                assert_eq!(diagnostics[0].attribute.as_deref(), Some(TIMEOUTS_KEY));
                assert!(diagnostics[0].summary.contains("invalid duration"));
            }
            other => panic!("expected diagnostics, got {:?}", other),
        }

        let err = provider.create("aws_scripted", config).await.unwrap_err();
        assert!(matches!(err.root(), ProviderError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_in_flight_operations() {
        let provider = Arc::new(configured().await);
        let running = provider.clone();
        let handle = tokio::spawn(async move {
            running.create("aws_scripted", json!({"mode": "hang"})).await
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        provider.stop().await.unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_create_requires_id() {
        let provider = configured().await;
        let err = provider
            .create("aws_scripted", json!({"mode": "no-id"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("without setting an id"));
    }

    #[tokio::test]
    async fn test_failed_create_with_id_keeps_state() {
        let provider = configured().await;
        let err = provider
            .create("aws_scripted", json!({"mode": "half"}))
            .await
            .unwrap_err();
        match err {
            ProviderError::PartialUpdate { state, source } => {
                assert_eq!(state["id"], "half-1");
                assert_eq!(source.api_error().unwrap().code, "InvalidParameterValue");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_read_gone_returns_none() {
        let provider = configured().await;
        assert!(provider
            .read("aws_scripted", json!({"id": "obj-1", "mode": "vanish"}))
            .await
            .unwrap()
            .is_none());
        assert!(provider.read("aws_scripted", json!(null)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_failure_returns_partial_state() {
        let provider = configured().await;
        let err = provider
            .update(
                "aws_scripted",
                json!({"id": "obj-1", "mode": "old"}),
                json!({"id": "obj-1", "mode": "fail-update"}),
            )
            .await
            .unwrap_err();
        match err {
            ProviderError::PartialUpdate { state, source } => {
                assert_eq!(state, json!({"id": "obj-1", "mode": "old"}));
                assert!(source.to_string().starts_with("update aws_scripted (obj-1)"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_delete_not_found_is_success() {
        let provider = configured().await;
        provider
            .delete("aws_scripted", json!({"id": "gone"}))
            .await
            .unwrap();
        provider.delete("aws_scripted", json!(null)).await.unwrap();
    }

    #[tokio::test]
    async fn test_service_table_decides_not_found() {
        let schema = Schema::v0().with_attribute("mode", Attribute::optional_string());
        let provider = Provider::new()
            .with_resource(Resource::new("aws_generic", schema.clone(), Scripted))
            .unwrap()
            .with_resource(Resource::new("aws_cache", schema, Scripted).with_service("elasticache"))
            .unwrap();
        provider.configure(json!({"region": "us-east-1"})).await.unwrap();

        let state = json!({"id": "c-1", "mode": "cache-missing"});
        assert!(provider.read("aws_cache", state.clone()).await.unwrap().is_none());
        let err = provider.read("aws_generic", state).await.unwrap_err();
        assert_eq!(err.api_error().unwrap().code, "InvalidParameterValue");

        provider
            .delete("aws_cache", json!({"id": "gone-cache"}))
            .await
            .unwrap();
        assert!(provider
            .delete("aws_generic", json!({"id": "gone-cache"}))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_import_requires_importer() {
        let provider = configured().await;
        let err = provider
            .import_resource("aws_scripted", "obj-1")
            .await
            .unwrap_err();
        assert!(matches!(err.root(), ProviderError::Import(_)));
        assert!(provider.metadata().importable.is_empty());
    }

    #[tokio::test]
    async fn test_import_of_missing_object() {
        let schema = Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("mode", Attribute::optional_string());
        let provider = Provider::new()
            .with_resource(
                Resource::new("aws_scripted", schema, Scripted).with_importer(Importer::custom(
                    |id, d, _| {
                        d.set_id(id);
                        d.set("mode", "vanish")
                    },
                )),
            )
            .unwrap();
        provider.configure(json!({"region": "us-east-1"})).await.unwrap();
        assert_eq!(provider.metadata().importable, vec!["aws_scripted".to_string()]);

        let err = provider
            .import_resource("aws_scripted", "obj-9")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot import non-existent remote object (obj-9)"));
    }

    #[test]
    fn test_schema_lists_resources() {
        let schema = provider().schema();
        assert!(schema.resources.contains_key("aws_scripted"));
        assert!(schema.provider.block.contains("region"));
    }
}
