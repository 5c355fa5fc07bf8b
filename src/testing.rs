//! Testing utilities for providers built on this crate.
//!
//! [`ProviderTester`] drives any [`ProviderService`] the way the host would,
//! without a host. [`FakeCloud`] is an in-memory object store with tag
//! endpoints and scripted eventual consistency, enough to exercise resource
//! handlers end to end.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_aws_core::testing::{assert_plan_no_changes, ProviderTester};
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_queue_round_trip() {
//!     let tester = ProviderTester::new(provider());
//!     tester.configure(json!({"region": "us-east-1"})).await.unwrap();
//!
//!     let config = json!({"name": "jobs"});
//!     let state = tester.lifecycle_create("aws_sqs_queue", config.clone()).await.unwrap();
//!     let plan = tester.plan_update("aws_sqs_queue", state, config).await.unwrap();
//!     assert_plan_no_changes(&plan);
//! }
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::service::ProviderService;
use crate::tags::{KeyValueTags, TagUpdater};
use crate::types::{ImportedResource, PlanResult};

/// A test harness for provider implementations.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    ///
    /// Returns `Err` with the error diagnostics if there are any.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    ///
    /// Returns `Err` with the error diagnostics if there are any.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider.plan(resource_type, None, config).await
    }

    /// Plan against existing state.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), config)
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null)
            .await
    }

    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read a resource. `None` means it no longer exists.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run a full create lifecycle: plan → create → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read_existing(resource_type, created).await
    }

    /// Run a full update lifecycle: plan → update → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), config)
            .await?;
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.read_existing(resource_type, updated).await
    }

    /// Run a full delete lifecycle: plan → delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.plan_delete(resource_type, current_state.clone()).await?;
        self.delete(resource_type, current_state).await
    }

    /// Run create → update → delete.
    ///
    /// Returns the state after the update (before delete).
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created = self.lifecycle_create(resource_type, initial_config).await?;
        let updated = self
            .lifecycle_update(resource_type, created, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated.clone()).await?;
        Ok(updated)
    }

    /// Create from `config`, then check that planning the same `config`
    /// against the resulting state changes nothing.
    ///
    /// Returns the created state.
    ///
    /// # Panics
    ///
    /// Panics if the second plan has changes.
    pub async fn assert_round_trip(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let state = self.lifecycle_create(resource_type, config.clone()).await?;
        let plan = self
            .plan_update(resource_type, state.clone(), config)
            .await?;
        assert_plan_no_changes(&plan);
        assert_plan_updates_in_place(&plan);
        Ok(state)
    }

    async fn read_existing(&self, resource_type: &str, state: Value) -> Result<Value, ProviderError> {
        self.read(resource_type, state).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("{} vanished after apply", resource_type))
        })
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            }
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics
        .into_iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan creates a new object.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(
        !plan.requires_replace,
        "Expected plan to create, not replace"
    );
}

/// Assert that a plan result indicates no changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes
            .iter()
            .map(|c| format!("{}: {:?} -> {:?}", c.path, c.before, c.after))
            .collect::<Vec<_>>()
    );
}

pub fn assert_plan_has_changes(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes, but got no changes"
    );
}

/// Assert that a plan requires resource replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan destroys the object.
pub fn assert_plan_destroys(plan: &PlanResult) {
    assert!(
        plan.planned_state.is_null(),
        "Expected plan to destroy, but planned state is {}",
        plan.planned_state
    );
}

/// Assert that a plan has a change for a specific attribute path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        !has_change,
        "Expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Assert that diagnostics contain no errors.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    let has_errors = diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error));

    assert!(has_errors, "Expected at least one error, but got none");
}

/// Assert that diagnostics contain an error with the given summary substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error) && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

// =========================================================================
// Fake Cloud
// =========================================================================

/// An object stored in a [`FakeCloud`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FakeObject {
    pub id: String,
    pub attributes: serde_json::Map<String, Value>,
    pub tags: KeyValueTags,
    pub status: String,
    invisible_reads: u32,
    statuses: VecDeque<String>,
}

/// A tag endpoint call recorded by a [`FakeCloud`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagCall {
    Tag(String, KeyValueTags),
    Untag(String, Vec<String>),
}

/// An in-memory cloud API.
///
/// Lookups of missing objects fail with `ResourceNotFoundException`, like
/// most AWS services. New objects can be made to settle slowly: invisible
/// for a number of reads, then walking through a list of statuses.
#[derive(Debug, Default)]
pub struct FakeCloud {
    objects: Mutex<BTreeMap<String, FakeObject>>,
    tag_calls: Mutex<Vec<TagCall>>,
    next_id: AtomicU64,
    invisible_reads: u32,
    statuses: Vec<String>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// New objects stay invisible for `invisible_reads` lookups, then report
    /// `statuses` one per lookup, repeating the last one.
    pub fn with_settling(mut self, invisible_reads: u32, statuses: &[&str]) -> Self {
        self.invisible_reads = invisible_reads;
        self.statuses = statuses.iter().map(|s| s.to_string()).collect();
        self
    }

    fn not_found(id: &str) -> ProviderError {
        ProviderError::api("ResourceNotFoundException", format!("{} does not exist", id))
    }

    /// Store a new object and return its id.
    pub async fn create(
        &self,
        prefix: &str,
        attributes: serde_json::Map<String, Value>,
        tags: KeyValueTags,
    ) -> String {
        let id = format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let statuses: VecDeque<String> = self.statuses.iter().cloned().collect();
        let object = FakeObject {
            id: id.clone(),
            attributes,
            tags,
            status: statuses.front().cloned().unwrap_or_else(|| "available".to_string()),
            invisible_reads: self.invisible_reads,
            statuses,
        };
        self.objects.lock().await.insert(id.clone(), object);
        id
    }

    /// Look an object up, advancing its settling script.
    pub async fn describe(&self, id: &str) -> Result<FakeObject, ProviderError> {
        let mut objects = self.objects.lock().await;
        let object = objects.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        if object.invisible_reads > 0 {
            object.invisible_reads -= 1;
            return Err(Self::not_found(id));
        }
        if let Some(status) = object.statuses.pop_front() {
            object.status = status;
        }
        if object.statuses.is_empty() {
            object.statuses.push_back(object.status.clone());
        }
        Ok(object.clone())
    }

    /// Merge `attributes` into an object.
    pub async fn update(
        &self,
        id: &str,
        attributes: serde_json::Map<String, Value>,
    ) -> Result<(), ProviderError> {
        let mut objects = self.objects.lock().await;
        let object = objects.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        object.attributes.extend(attributes);
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<(), ProviderError> {
        self.objects
            .lock()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(id))
    }

    /// Replace an object's tags without going through the tag endpoints.
    pub async fn replace_tags(&self, id: &str, tags: KeyValueTags) -> Result<(), ProviderError> {
        let mut objects = self.objects.lock().await;
        let object = objects.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        object.tags = tags;
        Ok(())
    }

    pub async fn tags(&self, id: &str) -> Result<KeyValueTags, ProviderError> {
        let objects = self.objects.lock().await;
        objects
            .get(id)
            .map(|o| o.tags.clone())
            .ok_or_else(|| Self::not_found(id))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.objects.lock().await.contains_key(id)
    }

    /// Tag endpoint calls so far, oldest first.
    pub async fn tag_calls(&self) -> Vec<TagCall> {
        self.tag_calls.lock().await.clone()
    }
}

#[async_trait]
impl TagUpdater for FakeCloud {
    async fn untag_resource(&self, identifier: &str, keys: &[String]) -> Result<(), ProviderError> {
        let mut objects = self.objects.lock().await;
        let object = objects
            .get_mut(identifier)
            .ok_or_else(|| Self::not_found(identifier))?;
        object.tags = object
            .tags
            .iter()
            .filter(|(k, _)| !keys.contains(*k))
            .collect();
        self.tag_calls
            .lock()
            .await
            .push(TagCall::Untag(identifier.to_string(), keys.to_vec()));
        Ok(())
    }

    async fn tag_resource(&self, identifier: &str, tags: &KeyValueTags) -> Result<(), ProviderError> {
        let mut objects = self.objects.lock().await;
        let object = objects
            .get_mut(identifier)
            .ok_or_else(|| Self::not_found(identifier))?;
        object.tags = object.tags.merge(tags);
        self.tag_calls
            .lock()
            .await
            .push(TagCall::Tag(identifier.to_string(), tags.clone()));
        Ok(())
    }
}
