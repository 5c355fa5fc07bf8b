//! Resource definitions: a schema plus the callbacks that manage it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::classify::ServiceErrors;
use crate::diff::{CustomizeDiff, ResourceDiff};
use crate::error::ProviderError;
use crate::importer::Importer;
use crate::meta::ProviderMeta;
use crate::resource_data::ResourceData;
use crate::schema::Schema;
use crate::tags::{self, TAGS_ALL_KEY, TAGS_KEY};
use crate::timeouts::Timeouts;

/// The lifecycle callbacks of one resource type.
///
/// Callbacks read the desired configuration from the [`ResourceData`] and
/// record what the API reports back with [`ResourceData::set`]. Clearing
/// the id (`d.set_id("")`) tells the dispatcher the object is gone.
///
/// # Example
///
/// ```ignore
/// use hemmer_aws_core::{async_trait, ProviderError, ProviderMeta, ResourceData, ResourceHandler};
///
/// struct Queue;
///
/// #[async_trait]
/// impl ResourceHandler for Queue {
///     async fn create(&self, d: &mut ResourceData, meta: &ProviderMeta) -> Result<(), ProviderError> {
///         let clients = meta.clients::<Clients>()?;
///         let url = clients.sqs.create_queue(d.get_str("name").unwrap_or_default()).await?;
///         d.set_id(url);
///         Ok(())
///     }
///
///     async fn read(&self, d: &mut ResourceData, meta: &ProviderMeta) -> Result<(), ProviderError> {
///         let clients = meta.clients::<Clients>()?;
///         match clients.sqs.get_queue_attributes(d.id()).await {
///             Ok(attrs) => d.set("arn", attrs.arn),
///             Err(err) => read_not_found(d, err),
///         }
///     }
///
///     async fn delete(&self, d: &mut ResourceData, meta: &ProviderMeta) -> Result<(), ProviderError> {
///         meta.clients::<Clients>()?.sqs.delete_queue(d.id()).await
///     }
/// }
/// ```
#[async_trait]
pub trait ResourceHandler: Send + Sync + 'static {
    /// Create the object and set its id.
    async fn create(&self, d: &mut ResourceData, meta: &ProviderMeta) -> Result<(), ProviderError>;

    /// Refresh observed state. Clear the id when the object no longer exists.
    async fn read(&self, d: &mut ResourceData, meta: &ProviderMeta) -> Result<(), ProviderError>;

    /// Apply in-place changes.
    ///
    /// Resources whose every argument forces replacement keep the default.
    async fn update(&self, d: &mut ResourceData, meta: &ProviderMeta) -> Result<(), ProviderError> {
        let _ = meta;
        Err(ProviderError::Unimplemented(format!(
            "{} does not support in-place updates",
            d.resource_type()
        )))
    }

    /// Delete the object.
    async fn delete(&self, d: &mut ResourceData, meta: &ProviderMeta) -> Result<(), ProviderError>;
}

/// A resource type as registered with the [`Provider`](crate::Provider).
#[derive(Clone)]
pub struct Resource {
    name: String,
    schema: Arc<Schema>,
    handler: Arc<dyn ResourceHandler>,
    importer: Importer,
    customize_diff: Vec<CustomizeDiff>,
    timeouts: Timeouts,
    service: &'static ServiceErrors,
}

impl Resource {
    pub fn new(name: impl Into<String>, schema: Schema, handler: impl ResourceHandler) -> Self {
        Self {
            name: name.into(),
            schema: Arc::new(schema),
            handler: Arc::new(handler),
            importer: Importer::None,
            customize_diff: Vec::new(),
            timeouts: Timeouts::default(),
            service: ServiceErrors::generic(),
        }
    }

    pub fn with_importer(mut self, importer: Importer) -> Self {
        self.importer = importer;
        self
    }

    /// Append a hook to the customize-diff pipeline. Hooks run in order.
    pub fn with_customize_diff(
        mut self,
        hook: impl Fn(&mut ResourceDiff<'_>, &ProviderMeta) -> Result<(), ProviderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.customize_diff.push(CustomizeDiff::new(hook));
        self
    }

    /// Baked-in timeouts; users may override them per resource.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Name the service (`"sqs"`, `"route53"`, ...) whose error table
    /// decides what counts as "not found" for this resource.
    pub fn with_service(mut self, service: &str) -> Self {
        self.service = ServiceErrors::for_service(service);
        self
    }

    /// Add `tags` and `tags_all` to the schema and plan them against the
    /// provider's default and ignored tags.
    pub fn with_tags(mut self) -> Self {
        let schema = Arc::make_mut(&mut self.schema);
        schema
            .block
            .attributes
            .insert(TAGS_KEY.to_string(), tags::tags_schema());
        schema
            .block
            .attributes
            .insert(TAGS_ALL_KEY.to_string(), tags::tags_all_schema());
        self.with_customize_diff(tags::tags_customize_diff)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn handler(&self) -> &dyn ResourceHandler {
        self.handler.as_ref()
    }

    pub fn importer(&self) -> &Importer {
        &self.importer
    }

    pub fn customize_diff(&self) -> &[CustomizeDiff] {
        &self.customize_diff
    }

    pub fn timeouts(&self) -> &Timeouts {
        &self.timeouts
    }

    pub fn service_errors(&self) -> &'static ServiceErrors {
        self.service
    }

    /// Check the definition is usable.
    pub fn internal_validate(&self) -> Result<(), ProviderError> {
        if self.name.is_empty() {
            return Err(ProviderError::Sdk("resource name must not be empty".to_string()));
        }
        self.schema
            .internal_validate()
            .map_err(|e| ProviderError::Sdk(format!("{}: {}", self.name, e.message())))
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("importer", &self.importer)
            .field("customize_diff", &self.customize_diff.len())
            .field("timeouts", &self.timeouts)
            .field("service", &self.service.service)
            .finish_non_exhaustive()
    }
}
