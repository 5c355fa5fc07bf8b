//! Hemmer AWS Core
//!
//! The reconciliation engine shared by every resource of the Hemmer AWS
//! provider. Resources describe themselves with a [`Schema`] and a
//! [`ResourceHandler`]; this crate does the rest of the lifecycle: diffing
//! configuration against prior state, running callbacks under timeouts and
//! cancellation, waiting out eventual consistency, classifying API errors,
//! and reconciling tags against provider defaults.
//!
//! # Overview
//!
//! - **Values & schemas**: [`Value`] carries state, including the unknown
//!   sentinel; [`Schema`] declares attributes, nested blocks and their flags
//! - **Diff**: [`diff::diff`] plans a resource, honoring force-new, defaults,
//!   diff suppression and customize-diff hooks
//! - **ResourceData**: the view a callback gets of prior, planned and new state
//! - **Provider**: the [`ProviderService`] implementation the host drives
//! - **Waiters & retries**: [`StateChangeConf`], [`retry`] and friends
//! - **Tags**: default and ignore configuration, `tags`/`tags_all`
//! - **Errors**: [`ProviderError`] and API error classification
//! - **Logging**: `tracing` to stderr, with sensitive values redacted
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_aws_core::{
//!     async_trait, Importer, Provider, ProviderError, ProviderMeta, Resource,
//!     ResourceData, ResourceHandler,
//!     schema::{Attribute, Schema},
//! };
//!
//! struct Queue;
//!
//! #[async_trait]
//! impl ResourceHandler for Queue {
//!     async fn create(&self, d: &mut ResourceData, meta: &ProviderMeta) -> Result<(), ProviderError> {
//!         let sqs = meta.clients::<Clients>()?;
//!         let url = sqs.create_queue(d.get_str("name").unwrap_or_default()).await?;
//!         d.set_id(url);
//!         Ok(())
//!     }
//!
//!     async fn read(&self, d: &mut ResourceData, meta: &ProviderMeta) -> Result<(), ProviderError> {
//!         match meta.clients::<Clients>()?.get_queue(d.id()).await {
//!             Ok(queue) => d.set("name", queue.name),
//!             Err(e) => hemmer_aws_core::drift::read_not_found(d, e),
//!         }
//!     }
//!
//!     async fn delete(&self, d: &mut ResourceData, meta: &ProviderMeta) -> Result<(), ProviderError> {
//!         meta.clients::<Clients>()?.delete_queue(d.id()).await
//!     }
//! }
//!
//! let provider = Provider::new()
//!     .with_client_factory(|config| Ok(Arc::new(Clients::new(config.region()?))))
//!     .with_resource(
//!         Resource::new(
//!             "aws_sqs_queue",
//!             Schema::v0().with_attribute("name", Attribute::required_string().with_force_new()),
//!             Queue,
//!         )
//!         .with_importer(Importer::PassThrough)
//!         .with_tags(),
//!     )?;
//! ```
//!
//! # Lifecycle
//!
//! The host calls, through [`ProviderService`]:
//!
//! - **Configure**: once per invocation; builds the shared [`ProviderMeta`]
//! - **ValidateResourceConfig**: schema validation of a configuration
//! - **Plan**: computes the planned state and attribute changes
//! - **Create/Read/Update/Delete**: run the resource's callbacks
//! - **ImportResource**: adopts existing infrastructure by id
//! - **Stop**: cancels every in-flight operation

#![warn(clippy::all)]

pub mod arn;
pub mod change_token;
pub mod cidr;
pub mod classify;
pub mod diff;
pub mod drift;
pub mod error;
pub mod hashing;
pub mod importer;
pub mod logging;
pub mod meta;
pub mod provider;
pub mod resource;
pub mod resource_data;
pub mod retry;
pub mod schema;
pub mod service;
pub mod tags;
pub mod testing;
pub mod timeouts;
pub mod types;
pub mod validation;
pub mod validators;
pub mod value;
pub mod waiter;

// Re-export main types at crate root
pub use classify::{ApiError, ErrorClass, Phase};
pub use diff::{CustomizeDiff, ResourceDiff};
pub use error::ProviderError;
pub use importer::Importer;
pub use logging::{init_logging, init_logging_with_default, redact_sensitive, try_init_logging};
pub use meta::{ProviderConfig, ProviderMeta};
pub use provider::Provider;
pub use resource::{Resource, ResourceHandler};
pub use resource_data::ResourceData;
pub use retry::{retry, RetryError};
pub use schema::{ProviderSchema, Schema};
pub use service::ProviderService;
pub use tags::{DefaultConfig, IgnoreConfig, KeyValueTags, TagUpdater};
pub use timeouts::Timeouts;
pub use types::{AttributeChange, ImportedResource, Operation, PlanResult, ProviderMetadata};
pub use validation::{is_valid, validate, validate_result};
pub use value::{Value, UNKNOWN_VALUE};
pub use waiter::StateChangeConf;

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tokio_util::sync::CancellationToken;
pub use tracing;
