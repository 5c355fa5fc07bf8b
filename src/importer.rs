//! Turning an import identifier into the minimum state Read needs.

use std::fmt;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::meta::ProviderMeta;
use crate::resource_data::ResourceData;
use crate::schema::{AttributeType, SchemaEntry};
use crate::value::Value;

/// Signature of a hand-written importer.
pub type ImportFn =
    Arc<dyn Fn(&str, &mut ResourceData, &ProviderMeta) -> Result<(), ProviderError> + Send + Sync>;

/// How a resource is imported.
#[derive(Clone, Default)]
pub enum Importer {
    /// The resource cannot be imported.
    #[default]
    None,
    /// The import id is the resource id.
    PassThrough,
    /// The import id joins several attributes with `separator`.
    ///
    /// Each part is written to the attribute named at the same position in
    /// `fields`, and the whole string becomes the resource id.
    Composite {
        separator: String,
        fields: Vec<String>,
    },
    /// Anything else.
    Custom(ImportFn),
}

impl Importer {
    pub fn composite(separator: impl Into<String>, fields: &[&str]) -> Self {
        Self::Composite {
            separator: separator.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    pub fn custom(
        f: impl Fn(&str, &mut ResourceData, &ProviderMeta) -> Result<(), ProviderError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self::Custom(Arc::new(f))
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Populate `d` from `id`.
    pub fn import(
        &self,
        id: &str,
        d: &mut ResourceData,
        meta: &ProviderMeta,
    ) -> Result<(), ProviderError> {
        if id.is_empty() {
            return Err(ProviderError::Import("import id must not be empty".to_string()));
        }
        match self {
            Self::None => Err(ProviderError::Import(format!(
                "{} does not support import",
                d.resource_type()
            ))),
            Self::PassThrough => {
                d.set_id(id);
                Ok(())
            }
            Self::Composite { separator, fields } => {
                let parts = parse_composite_id(id, separator, fields)?;
                for (field, part) in fields.iter().zip(parts) {
                    let value = typed_part(d, field, part)?;
                    d.set(field, value)?;
                }
                d.set_id(id);
                Ok(())
            }
            Self::Custom(f) => f(id, d, meta),
        }
    }
}

impl fmt::Debug for Importer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::PassThrough => f.write_str("PassThrough"),
            Self::Composite { separator, fields } => f
                .debug_struct("Composite")
                .field("separator", separator)
                .field("fields", fields)
                .finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Split `id` into exactly `fields.len()` non-empty parts.
pub fn parse_composite_id(
    id: &str,
    separator: &str,
    fields: &[String],
) -> Result<Vec<String>, ProviderError> {
    let parts: Vec<&str> = id.split(separator).collect();
    if parts.len() != fields.len() || parts.iter().any(|p| p.is_empty()) {
        return Err(ProviderError::Import(format!(
            "unexpected format for ID ({}), expected {}",
            id,
            fields.join(separator)
        )));
    }
    Ok(parts.into_iter().map(String::from).collect())
}

/// Join id parts with `separator`.
pub fn composite_id<S: AsRef<str>>(separator: &str, parts: &[S]) -> String {
    parts
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(separator)
}

fn typed_part(d: &ResourceData, field: &str, part: String) -> Result<Value, ProviderError> {
    let attr_type = match d.schema().get(field) {
        Some(SchemaEntry::Attribute(attr)) => &attr.attr_type,
        _ => return Ok(Value::String(part)),
    };
    match attr_type {
        AttributeType::Int64 => part.parse::<i64>().map(Value::Int).map_err(|_| {
            ProviderError::Import(format!("{} must be an integer, got {:?}", field, part))
        }),
        AttributeType::Bool => part.parse::<bool>().map(Value::Bool).map_err(|_| {
            ProviderError::Import(format!("{} must be true or false, got {:?}", field, part))
        }),
        _ => Ok(Value::String(part)),
    }
}
