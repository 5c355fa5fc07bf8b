//! Handling resources deleted outside of the orchestrator.

use tracing::warn;

use crate::error::ProviderError;
use crate::resource_data::ResourceData;

/// Apply the not-found rule to an error returned by a read.
///
/// A resource that existed before and is now missing was deleted out of
/// band: its id is cleared and the read succeeds, so the host plans a
/// create. A resource that was created moments ago and is already missing
/// is an error. Every other error is returned as is.
///
/// "Not found" is judged by the service table the resource was registered
/// with, on top of the generic codes.
pub fn read_not_found(d: &mut ResourceData, err: ProviderError) -> Result<(), ProviderError> {
    if !err.is_not_found_for(d.service_errors()) {
        return Err(err);
    }
    if d.is_new_resource() {
        return Err(ProviderError::NotFound(format!(
            "{} {} was created but could not be read back: {}",
            d.resource_type(),
            d.id(),
            err.message()
        )));
    }
    warn!(
        resource_type = %d.resource_type(),
        id = %d.id(),
        "resource not found, removing from state"
    );
    d.set_id("");
    Ok(())
}

/// Turns an empty lookup result into a not-found error.
pub trait NotFoundExt<T> {
    /// `Some(v)` becomes `Ok(v)`; `None` becomes a not-found error
    /// describing `what`.
    fn or_not_found(self, what: impl Into<String>) -> Result<T, ProviderError>;
}

impl<T> NotFoundExt<T> for Option<T> {
    fn or_not_found(self, what: impl Into<String>) -> Result<T, ProviderError> {
        self.ok_or_else(|| ProviderError::NotFound(what.into()))
    }
}
