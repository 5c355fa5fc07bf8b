//! Serializing mutations through API-issued change tokens.
//!
//! Some services (WAF Classic, for one) require every mutation to carry a
//! token fetched just before the call. A concurrent mutation invalidates the
//! token and the call fails with a stale-data error; the remedy is to fetch
//! a new token and try again.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::classify;
use crate::error::ProviderError;
use crate::retry::{retry, RetryError};

/// Runs token-guarded operations until they land or the deadline passes.
#[derive(Debug, Clone)]
pub struct ChangeTokenRetryer {
    timeout: Duration,
    cancel: CancellationToken,
}

impl ChangeTokenRetryer {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    /// Fetch a fresh token with `fetch_token`, then call `op` with it.
    ///
    /// A stale-token error restarts from the fetch. Tokens are never reused
    /// between attempts.
    pub async fn run<T, Tok, FT, FTFut, Op, OpFut>(
        &self,
        fetch_token: FT,
        op: Op,
    ) -> Result<T, ProviderError>
    where
        FT: Fn() -> FTFut,
        FTFut: Future<Output = Result<Tok, ProviderError>>,
        Op: Fn(Tok) -> OpFut,
        OpFut: Future<Output = Result<T, ProviderError>>,
    {
        let fetch_token = &fetch_token;
        let op = &op;
        retry(self.timeout, &self.cancel, move || async move {
            let token = fetch_token().await?;
            op(token).await.map_err(|err| match err.api_error() {
                Some(api) if classify::is_stale_token(api) => {
                    debug!(code = %api.code, "change token is stale, fetching a new one");
                    RetryError::Retryable(err)
                }
                _ => RetryError::NonRetryable(err),
            })
        })
        .await
    }
}
