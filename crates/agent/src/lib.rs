pub mod connect;
pub mod context;
pub mod curation;
pub mod engine;
pub mod fine_tune;
pub mod pipeline;
pub mod service;

use mimic_core::error::{MimicError, Result};
use std::future::Future;
use std::time::Duration;

/// Runs an external call under a hard deadline. Elapsed deadlines are upstream failures.
pub(crate) async fn bounded<T, F>(what: &str, limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(MimicError::Upstream(format!(
            "{} timed out after {}s",
            what,
            limit.as_secs()
        ))),
    }
}
