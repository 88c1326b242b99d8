//! Connection scope: acquire, run, always release.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{DataError, Result};
use crate::source::DataSource;

/// Acquire a handle from `source`, run `operation` on it and release it on
/// every exit path.
///
/// The handle only exists for the duration of `operation`; it is moved into
/// [`DataSource::release`] once the operation's future has finished, so it can
/// never be used after release. A release failure is logged and does not
/// replace the operation's result.
///
/// Acquisition races `cancel`; if the token fires first nothing is acquired
/// and [`DataError::Cancelled`] is returned.
pub async fn with_connection<S, T>(
    source: &S,
    cancel: &CancellationToken,
    operation: impl AsyncFnOnce(&mut S::Handle) -> Result<T>,
) -> Result<T>
where
    S: DataSource + ?Sized,
{
    let mut handle = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DataError::Cancelled),
        acquired = source.acquire() => acquired?,
    };
    debug!("connection acquired");

    let outcome = operation(&mut handle).await;

    match source.release(handle).await {
        Ok(()) => debug!("connection released"),
        Err(err) => warn!(error = %err, "failed to release connection"),
    }

    outcome
}
