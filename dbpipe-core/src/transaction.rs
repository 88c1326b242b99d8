//! Transaction demarcation on an acquired handle.

use tracing::{debug, error, warn};

use crate::error::{DataError, Result};
use crate::source::DataSource;

/// Run `operation` as one unit of work on `handle`.
///
/// Commits when the operation succeeds and returns its value. When it fails
/// the transaction is rolled back and the same failure is returned; if the
/// rollback fails as well the result is [`DataError::RollbackFailed`] with the
/// operation's failure as its cause. A failed commit is rolled back the same
/// way.
///
/// Must be called inside a connection scope, e.g.
/// [`with_connection`](crate::scope::with_connection).
pub async fn with_transaction<S, T>(
    source: &S,
    handle: &mut S::Handle,
    operation: impl AsyncFnOnce(&mut S::Handle) -> Result<T>,
) -> Result<T>
where
    S: DataSource + ?Sized,
{
    source.begin(handle).await?;

    let failure = match operation(&mut *handle).await {
        Ok(value) => match source.commit(handle).await {
            Ok(()) => {
                debug!("transaction committed");
                return Ok(value);
            }
            Err(commit_err) => commit_err,
        },
        Err(err) => err,
    };

    match source.rollback(handle).await {
        Ok(()) => {
            warn!(error = %failure, "transaction rolled back");
            Err(failure)
        }
        Err(rollback_err) => {
            error!(error = %failure, rollback_error = %rollback_err, "rollback failed");
            Err(DataError::rollback_failed(failure, rollback_err))
        }
    }
}
