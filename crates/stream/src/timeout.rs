use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Operation, QueueError};

/// Run `work` with a token that is cancelled once `timeout` elapses.
///
/// A zero timeout cancels the token before `work` starts, so operations that
/// check the token at entry fail as cancelled without touching the
/// transport. Expiry returns [`QueueError::Cancelled`] without waiting for
/// `work` to notice.
pub(crate) async fn with_deadline<T, F, Fut>(
    timeout: Duration,
    operation: Operation,
    channel: &str,
    work: F,
) -> Result<T, QueueError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, QueueError>>,
{
    let ct = CancellationToken::new();
    if timeout.is_zero() {
        ct.cancel();
    }
    let work = work(ct.clone());

    tokio::select! {
        biased;
        result = work => result,
        () = tokio::time::sleep(timeout) => {
            ct.cancel();
            Err(QueueError::Cancelled {
                operation,
                channel: channel.to_owned(),
            })
        }
    }
}
