use std::future::Future;
use std::time::Duration;

/// Awaits `fut`, giving up after `limit` when one is configured.
///
/// Returns `None` when the limit elapsed first; the future is dropped in that case.
pub(crate) async fn bounded<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}
