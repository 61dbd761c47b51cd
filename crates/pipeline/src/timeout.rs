use std::future::Future;
use std::time::Duration;

/// Run `call` under `limit`, mapping an elapsed deadline through `on_timeout`.
pub(crate) async fn bounded<T, E>(
    limit: Duration,
    call: impl Future<Output = Result<T, E>>,
    on_timeout: impl FnOnce(Duration) -> E,
) -> Result<T, E> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(limit)),
    }
}
