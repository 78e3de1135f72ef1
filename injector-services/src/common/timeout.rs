//! Thin timeout helper used by the dialer for connect/TLS-handshake bounds.

use std::future::Future;
use std::time::Duration;

use monoio::time::timeout;

#[derive(thiserror::Error, Debug)]
pub enum TimeoutError<E> {
    #[error("inner error: {0:?}")]
    Inner(E),
    #[error("timed out")]
    Timeout,
}

pub async fn with_timeout<T, E>(
    duration: Duration,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, TimeoutError<E>> {
    match timeout(duration, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TimeoutError::Inner(err)),
        Err(_) => Err(TimeoutError::Timeout),
    }
}
