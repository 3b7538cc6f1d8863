//! Shutdown-aware wrappers for pipeline calls

use std::future::Future;
use tokio::sync::watch;

use crate::error::{ReminderError, ReminderResult};

/// Resolves once shutdown has been requested. Never resolves if the sender is gone.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Run `fut` unless shutdown is requested first, in which case it is dropped
/// mid-flight and [`ReminderError::Cancelled`] is returned.
pub async fn cancellable<T, F>(shutdown: &watch::Receiver<bool>, fut: F) -> ReminderResult<T>
where
    F: Future<Output = ReminderResult<T>>,
{
    let mut shutdown = shutdown.clone();
    if *shutdown.borrow_and_update() {
        return Err(ReminderError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = shutdown_requested(&mut shutdown) => Err(ReminderError::Cancelled),
        result = fut => result,
    }
}
