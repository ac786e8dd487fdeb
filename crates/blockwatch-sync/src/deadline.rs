//! Read deadline for feed subscriptions.
//!
//! [`FeedSubscription::recv`] has no timeout. Each call here spawns the receive
//! as its own task that reports into a oneshot slot, and races that slot
//! against a timer. Whichever finishes first wins; a receive that loses is left
//! running and its result is dropped when it eventually completes (or when the
//! subscription is closed, which ends it).

use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::{FeedSubscription, SyncError, SyncResult};

pub async fn recv_with_deadline(
    subscription: Arc<dyn FeedSubscription>,
    timeout: Duration,
) -> SyncResult<Option<Vec<u8>>> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let result = subscription.recv().await;
        if tx.send(result).is_err() {
            debug!("Discarding feed message received after read deadline");
        }
    });

    tokio::select! {
        result = rx => match result {
            Ok(result) => result,
            Err(_) => Err(SyncError::Transport("receive task ended without a result".to_string())),
        },
        _ = tokio::time::sleep(timeout) => Err(SyncError::ReadTimeout(timeout)),
    }
}
