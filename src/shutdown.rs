//! Server-wide shutdown signal.
//!
//! The server owns a `watch::Sender<bool>` and flips it to `true` once.
//! Sessions and the expiry sweeper each hold a receiver.

use tokio::sync::watch;

/// Resolves once shutdown has been signalled.
///
/// A dropped sender without a signal means no shutdown will ever come.
pub(crate) async fn requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|&stop| stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_resolves_after_signal() {
        let (tx, mut rx) = watch::channel(false);
        tx.send_replace(true);
        tokio::time::timeout(Duration::from_millis(100), requested(&mut rx))
            .await
            .expect("signal was missed");
    }

    #[tokio::test]
    async fn test_dropped_sender_never_resolves() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        let waited = tokio::time::timeout(Duration::from_millis(50), requested(&mut rx)).await;
        assert!(waited.is_err());
    }
}
