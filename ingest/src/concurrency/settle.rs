use std::time::Duration;

/// Waits `interval` so that concurrent writers of the same claim land before it is read back.
///
/// A zero interval still yields once, letting futures polled together write their claims before
/// any of them verifies.
pub async fn settle(interval: Duration) {
    if interval.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(interval).await;
    }
}

/// Returns a random token identifying one delivery of a message.
pub fn delivery_token() -> String {
    format!("{:016x}", rand::random::<u64>())
}
