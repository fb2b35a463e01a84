//! The periodic tick that flushes eligible buffered messages.
//!
//! A single `tokio::time::interval` publishing on a fixed period,
//! independent of liveness: it fires whether or not any message is
//! waiting, nudging the dispatcher to recheck its buffers.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;

/// The Resolving Time Duration: how often the dispatcher is nudged to
/// re-check its buffers even without a new inbound message.
pub const RESOLVING_TIME: Duration = Duration::from_secs(1);

/// Publishes a tick on `alarm_tx` every [`RESOLVING_TIME`], until the
/// receiving end is dropped.
pub async fn run(alarm_tx: mpsc::UnboundedSender<()>) {
    let mut ticker = time::interval(RESOLVING_TIME);
    loop {
        ticker.tick().await;
        if alarm_tx.send(()).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_at_the_resolving_time_period() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(run(tx));

        time::advance(RESOLVING_TIME).await;
        rx.recv().await.expect("first tick");

        time::advance(RESOLVING_TIME).await;
        rx.recv().await.expect("second tick");
    }
}
