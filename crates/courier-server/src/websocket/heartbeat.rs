//! Peer liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::session::Session;

/// How the heartbeat loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The peer went silent for the whole timeout window.
    TimedOut,
    /// The session ended first.
    Cancelled,
}

/// Watch `session` until it goes silent or `cancel` fires.
///
/// Every `interval` the session's activity flag is read and reset. After
/// `timeout / interval` consecutive silent ticks (at least one) the peer is
/// considered gone.
pub async fn run_heartbeat(
    session: Arc<Session>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let max_missed = (timeout.as_millis() / interval.as_millis().max(1)).max(1);
    let mut missed: u128 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if session.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::Identifier;
    use tokio::sync::mpsc;

    fn make_session() -> Arc<Session> {
        let (tx, _rx) = mpsc::channel(4);
        Arc::new(Session::new(Identifier::new(), tx))
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let session = make_session();
        let result = run_heartbeat(
            session,
            Duration::from_millis(100),
            Duration::from_millis(300),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_wins_over_long_interval() {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            make_session(),
            Duration::from_secs(60),
            Duration::from_secs(180),
            cancel.clone(),
        ));
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn active_peer_stays_connected() {
        let session = make_session();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            session.clone(),
            Duration::from_millis(100),
            Duration::from_millis(200),
            cancel.clone(),
        ));

        for _ in 0..10 {
            time::sleep(Duration::from_millis(50)).await;
            session.mark_alive();
        }
        assert!(!handle.is_finished());

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }
}
