use crate::server::telemetry::increment_sessions_closed;
use core::time::Duration;
use sluice_tonic_core::sluice::SessionStore;
use std::sync::Arc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// Background task that closes sessions left unused for longer than
/// `max_idle`.
///
/// Sessions with a read in progress are never swept. The loop checks every
/// `every` and exits as soon as `shutdown` is cancelled.
pub async fn sweep_loop(
    sessions: Arc<SessionStore>,
    max_idle: Duration,
    every: Duration,
    shutdown: CancellationToken,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Idle sweeper started ({max_idle:?} idle limit, every {every:?})");

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let swept = sessions.sweep_idle(max_idle);
                if swept > 0 {
                    increment_sessions_closed(swept as u64);
                    #[cfg(feature = "tracing")]
                    tracing::info!("Closed {swept} idle session(s), {} open", sessions.len());
                }
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Idle sweeper stopped");
}
