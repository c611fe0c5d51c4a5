//! Periodic transport-level ping.
//!
//! Detects half-open connections sooner than TCP does and keeps idle
//! connections alive through proxies. Independent of user activity and of
//! the application-level `ping`/`pong` control frames.

use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, trace};

use super::supervisor::ExitReason;
use crate::transport::FrameSender;

/// Default interval between pings.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Ping every `period` until a send fails. The first ping goes out one full
/// period after start.
pub async fn keepalive(sender: FrameSender, period: Duration, session_id: &str) -> ExitReason {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(e) = sender.send_ping().await {
            info!(session_id, error = %e, "keepalive ping failed");
            return ExitReason::KeepaliveFailed;
        }
        trace!(session_id, "keepalive ping sent");
    }
}
