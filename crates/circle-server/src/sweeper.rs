use std::time::Duration;

use tracing::{debug, info};

use circle_api::session::SessionStore;

/// Background task that drops expired sessions.
///
/// Lookups already treat stale entries as absent; this keeps the map from
/// growing with sessions nobody logs out of.
pub async fn run_session_sweeper(sessions: SessionStore, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

    loop {
        interval.tick().await;

        let purged = sessions.purge_expired().await;
        if purged > 0 {
            info!("Session sweep: purged {} expired sessions", purged);
        } else {
            debug!("Session sweep: nothing to purge");
        }
    }
}
