use std::time::Duration;

use tracing::info;

use crate::presence::PresenceRegistry;

/// Background task that evicts sessions which stopped talking.
///
/// A connection counts as alive while it sends frames or answers Pings. Once
/// it has been silent for longer than `max_idle` its session is closed and
/// dropped from the registry, which also ends the connection task.
pub async fn run_idle_sweep(presence: PresenceRegistry, every: Duration, max_idle: Duration) {
    let mut interval = tokio::time::interval(every);

    loop {
        interval.tick().await;

        let evicted = presence.evict_idle(max_idle);
        if !evicted.is_empty() {
            info!("Idle sweep: evicted {} sessions", evicted.len());
        }
    }
}
