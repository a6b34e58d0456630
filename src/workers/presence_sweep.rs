use crate::services::presence_service::PresenceService;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::Instrument;

/// Marks users offline once their heartbeats stop. The only polling loop in
/// the server; everything else is push.
#[derive(Debug)]
pub struct PresenceSweepWorker {
    presence: PresenceService,
    sweep_interval_secs: u64,
}

impl PresenceSweepWorker {
    #[must_use]
    pub const fn new(presence: PresenceService, sweep_interval_secs: u64) -> Self {
        Self { presence, sweep_interval_secs }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.sweep_interval_secs.max(1)));

        while !*shutdown.borrow() {
            tokio::select! {
                _ = interval.tick() => {
                    let swept = async { self.presence.sweep(OffsetDateTime::now_utc()) }
                        .instrument(tracing::debug_span!("presence_sweep_iteration"))
                        .await;
                    if swept > 0 {
                        tracing::info!(count = swept, "Marked silent users offline");
                    }
                }
                _ = shutdown.changed() => {}
            }
        }
        tracing::info!("Presence sweep loop shutting down...");
    }
}
