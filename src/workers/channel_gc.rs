use crate::services::event_bus::EventBus;
use std::time::Duration;
use tokio::sync::watch;
use tracing::Instrument;

/// Reclaims event channels nobody listens to anymore.
#[derive(Debug)]
pub struct ChannelGcWorker {
    bus: EventBus,
    gc_interval_secs: u64,
}

impl ChannelGcWorker {
    #[must_use]
    pub const fn new(bus: EventBus, gc_interval_secs: u64) -> Self {
        Self { bus, gc_interval_secs }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut gc_interval = tokio::time::interval(Duration::from_secs(self.gc_interval_secs.max(1)));
        tracing::info!("Channel GC worker started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = shutdown.changed() => {}

                _ = gc_interval.tick() => {
                    async {
                        self.bus.perform_gc();
                    }
                    .instrument(tracing::debug_span!("channel_gc_iteration"))
                    .await;
                }
            }
        }

        tracing::info!("Channel GC worker shutting down...");
    }
}
