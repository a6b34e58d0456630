use crate::domain::user::Actor;
use crate::services::gateway::Metrics;
use crate::services::receipt_service::ReceiptService;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

/// Coalesces `delivered` frames from one connection into per-appointment
/// receipt writes, so a burst of incoming messages costs one storage round
/// trip and one `receiptUpdated` broadcast per appointment.
#[derive(Debug)]
pub(crate) struct DeliveryBatcher {
    tx: mpsc::Sender<(Uuid, Uuid)>,
    task: tokio::task::JoinHandle<()>,
    metrics: Metrics,
}

impl DeliveryBatcher {
    pub(crate) fn new(
        actor: Actor,
        receipts: ReceiptService,
        metrics: Metrics,
        buffer_size: usize,
        batch_size: usize,
        flush_interval_ms: u64,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size);

        let batcher_metrics = metrics.clone();
        let task = tokio::spawn(
            async move {
                Self::run_background(actor, rx, receipts, batcher_metrics, batch_size, flush_interval_ms).await;
            }
            .instrument(tracing::info_span!("delivery_batcher", "user.id" = %actor.user_id)),
        );

        Self { tx, task, metrics }
    }

    pub(crate) fn push(&self, appointment_id: Uuid, message_ids: Vec<Uuid>) {
        for message_id in message_ids {
            if self.tx.try_send((appointment_id, message_id)).is_err() {
                tracing::warn!(%message_id, "Dropped delivery receipt due to full buffer");
                self.metrics.receipt_queue_dropped_total.add(1, &[]);
            }
        }
    }

    /// Closes the queue and lets the background task flush what is left.
    pub(crate) async fn finish(self) {
        drop(self.tx);
        let _ = self.task.await;
    }

    async fn run_background(
        actor: Actor,
        mut rx: mpsc::Receiver<(Uuid, Uuid)>,
        receipts: ReceiptService,
        metrics: Metrics,
        batch_size: usize,
        flush_interval_ms: u64,
    ) {
        loop {
            let mut batch = Vec::new();

            match rx.recv().await {
                Some(item) => batch.push(item),
                None => return,
            }

            let timeout = tokio::time::sleep(Duration::from_millis(flush_interval_ms));
            tokio::pin!(timeout);

            loop {
                if batch.len() >= batch_size {
                    break;
                }

                tokio::select! {
                    res = rx.recv() => {
                        if let Some(item) = res {
                            batch.push(item);
                        } else {
                            Self::flush_batch(&actor, &receipts, &metrics, batch).await;
                            return;
                        }
                    }
                    () = &mut timeout => break,
                }
            }

            Self::flush_batch(&actor, &receipts, &metrics, batch).await;
        }
    }

    async fn flush_batch(actor: &Actor, receipts: &ReceiptService, metrics: &Metrics, batch: Vec<(Uuid, Uuid)>) {
        if batch.is_empty() {
            return;
        }
        tracing::debug!(batch_size = batch.len(), "Flushing delivery batch");
        metrics.receipt_batch_size.record(batch.len() as u64, &[]);

        let mut by_appointment: BTreeMap<Uuid, Vec<Uuid>> = BTreeMap::new();
        for (appointment_id, message_id) in batch {
            let ids = by_appointment.entry(appointment_id).or_default();
            if !ids.contains(&message_id) {
                ids.push(message_id);
            }
        }

        for (appointment_id, ids) in by_appointment {
            if let Err(e) = receipts.mark_delivered(actor, appointment_id, &ids).await {
                tracing::warn!(error = %e, %appointment_id, "Failed to record delivery receipts");
            }
        }
    }
}
