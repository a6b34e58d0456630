pub(crate) mod delivery_batcher;
pub(crate) mod session;

use crate::config::WsConfig;
use crate::domain::user::Actor;
use crate::services::access_gate::AccessGate;
use crate::services::event_bus::EventBus;
use crate::services::gateway::session::Session;
use crate::services::message_service::MessageService;
use crate::services::presence_service::PresenceService;
use crate::services::receipt_service::ReceiptService;
use axum::extract::ws::WebSocket;
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram, UpDownCounter},
};

#[derive(Clone, Debug)]
pub(crate) struct Metrics {
    pub(crate) receipt_batch_size: Histogram<u64>,
    pub(crate) receipt_queue_dropped_total: Counter<u64>,
    pub(crate) active_connections: UpDownCounter<i64>,
    pub(crate) frames_total: Counter<u64>,
    pub(crate) lagged_total: Counter<u64>,
}

impl Metrics {
    #[must_use]
    pub(crate) fn new() -> Self {
        let meter = global::meter("rendezvous-server");
        Self {
            receipt_batch_size: meter
                .u64_histogram("rendezvous_ws_receipt_batch_size")
                .with_description("Size of delivery receipt batches processed")
                .build(),
            receipt_queue_dropped_total: meter
                .u64_counter("rendezvous_ws_receipt_queue_dropped_total")
                .with_description("Delivery receipts dropped due to full buffer")
                .build(),
            active_connections: meter
                .i64_up_down_counter("rendezvous_ws_active_connections")
                .with_description("Number of active WebSocket connections")
                .build(),
            frames_total: meter
                .u64_counter("rendezvous_ws_frames_total")
                .with_description("Frames exchanged over the gateway by direction")
                .build(),
            lagged_total: meter
                .u64_counter("rendezvous_ws_lagged_total")
                .with_description("Subscriptions that fell behind their channel")
                .build(),
        }
    }

    pub(crate) fn frame(&self, direction: &'static str) {
        self.frames_total.add(1, &[KeyValue::new("direction", direction)]);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Real-time edge. Each accepted socket becomes a [`Session`] that owns its
/// subscriptions for as long as the connection lives.
#[derive(Clone, Debug)]
pub struct GatewayService {
    bus: EventBus,
    presence: PresenceService,
    messages: MessageService,
    receipts: ReceiptService,
    gate: AccessGate,
    config: WsConfig,
    metrics: Metrics,
}

impl GatewayService {
    #[must_use]
    pub fn new(
        bus: EventBus,
        presence: PresenceService,
        messages: MessageService,
        receipts: ReceiptService,
        gate: AccessGate,
        config: WsConfig,
    ) -> Self {
        Self { bus, presence, messages, receipts, gate, config, metrics: Metrics::new() }
    }

    pub async fn handle_socket(
        &self,
        socket: WebSocket,
        actor: Actor,
        request_id: String,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let session = Session { actor, request_id, socket, gateway: self.clone(), shutdown_rx };
        session.run().await;
    }
}
