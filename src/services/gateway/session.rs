use crate::domain::event::BusEvent;
use crate::domain::presence::PresenceUpdate;
use crate::domain::user::Actor;
use crate::error::AppError;
use crate::protocol::{ClientFrame, ServerFrame};
use crate::services::event_bus::Subscription;
use crate::services::gateway::{GatewayService, delivery_batcher::DeliveryBatcher};
use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, close_code};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

type Sink = SplitSink<WebSocket, WsMessage>;

/// Appointment channel traffic, funnelled from per-subscription forwarders
/// into the session loop.
#[derive(Debug)]
enum Forwarded {
    Event(BusEvent),
    Lagged(Uuid),
}

#[derive(Debug)]
struct Watch {
    task: JoinHandle<()>,
    /// Participants whose presence this session follows.
    watched: Vec<Uuid>,
    watermark: Option<OffsetDateTime>,
}

pub(crate) struct Session {
    pub(crate) actor: Actor,
    pub(crate) request_id: String,
    pub(crate) socket: WebSocket,
    pub(crate) gateway: GatewayService,
    pub(crate) shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl Session {
    #[tracing::instrument(
        name = "websocket_session",
        skip(self),
        fields(
            user_id = %self.actor.user_id,
            request_id = %self.request_id,
            otel.kind = "server",
            ws.session_id = tracing::field::Empty
        )
    )]
    pub(crate) async fn run(self) {
        let Self { actor, socket, gateway, mut shutdown_rx, .. } = self;
        let session_id = Uuid::new_v4();
        tracing::Span::current().record("ws.session_id", tracing::field::display(session_id));

        let metrics = gateway.metrics.clone();
        metrics.active_connections.add(1, &[]);
        tracing::info!("WebSocket connected");

        let mut user_rx = gateway.bus.subscribe_user(actor.user_id);
        let mut admin_rx = actor.is_admin.then(|| gateway.bus.subscribe_admin());
        let mut presence_rx = gateway.bus.subscribe_presence();
        gateway.presence.connect(actor.user_id);

        let (mut ws_sink, mut ws_stream) = socket.split();
        let (forward_tx, mut forward_rx) = mpsc::channel(gateway.config.outbound_buffer_size);

        let deliveries = DeliveryBatcher::new(
            actor,
            gateway.receipts.clone(),
            metrics.clone(),
            gateway.config.ack_buffer_size,
            gateway.config.ack_batch_size,
            gateway.config.ack_flush_interval_ms,
        );

        let mut conn = Connection {
            actor,
            session_id,
            gateway: gateway.clone(),
            watches: HashMap::new(),
            versions: HashMap::new(),
            forward_tx,
            deliveries,
        };

        let ping_period = Duration::from_secs(gateway.config.ping_interval_secs.max(1));
        let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + ping_period, ping_period);
        let mut missed_pongs: u8 = 0;

        let mut open = send_frames(&mut ws_sink, &conn, vec![ServerFrame::Ready { user_id: actor.user_id, session_id }]).await;

        while open {
            if *shutdown_rx.borrow() {
                tracing::info!("Shutdown signal received, closing WebSocket");
                let _ = ws_sink
                    .send(WsMessage::Close(Some(CloseFrame { code: close_code::AWAY, reason: "Server shutting down".into() })))
                    .await;
                break;
            }

            let frames = tokio::select! {
                biased;

                _ = shutdown_rx.changed() => Vec::new(),

                msg = ws_stream.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        metrics.frame("inbound");
                        match serde_json::from_str::<ClientFrame>(text.as_str()) {
                            Ok(frame) => conn.on_client_frame(frame).await,
                            Err(e) => {
                                tracing::debug!(error = %e, "Failed to decode client frame");
                                vec![ServerFrame::error(&AppError::BadRequest(format!("Invalid frame: {e}")), None)]
                            }
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        tracing::debug!("Received heartbeat pong from client");
                        missed_pongs = 0;
                        conn.gateway.presence.heartbeat(actor.user_id);
                        Vec::new()
                    }
                    Some(Ok(WsMessage::Ping(_))) => {
                        conn.gateway.presence.heartbeat(actor.user_id);
                        Vec::new()
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        tracing::warn!("Received unexpected binary message");
                        vec![ServerFrame::error(&AppError::BadRequest("Binary frames are not supported".into()), None)]
                    }
                    Some(Ok(WsMessage::Close(_)) | Err(_)) | None => break,
                },

                Some(forwarded) = forward_rx.recv() => match forwarded {
                    Forwarded::Event(event) => conn.on_event(event).await,
                    Forwarded::Lagged(appointment_id) => {
                        metrics.lagged_total.add(1, &[]);
                        vec![ServerFrame::Error {
                            code: "lagged".into(),
                            message: "Missed events; refetch the conversation".into(),
                            appointment_id: Some(appointment_id),
                        }]
                    }
                },

                result = user_rx.recv() => match result {
                    Ok(BusEvent::Disconnect) | Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Disconnect requested for user");
                        break;
                    }
                    Ok(event) => conn.on_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "User feed lagged");
                        metrics.lagged_total.add(1, &[]);
                        vec![ServerFrame::Error { code: "lagged".into(), message: "Missed events".into(), appointment_id: None }]
                    }
                },

                result = recv_optional(&mut admin_rx) => match result {
                    Ok(event) => conn.on_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Admin feed lagged");
                        Vec::new()
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        admin_rx = None;
                        Vec::new()
                    }
                },

                result = presence_rx.recv() => match result {
                    Ok(update) => conn.on_presence(update).into_iter().collect(),
                    Err(broadcast::error::RecvError::Lagged(_)) => conn.presence_snapshots(),
                    Err(broadcast::error::RecvError::Closed) => Vec::new(),
                },

                _ = ping.tick() => {
                    if missed_pongs >= conn.gateway.config.max_missed_pongs {
                        tracing::info!(missed_pongs, "Client stopped answering heartbeats");
                        break;
                    }
                    missed_pongs += 1;
                    if ws_sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    Vec::new()
                }
            };

            open = send_frames(&mut ws_sink, &conn, frames).await;
        }

        let _ = ws_sink.close().await;
        conn.close().await;

        if gateway.presence.disconnect(actor.user_id) {
            gateway.gate.revoke_user(actor.user_id);
        }

        metrics.active_connections.add(-1, &[]);
        tracing::info!("WebSocket disconnected");
    }
}

async fn recv_optional(
    rx: &mut Option<broadcast::Receiver<BusEvent>>,
) -> std::result::Result<BusEvent, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_frames(sink: &mut Sink, conn: &Connection, frames: Vec<ServerFrame>) -> bool {
    for frame in frames {
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode server frame");
                continue;
            }
        };
        if sink.send(WsMessage::Text(json.into())).await.is_err() {
            return false;
        }
        conn.gateway.metrics.frame("outbound");
    }
    true
}

fn spawn_forwarder(mut subscription: Subscription, tx: mpsc::Sender<Forwarded>) -> JoinHandle<()> {
    let appointment_id = subscription.appointment_id();
    tokio::spawn(
        async move {
            loop {
                let forwarded = match subscription.recv().await {
                    Ok(event) => Forwarded::Event(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Appointment subscription lagged");
                        Forwarded::Lagged(appointment_id)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if tx.send(forwarded).await.is_err() {
                    break;
                }
            }
        }
        .instrument(tracing::debug_span!("appointment_forwarder", %appointment_id)),
    )
}

/// Per-connection state: subscriptions, clear-chat watermarks and the last
/// appointment version sent, so the same update arriving on several feeds is
/// rendered once.
struct Connection {
    actor: Actor,
    session_id: Uuid,
    gateway: GatewayService,
    watches: HashMap<Uuid, Watch>,
    versions: HashMap<Uuid, i64>,
    forward_tx: mpsc::Sender<Forwarded>,
    deliveries: DeliveryBatcher,
}

impl Connection {
    async fn on_client_frame(&mut self, frame: ClientFrame) -> Vec<ServerFrame> {
        match frame {
            ClientFrame::Subscribe { appointment_id } => self.subscribe(appointment_id).await,
            ClientFrame::Unsubscribe { appointment_id } => {
                if self.unsubscribe(appointment_id).await {
                    vec![ServerFrame::Unsubscribed { appointment_id }]
                } else {
                    vec![ServerFrame::error(&AppError::BadRequest("Not subscribed".into()), Some(appointment_id))]
                }
            }
            ClientFrame::Delivered { appointment_id, message_ids } => {
                self.deliveries.push(appointment_id, message_ids);
                Vec::new()
            }
            ClientFrame::Typing { appointment_id } => {
                if self.watches.contains_key(&appointment_id) {
                    self.gateway.presence.set_typing(appointment_id, self.actor.user_id);
                    Vec::new()
                } else {
                    vec![ServerFrame::error(&AppError::BadRequest("Not subscribed".into()), Some(appointment_id))]
                }
            }
            ClientFrame::Heartbeat => {
                self.gateway.presence.heartbeat(self.actor.user_id);
                Vec::new()
            }
            ClientFrame::CloseChat { appointment_id } => {
                self.gateway.gate.close_chat(appointment_id, self.actor.user_id);
                if self.unsubscribe(appointment_id).await {
                    vec![ServerFrame::Unsubscribed { appointment_id }]
                } else {
                    Vec::new()
                }
            }
        }
    }

    async fn subscribe(&mut self, appointment_id: Uuid) -> Vec<ServerFrame> {
        if self.watches.contains_key(&appointment_id) {
            return vec![ServerFrame::error(&AppError::Conflict("already subscribed".into()), Some(appointment_id))];
        }

        let appointment = match self.gateway.messages.open_chat(&self.actor, appointment_id).await {
            Ok((appointment, _)) => appointment,
            Err(e) => return vec![ServerFrame::error(&e, Some(appointment_id))],
        };
        let subscription = match self.gateway.bus.subscribe(appointment_id, self.session_id) {
            Ok(subscription) => subscription,
            Err(e) => return vec![ServerFrame::error(&e, Some(appointment_id))],
        };

        let watched: Vec<Uuid> = [appointment.requester_id, appointment.responder_id]
            .into_iter()
            .filter(|id| *id != self.actor.user_id)
            .collect();

        let mut frames = vec![ServerFrame::Subscribed { appointment_id }];
        frames.extend(watched.iter().map(|id| ServerFrame::PresenceChanged(self.gateway.presence.snapshot(*id))));

        let watch = Watch {
            task: spawn_forwarder(subscription, self.forward_tx.clone()),
            watched,
            watermark: appointment.chat_cleared_at(self.actor.user_id),
        };
        self.watches.insert(appointment_id, watch);
        tracing::debug!(%appointment_id, "Subscribed to appointment");
        frames
    }

    /// Stops the forwarder and waits for it so the subscription guard is gone
    /// before the caller can subscribe again.
    async fn unsubscribe(&mut self, appointment_id: Uuid) -> bool {
        let Some(watch) = self.watches.remove(&appointment_id) else {
            return false;
        };
        watch.task.abort();
        let _ = watch.task.await;
        tracing::debug!(%appointment_id, "Unsubscribed from appointment");
        true
    }

    async fn on_event(&mut self, event: BusEvent) -> Vec<ServerFrame> {
        let now = OffsetDateTime::now_utc();
        match event {
            BusEvent::AppointmentUpdated(appointment) => {
                let last = self.versions.entry(appointment.id).or_insert(i64::MIN);
                if appointment.version <= *last {
                    return Vec::new();
                }
                *last = appointment.version;
                if let Some(watch) = self.watches.get_mut(&appointment.id) {
                    watch.watermark = appointment.chat_cleared_at(self.actor.user_id);
                }
                vec![ServerFrame::AppointmentUpdated(Box::new(appointment.view_for(&self.actor, now)))]
            }
            BusEvent::MessageCreated(message) | BusEvent::MessageUpdated(message)
                if !message.is_visible_to(self.actor.user_id, self.watermark(message.appointment_id)) =>
            {
                Vec::new()
            }
            BusEvent::MessageCreated(message) => {
                vec![ServerFrame::MessageCreated(Box::new(message.view_for(&self.actor, now)))]
            }
            BusEvent::MessageUpdated(message) => {
                vec![ServerFrame::MessageUpdated(Box::new(message.view_for(&self.actor, now)))]
            }
            BusEvent::MessageHidden { appointment_id, message_id } => {
                vec![ServerFrame::MessageHidden { appointment_id, message_id }]
            }
            BusEvent::ReceiptUpdated(update) => vec![ServerFrame::ReceiptUpdated(update)],
            BusEvent::Typing { user_id, .. } if user_id == self.actor.user_id => Vec::new(),
            BusEvent::Typing { appointment_id, user_id, expires_at } => {
                vec![ServerFrame::Typing { appointment_id, user_id, expires_at }]
            }
            BusEvent::ChatLockChanged { appointment_id, locked, changed_by } => {
                let mut frames = vec![ServerFrame::ChatLockChanged { appointment_id, locked, changed_by }];
                let admitted = self.actor.is_admin || self.gateway.gate.is_granted(appointment_id, self.actor.user_id);
                if locked && !admitted && self.unsubscribe(appointment_id).await {
                    frames.push(ServerFrame::Unsubscribed { appointment_id });
                }
                frames
            }
            BusEvent::ChatReset { appointment_id, reset_by } => vec![ServerFrame::ChatReset { appointment_id, reset_by }],
            BusEvent::Presence(update) => self.on_presence(update).into_iter().collect(),
            BusEvent::Disconnect => Vec::new(),
        }
    }

    fn watermark(&self, appointment_id: Uuid) -> Option<OffsetDateTime> {
        self.watches.get(&appointment_id).and_then(|w| w.watermark)
    }

    fn is_watching(&self, user_id: Uuid) -> bool {
        self.watches.values().any(|w| w.watched.contains(&user_id))
    }

    fn on_presence(&self, update: PresenceUpdate) -> Option<ServerFrame> {
        self.is_watching(update.user_id).then_some(ServerFrame::PresenceChanged(update))
    }

    fn presence_snapshots(&self) -> Vec<ServerFrame> {
        let mut users: Vec<Uuid> = self.watches.values().flat_map(|w| w.watched.iter().copied()).collect();
        users.sort_unstable();
        users.dedup();
        users.into_iter().map(|id| ServerFrame::PresenceChanged(self.gateway.presence.snapshot(id))).collect()
    }

    async fn close(self) {
        for (_, watch) in self.watches {
            watch.task.abort();
        }
        self.deliveries.finish().await;
    }
}
