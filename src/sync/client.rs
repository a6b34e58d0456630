use crate::domain::event::ReceiptUpdate;
use crate::domain::message::{DeleteScope, MessageView, PinDuration};
use crate::domain::receipt::DeliveryStatus;
use crate::protocol::ServerFrame;
use crate::sync::error::{SendFailed, SyncError, SyncResult};
use crate::sync::session::{ApplyOutcome, ChatSession};
use crate::sync::transport::{ChatTransport, OutgoingMessage};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// A send that is visible locally but not yet confirmed.
#[derive(Debug, Clone)]
pub struct StagedSend {
    pub correlation_id: Uuid,
    pub temp: MessageView,
    message: OutgoingMessage,
}

/// Optimistic chat client for one appointment.
///
/// The local session is behind a plain mutex and is never held across an
/// await, so gateway frames can be applied from another task while a request
/// is in flight.
#[derive(Debug, Clone)]
pub struct ChatClient {
    appointment_id: Uuid,
    session: Arc<Mutex<ChatSession>>,
    transport: Arc<dyn ChatTransport>,
    ack_timeout: Duration,
}

impl ChatClient {
    #[must_use]
    pub fn new(session: ChatSession, transport: Arc<dyn ChatTransport>, ack_timeout: Duration) -> Self {
        Self { appointment_id: session.appointment_id(), session: Arc::new(Mutex::new(session)), transport, ack_timeout }
    }

    fn session(&self) -> MutexGuard<'_, ChatSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn call<T>(&self, request: impl Future<Output = SyncResult<T>>) -> SyncResult<T> {
        match tokio::time::timeout(self.ack_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout),
        }
    }

    /// Snapshot of the rendered list.
    #[must_use]
    pub fn messages(&self) -> Vec<MessageView> {
        self.session().messages().to_vec()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.session().pending_count()
    }

    #[must_use]
    pub fn active_pins(&self, now: OffsetDateTime) -> Vec<MessageView> {
        self.session().active_pins(now).into_iter().cloned().collect()
    }

    /// Reloads the history from the server.
    ///
    /// # Errors
    /// Returns the transport error; the local list is left untouched.
    #[tracing::instrument(skip(self), fields(appointment_id = %self.appointment_id), err(level = "warn"))]
    pub async fn refresh(&self) -> SyncResult<usize> {
        let views = self.call(self.transport.list_messages(self.appointment_id)).await?;
        let count = views.len();
        self.session().load(views);
        Ok(count)
    }

    /// Shows the message immediately and returns what [`deliver`](Self::deliver) needs.
    #[must_use]
    pub fn stage_send(&self, body: String, reply_to_id: Option<Uuid>, attachment_ref: Option<String>) -> StagedSend {
        let temp = self.session().begin_send(body.clone(), reply_to_id, attachment_ref.clone(), OffsetDateTime::now_utc());
        let correlation_id = temp.id;
        StagedSend {
            correlation_id,
            temp,
            message: OutgoingMessage { body, attachment_ref, reply_to_id, client_message_id: correlation_id },
        }
    }

    /// Confirms a staged send with the server.
    ///
    /// # Errors
    /// Returns [`SendFailed`] with the original text when the server rejects
    /// the send or does not answer within the acknowledgment timeout.
    #[tracing::instrument(
        skip(self, staged),
        fields(appointment_id = %self.appointment_id, correlation_id = %staged.correlation_id)
    )]
    pub async fn deliver(&self, staged: StagedSend) -> Result<MessageView, SendFailed> {
        let correlation_id = staged.correlation_id;
        match self.call(self.transport.send_message(self.appointment_id, &staged.message)).await {
            Ok(canonical) => {
                let mut session = self.session();
                session.confirm_send(correlation_id, canonical.clone());
                Ok(session.find(canonical.id).cloned().unwrap_or(canonical))
            }
            Err(error) => {
                let mut session = self.session();
                if let Some(body) = session.fail_send(correlation_id) {
                    tracing::warn!(error = %error, "send rolled back");
                    return Err(SendFailed { error, body });
                }
                // The gateway already delivered the stored copy.
                session
                    .reconciled(correlation_id)
                    .cloned()
                    .ok_or(SendFailed { error, body: staged.message.body })
            }
        }
    }

    /// # Errors
    /// See [`deliver`](Self::deliver).
    pub async fn send_message(
        &self,
        body: String,
        reply_to_id: Option<Uuid>,
        attachment_ref: Option<String>,
    ) -> Result<MessageView, SendFailed> {
        let staged = self.stage_send(body, reply_to_id, attachment_ref);
        self.deliver(staged).await
    }

    fn settle(&self, correlation_id: Uuid, result: SyncResult<MessageView>) -> SyncResult<MessageView> {
        let mut session = self.session();
        match result {
            Ok(view) => {
                session.confirm(correlation_id, Some(view.clone()));
                Ok(view)
            }
            Err(e) => {
                session.rollback(correlation_id);
                Err(e)
            }
        }
    }

    /// # Errors
    /// Returns the failure after restoring the previous text.
    #[tracing::instrument(skip(self, body), fields(appointment_id = %self.appointment_id), err(level = "warn"))]
    pub async fn edit(&self, message_id: Uuid, body: String) -> SyncResult<MessageView> {
        let correlation_id = self.session().begin_edit(message_id, body.clone(), OffsetDateTime::now_utc())?;
        let result = self.call(self.transport.edit_message(message_id, &body)).await;
        self.settle(correlation_id, result)
    }

    /// # Errors
    /// Returns the failure after putting the message back.
    #[tracing::instrument(skip(self), fields(appointment_id = %self.appointment_id), err(level = "warn"))]
    pub async fn delete(&self, message_id: Uuid, scope: DeleteScope) -> SyncResult<()> {
        let correlation_id = self.session().begin_delete(message_id, scope, OffsetDateTime::now_utc())?;
        let result = self.call(self.transport.delete_message(message_id, scope)).await;
        let mut session = self.session();
        match result {
            Ok(()) => {
                session.confirm(correlation_id, None);
                Ok(())
            }
            Err(e) => {
                session.rollback(correlation_id);
                Err(e)
            }
        }
    }

    /// # Errors
    /// Returns the failure after restoring the previous flag.
    pub async fn star(&self, message_id: Uuid, starred: bool) -> SyncResult<MessageView> {
        let correlation_id = self.session().begin_star(message_id, starred)?;
        let result = self.call(self.transport.star_message(message_id, starred)).await;
        self.settle(correlation_id, result)
    }

    /// `None` unpins.
    ///
    /// # Errors
    /// Returns the failure after restoring the previous pin.
    pub async fn pin(&self, message_id: Uuid, duration: Option<PinDuration>) -> SyncResult<MessageView> {
        let correlation_id = self.session().begin_pin(message_id, duration, OffsetDateTime::now_utc())?;
        let result = self.call(self.transport.pin_message(message_id, duration)).await;
        self.settle(correlation_id, result)
    }

    /// Marks the conversation read, but only while the reader is at the
    /// bottom of the list and something from the other side is unread.
    ///
    /// # Errors
    /// Returns the transport error; nothing is marked locally.
    pub async fn mark_read(&self, at_bottom: bool) -> SyncResult<usize> {
        let viewer = {
            let session = self.session();
            if !at_bottom || !session.has_unread() {
                return Ok(0);
            }
            session.viewer()
        };

        let message_ids = self.call(self.transport.mark_read(self.appointment_id)).await?;
        let count = message_ids.len();
        self.session().apply_receipt(&ReceiptUpdate {
            appointment_id: self.appointment_id,
            reader_id: viewer,
            message_ids,
            status: DeliveryStatus::Read,
            at: OffsetDateTime::now_utc(),
        });
        Ok(count)
    }

    pub fn apply_frame(&self, frame: &ServerFrame) -> ApplyOutcome {
        self.session().apply_frame(frame)
    }

    /// Rolls back sends that outlived `window` without an acknowledgment.
    pub fn expire_pending(&self, window: Duration) -> Vec<(Uuid, String)> {
        let window = time::Duration::try_from(window).unwrap_or(time::Duration::MAX);
        self.session().expire_pending(OffsetDateTime::now_utc(), window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::appointment::ActorRole;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct FakeTransport {
        stored: Mutex<Vec<MessageView>>,
        reject: AtomicBool,
        stall: AtomicBool,
        read_calls: AtomicUsize,
    }

    impl FakeTransport {
        async fn gate(&self) -> SyncResult<()> {
            if self.stall.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            if self.reject.load(Ordering::SeqCst) {
                return Err(SyncError::Rejected {
                    status: 403,
                    code: "forbidden".into(),
                    message: "Not allowed".into(),
                });
            }
            Ok(())
        }

        fn update(&self, message_id: Uuid, change: impl FnOnce(&mut MessageView)) -> SyncResult<MessageView> {
            let mut stored = self.stored.lock().unwrap();
            let view = stored.iter_mut().find(|m| m.id == message_id).ok_or(SyncError::UnknownMessage(message_id))?;
            change(view);
            Ok(view.clone())
        }
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn list_messages(&self, _appointment_id: Uuid) -> SyncResult<Vec<MessageView>> {
            self.gate().await?;
            Ok(self.stored.lock().unwrap().clone())
        }

        async fn send_message(&self, appointment_id: Uuid, message: &OutgoingMessage) -> SyncResult<MessageView> {
            self.gate().await?;
            let view = MessageView {
                id: Uuid::now_v7(),
                client_message_id: Some(message.client_message_id),
                appointment_id,
                sender_id: Uuid::nil(),
                sender_role: ActorRole::Requester,
                body: Some(message.body.clone()),
                attachment_ref: message.attachment_ref.clone(),
                created_at: OffsetDateTime::now_utc(),
                delivery_status: DeliveryStatus::Sent,
                read_by: Vec::new(),
                deleted: false,
                deleted_at: None,
                preserved_original_body: None,
                edited: false,
                edited_at: None,
                reply_to_id: message.reply_to_id,
                starred: false,
                pin: None,
            };
            self.stored.lock().unwrap().push(view.clone());
            Ok(view)
        }

        async fn edit_message(&self, message_id: Uuid, body: &str) -> SyncResult<MessageView> {
            self.gate().await?;
            self.update(message_id, |m| {
                m.body = Some(body.to_string());
                m.edited = true;
            })
        }

        async fn delete_message(&self, message_id: Uuid, _scope: DeleteScope) -> SyncResult<()> {
            self.gate().await?;
            self.stored.lock().unwrap().retain(|m| m.id != message_id);
            Ok(())
        }

        async fn star_message(&self, message_id: Uuid, starred: bool) -> SyncResult<MessageView> {
            self.gate().await?;
            self.update(message_id, |m| m.starred = starred)
        }

        async fn pin_message(&self, message_id: Uuid, duration: Option<PinDuration>) -> SyncResult<MessageView> {
            self.gate().await?;
            self.update(message_id, |m| {
                m.pin = duration.map(|d| crate::domain::message::Pin::new(Uuid::nil(), d, OffsetDateTime::now_utc()));
            })
        }

        async fn mark_read(&self, _appointment_id: Uuid) -> SyncResult<Vec<Uuid>> {
            self.gate().await?;
            self.read_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.stored.lock().unwrap().iter().map(|m| m.id).collect())
        }
    }

    fn client(transport: &Arc<FakeTransport>) -> ChatClient {
        let session = ChatSession::new(Uuid::new_v4(), Uuid::nil(), ActorRole::Requester);
        ChatClient::new(session, Arc::clone(transport) as Arc<dyn ChatTransport>, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_send_confirms_in_place() {
        let transport = Arc::new(FakeTransport::default());
        let client = client(&transport);

        let staged = client.stage_send("on my way".into(), None, None);
        assert_eq!(client.messages()[0].delivery_status, DeliveryStatus::Sending);

        let stored = client.deliver(staged.clone()).await.unwrap();
        assert_eq!(stored.client_message_id, Some(staged.correlation_id));
        assert_eq!(client.messages(), vec![stored]);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_send_returns_text() {
        let transport = Arc::new(FakeTransport::default());
        transport.reject.store(true, Ordering::SeqCst);
        let client = client(&transport);

        let err = client.send_message("keep this".into(), None, None).await.unwrap_err();
        assert_eq!(err.body, "keep this");
        assert!(matches!(err.error, SyncError::Rejected { status: 403, .. }));
        assert!(client.messages().is_empty());
    }

    #[tokio::test]
    async fn test_unacknowledged_send_times_out() {
        let transport = Arc::new(FakeTransport::default());
        transport.stall.store(true, Ordering::SeqCst);
        let client = client(&transport);

        let err = client.send_message("slow".into(), None, None).await.unwrap_err();
        assert_eq!(err.error, SyncError::Timeout);
        assert_eq!(err.body, "slow");
        assert!(client.messages().is_empty());
    }

    #[tokio::test]
    async fn test_failed_edit_restores_previous_text() {
        let transport = Arc::new(FakeTransport::default());
        let client = client(&transport);
        let stored = client.send_message("original".into(), None, None).await.unwrap();

        transport.reject.store(true, Ordering::SeqCst);
        assert!(client.edit(stored.id, "changed".into()).await.is_err());
        assert_eq!(client.messages(), vec![stored.clone()]);

        assert!(client.star(stored.id, true).await.is_err());
        assert!(!client.messages()[0].starred);
    }

    #[tokio::test]
    async fn test_mark_read_only_at_bottom_with_unread() {
        let transport = Arc::new(FakeTransport::default());
        let client = client(&transport);

        // Own messages never count as unread.
        client.send_message("mine".into(), None, None).await.unwrap();
        assert_eq!(client.mark_read(true).await.unwrap(), 0);

        let mut incoming = client.messages()[0].clone();
        incoming.id = Uuid::now_v7();
        incoming.client_message_id = None;
        incoming.sender_id = Uuid::new_v4();
        client.apply_frame(&ServerFrame::MessageCreated(Box::new(incoming.clone())));
        transport.stored.lock().unwrap().push(incoming);

        assert_eq!(client.mark_read(false).await.unwrap(), 0);
        assert_eq!(transport.read_calls.load(Ordering::SeqCst), 0);

        assert_eq!(client.mark_read(true).await.unwrap(), 2);
        assert_eq!(transport.read_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.mark_read(true).await.unwrap(), 0);
    }
}
