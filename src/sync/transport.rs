use crate::domain::message::{DeleteScope, MessageView, PinDuration};
use crate::sync::error::SyncResult;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Debug;
use uuid::Uuid;

/// Body of a send, as the server expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<Uuid>,
    pub client_message_id: Uuid,
}

/// The request/response half of the chat protocol. Implementations map
/// transport failures to `SyncError::Network` and server error bodies to
/// `SyncError::Rejected`; the client adds its own timeout on top.
#[async_trait]
pub trait ChatTransport: Send + Sync + Debug {
    async fn list_messages(&self, appointment_id: Uuid) -> SyncResult<Vec<MessageView>>;

    async fn send_message(&self, appointment_id: Uuid, message: &OutgoingMessage) -> SyncResult<MessageView>;

    async fn edit_message(&self, message_id: Uuid, body: &str) -> SyncResult<MessageView>;

    async fn delete_message(&self, message_id: Uuid, scope: DeleteScope) -> SyncResult<()>;

    async fn star_message(&self, message_id: Uuid, starred: bool) -> SyncResult<MessageView>;

    /// `None` unpins.
    async fn pin_message(&self, message_id: Uuid, duration: Option<PinDuration>) -> SyncResult<MessageView>;

    /// Returns the ids the server promoted to read.
    async fn mark_read(&self, appointment_id: Uuid) -> SyncResult<Vec<Uuid>>;
}
