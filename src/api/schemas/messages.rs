use crate::domain::message::{DeleteScope, PinDuration};
use crate::services::message_service::SendMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachment_ref: Option<String>,
    #[serde(default)]
    pub reply_to_id: Option<Uuid>,
    #[serde(default)]
    pub client_message_id: Option<Uuid>,
}

impl From<SendMessageRequest> for SendMessage {
    fn from(req: SendMessageRequest) -> Self {
        Self {
            body: req.body,
            attachment_ref: req.attachment_ref,
            reply_to_id: req.reply_to_id,
            client_message_id: req.client_message_id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub scope: DeleteScope,
}

#[derive(Debug, Deserialize)]
pub struct StarRequest {
    pub starred: bool,
}

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub pinned: bool,
    #[serde(default)]
    pub duration: Option<PinDuration>,
}

impl PinRequest {
    /// `None` unpins; pinning without a duration uses 24 hours.
    #[must_use]
    pub fn duration(&self) -> Option<PinDuration> {
        self.pinned.then(|| self.duration.unwrap_or(PinDuration::Hours24))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredRequest {
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptResponse {
    pub message_ids: Vec<Uuid>,
}
