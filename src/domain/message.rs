use crate::domain::appointment::ActorRole;
use crate::domain::receipt::DeliveryStatus;
use crate::domain::user::Actor;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

pub const MAX_CUSTOM_PIN_HOURS: u16 = 8760;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PinDuration {
    Hours24,
    Days7,
    Days30,
    Custom { hours: u16 },
}

impl PinDuration {
    #[must_use]
    pub const fn hours(self) -> u16 {
        match self {
            Self::Hours24 => 24,
            Self::Days7 => 24 * 7,
            Self::Days30 => 24 * 30,
            Self::Custom { hours } => hours,
        }
    }

    /// Inverse of [`PinDuration::hours`] for storage; preset lengths map back to presets.
    #[must_use]
    pub const fn from_hours(hours: u16) -> Self {
        match hours {
            24 => Self::Hours24,
            168 => Self::Days7,
            720 => Self::Days30,
            hours => Self::Custom { hours },
        }
    }

    /// # Errors
    /// Returns `AppError::BadRequest` if a custom duration is outside `1..=8760` hours.
    pub fn validate(self) -> Result<Self> {
        match self {
            Self::Custom { hours } if hours == 0 || hours > MAX_CUSTOM_PIN_HOURS => Err(AppError::BadRequest(format!(
                "Custom pin duration must be between 1 and {MAX_CUSTOM_PIN_HOURS} hours"
            ))),
            other => Ok(other),
        }
    }

    #[must_use]
    pub fn span(self) -> Duration {
        Duration::hours(i64::from(self.hours()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    pub by: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub duration: PinDuration,
}

impl Pin {
    #[must_use]
    pub fn new(by: Uuid, duration: PinDuration, now: OffsetDateTime) -> Self {
        Self { by, at: now, expires_at: now + duration.span(), duration }
    }

    /// Expiry is evaluated at read time; nothing sweeps stale pins.
    #[must_use]
    pub fn is_active(&self, now: OffsetDateTime) -> bool {
        now <= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteScope {
    ForEveryone,
    #[default]
    ForMe,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub appointment_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: ActorRole,
    pub body: String,
    pub attachment_ref: Option<String>,
    pub reply_to_id: Option<Uuid>,
    pub client_message_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub client_message_id: Option<Uuid>,
    pub appointment_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: ActorRole,
    pub body: String,
    pub attachment_ref: Option<String>,
    pub created_at: OffsetDateTime,
    pub delivery_status: DeliveryStatus,
    pub read_by: Vec<Uuid>,
    pub deleted: bool,
    pub deleted_by: Option<Uuid>,
    pub deleted_at: Option<OffsetDateTime>,
    pub preserved_original_body: Option<String>,
    pub edited: bool,
    pub edited_at: Option<OffsetDateTime>,
    pub reply_to_id: Option<Uuid>,
    pub starred_by: Vec<Uuid>,
    pub pin: Option<Pin>,
    pub removed_for: Vec<Uuid>,
}

impl Message {
    #[must_use]
    pub fn new(new: NewMessage, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::now_v7(),
            client_message_id: new.client_message_id,
            appointment_id: new.appointment_id,
            sender_id: new.sender_id,
            sender_role: new.sender_role,
            body: new.body,
            attachment_ref: new.attachment_ref,
            created_at: now,
            delivery_status: DeliveryStatus::Sent,
            read_by: Vec::new(),
            deleted: false,
            deleted_by: None,
            deleted_at: None,
            preserved_original_body: None,
            edited: false,
            edited_at: None,
            reply_to_id: new.reply_to_id,
            starred_by: Vec::new(),
            pin: None,
            removed_for: Vec::new(),
        }
    }

    /// # Errors
    /// `Unauthorized` unless `editor` is the sender; `Conflict` on a deleted message.
    pub fn apply_edit(&mut self, editor: Uuid, body: String, now: OffsetDateTime) -> Result<bool> {
        if editor != self.sender_id {
            return Err(AppError::Unauthorized("only the sender can edit a message".into()));
        }
        if self.deleted {
            return Err(AppError::Conflict("message has been deleted".into()));
        }
        if self.body == body {
            return Ok(false);
        }
        self.body = body;
        self.edited = true;
        self.edited_at = Some(now);
        Ok(true)
    }

    /// Tombstones the message for everyone, keeping the original body for admins.
    ///
    /// # Errors
    /// `Unauthorized` unless the actor is the sender or an admin.
    pub fn apply_delete_for_everyone(&mut self, actor: &Actor, now: OffsetDateTime) -> Result<bool> {
        if actor.user_id != self.sender_id && !actor.is_admin {
            return Err(AppError::Unauthorized("only the sender or an admin can delete for everyone".into()));
        }
        if self.deleted {
            return Ok(false);
        }
        self.preserved_original_body = Some(std::mem::take(&mut self.body));
        self.deleted = true;
        self.deleted_by = Some(actor.user_id);
        self.deleted_at = Some(now);
        self.pin = None;
        Ok(true)
    }

    pub fn apply_remove_for(&mut self, user_id: Uuid) -> bool {
        insert_unique(&mut self.removed_for, user_id)
    }

    pub fn apply_star(&mut self, user_id: Uuid, on: bool) -> bool {
        if on { insert_unique(&mut self.starred_by, user_id) } else { remove_value(&mut self.starred_by, user_id) }
    }

    /// # Errors
    /// Returns `AppError::Conflict` when pinning a deleted message.
    pub fn apply_pin(&mut self, user_id: Uuid, duration: Option<PinDuration>, now: OffsetDateTime) -> Result<bool> {
        match duration {
            Some(duration) => {
                if self.deleted {
                    return Err(AppError::Conflict("deleted messages cannot be pinned".into()));
                }
                self.pin = Some(Pin::new(user_id, duration.validate()?, now));
                Ok(true)
            }
            None => Ok(self.pin.take().is_some()),
        }
    }

    /// Promotes `sent` to `delivered` for a reader other than the sender.
    pub fn apply_delivered(&mut self, reader: Uuid) -> bool {
        if reader == self.sender_id || self.delivery_status != DeliveryStatus::Sent {
            return false;
        }
        self.delivery_status = DeliveryStatus::Delivered;
        true
    }

    pub fn apply_read(&mut self, reader: Uuid) -> bool {
        if reader == self.sender_id || !insert_unique(&mut self.read_by, reader) {
            return false;
        }
        self.delivery_status = self.delivery_status.merge(DeliveryStatus::Read);
        true
    }

    /// Whether the message belongs in `viewer`'s history at all.
    #[must_use]
    pub fn is_visible_to(&self, viewer: Uuid, watermark: Option<OffsetDateTime>) -> bool {
        watermark.is_none_or(|w| self.created_at > w) && !self.removed_for.contains(&viewer)
    }

    #[must_use]
    pub fn view_for(&self, viewer: &Actor, now: OffsetDateTime) -> MessageView {
        let hide_content = self.deleted && !viewer.is_admin;
        MessageView {
            id: self.id,
            client_message_id: self.client_message_id,
            appointment_id: self.appointment_id,
            sender_id: self.sender_id,
            sender_role: self.sender_role,
            body: (!self.deleted).then(|| self.body.clone()),
            attachment_ref: if hide_content { None } else { self.attachment_ref.clone() },
            created_at: self.created_at,
            delivery_status: self.delivery_status,
            read_by: self.read_by.clone(),
            deleted: self.deleted,
            deleted_at: self.deleted_at,
            preserved_original_body: if viewer.is_admin { self.preserved_original_body.clone() } else { None },
            edited: self.edited,
            edited_at: self.edited_at,
            reply_to_id: self.reply_to_id,
            starred: self.starred_by.contains(&viewer.user_id),
            pin: self.pin.filter(|p| p.is_active(now)),
        }
    }
}

fn insert_unique(set: &mut Vec<Uuid>, value: Uuid) -> bool {
    if set.contains(&value) {
        return false;
    }
    set.push(value);
    true
}

fn remove_value(set: &mut Vec<Uuid>, value: Uuid) -> bool {
    let before = set.len();
    set.retain(|v| *v != value);
    set.len() != before
}

/// A message as rendered for one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: Uuid,
    pub client_message_id: Option<Uuid>,
    pub appointment_id: Uuid,
    pub sender_id: Uuid,
    pub sender_role: ActorRole,
    pub body: Option<String>,
    pub attachment_ref: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub delivery_status: DeliveryStatus,
    #[serde(default)]
    pub read_by: Vec<Uuid>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserved_original_body: Option<String>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub edited_at: Option<OffsetDateTime>,
    pub reply_to_id: Option<Uuid>,
    #[serde(default)]
    pub starred: bool,
    pub pin: Option<Pin>,
}
