use crate::domain::appointment::ActorRole;
use crate::domain::event::ReceiptUpdate;
use crate::domain::message::{DeleteScope, MessageView, Pin, PinDuration};
use crate::domain::receipt::DeliveryStatus;
use crate::protocol::ServerFrame;
use crate::sync::error::{SyncError, SyncResult};
use std::collections::HashMap;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// What applying a confirmation or an event did to the local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The record was already known; it was merged, not added again.
    Duplicate,
    Ignored,
}

#[derive(Debug, Clone)]
enum PendingOp {
    Send { body: String, started_at: OffsetDateTime },
    Mutation { message_id: Uuid, snapshot: MessageView },
}

/// Local state of one appointment's chat as one user sees it.
///
/// Every optimistic action is registered under a fresh correlation id. For
/// sends the correlation id doubles as the temp entry's id and as the
/// `client_message_id` sent to the server, which lets an early gateway event
/// and the later acknowledgment land on the same entry.
#[derive(Debug)]
pub struct ChatSession {
    appointment_id: Uuid,
    viewer: Uuid,
    role: ActorRole,
    messages: Vec<MessageView>,
    pending: HashMap<Uuid, PendingOp>,
}

/// Receipts only move forward and readers only accumulate.
fn merge_into(existing: &mut MessageView, incoming: MessageView) {
    let status = existing.delivery_status.merge(incoming.delivery_status);
    let mut read_by = std::mem::take(&mut existing.read_by);
    for reader in &incoming.read_by {
        if !read_by.contains(reader) {
            read_by.push(*reader);
        }
    }
    *existing = incoming;
    existing.delivery_status = status;
    existing.read_by = read_by;
}

impl ChatSession {
    #[must_use]
    pub fn new(appointment_id: Uuid, viewer: Uuid, role: ActorRole) -> Self {
        Self { appointment_id, viewer, role, messages: Vec::new(), pending: HashMap::new() }
    }

    #[must_use]
    pub const fn appointment_id(&self) -> Uuid {
        self.appointment_id
    }

    #[must_use]
    pub fn messages(&self) -> &[MessageView] {
        &self.messages
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn find(&self, id: Uuid) -> Option<&MessageView> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// The confirmed record for a send, once the server's copy replaced the temp entry.
    #[must_use]
    pub fn reconciled(&self, correlation_id: Uuid) -> Option<&MessageView> {
        self.messages.iter().find(|m| m.client_message_id == Some(correlation_id) && m.id != correlation_id)
    }

    fn position(&self, id: Uuid) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    fn insert_ordered(&mut self, view: MessageView) {
        let at = self.messages.partition_point(|m| m.created_at <= view.created_at);
        self.messages.insert(at, view);
    }

    /// Replaces the canonical history with a fresh server listing. A send the
    /// listing already contains is settled; the rest keep their temp entries
    /// at the end.
    pub fn load(&mut self, mut views: Vec<MessageView>) {
        for correlation_id in views.iter().filter_map(|v| v.client_message_id) {
            if matches!(self.pending.get(&correlation_id), Some(PendingOp::Send { .. })) {
                self.pending.remove(&correlation_id);
            }
        }

        let pending = &self.pending;
        let temps: Vec<MessageView> =
            self.messages.drain(..).filter(|m| matches!(pending.get(&m.id), Some(PendingOp::Send { .. }))).collect();
        views.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        self.messages = views;
        self.messages.extend(temps);
    }

    /// Appends a `sending` temp entry and returns it. Its id is the correlation id.
    pub fn begin_send(
        &mut self,
        body: String,
        reply_to_id: Option<Uuid>,
        attachment_ref: Option<String>,
        now: OffsetDateTime,
    ) -> MessageView {
        let correlation_id = Uuid::new_v4();
        let temp = MessageView {
            id: correlation_id,
            client_message_id: Some(correlation_id),
            appointment_id: self.appointment_id,
            sender_id: self.viewer,
            sender_role: self.role,
            body: Some(body.clone()),
            attachment_ref,
            created_at: now,
            delivery_status: DeliveryStatus::Sending,
            read_by: Vec::new(),
            deleted: false,
            deleted_at: None,
            preserved_original_body: None,
            edited: false,
            edited_at: None,
            reply_to_id,
            starred: false,
            pin: None,
        };
        self.messages.push(temp.clone());
        self.pending.insert(correlation_id, PendingOp::Send { body, started_at: now });
        temp
    }

    /// Swaps the temp entry for the server's record, in place.
    pub fn confirm_send(&mut self, correlation_id: Uuid, canonical: MessageView) -> ApplyOutcome {
        self.pending.remove(&correlation_id);

        if self.position(canonical.id).is_some() {
            if let Some(temp) = self.position(correlation_id) {
                self.messages.remove(temp);
            }
            if let Some(at) = self.position(canonical.id) {
                merge_into(&mut self.messages[at], canonical);
            }
            return ApplyOutcome::Duplicate;
        }

        match self.position(correlation_id) {
            Some(at) => merge_into(&mut self.messages[at], canonical),
            None => self.insert_ordered(canonical),
        }
        ApplyOutcome::Applied
    }

    /// Drops the temp entry and hands back the text. `None` when the send was
    /// already reconciled from the event channel and nothing is rolled back.
    pub fn fail_send(&mut self, correlation_id: Uuid) -> Option<String> {
        match self.pending.remove(&correlation_id) {
            Some(PendingOp::Send { body, .. }) => {
                if let Some(at) = self.position(correlation_id) {
                    self.messages.remove(at);
                }
                Some(body)
            }
            Some(other) => {
                self.pending.insert(correlation_id, other);
                None
            }
            None => None,
        }
    }

    /// Fails every send waiting longer than `window`. Returns the correlation
    /// ids with their original text.
    pub fn expire_pending(&mut self, now: OffsetDateTime, window: Duration) -> Vec<(Uuid, String)> {
        let expired: Vec<Uuid> = self
            .pending
            .iter()
            .filter_map(|(id, op)| match op {
                PendingOp::Send { started_at, .. } if now - *started_at >= window => Some(*id),
                _ => None,
            })
            .collect();

        expired.into_iter().filter_map(|id| self.fail_send(id).map(|body| (id, body))).collect()
    }

    fn begin_mutation(&mut self, message_id: Uuid, apply: impl FnOnce(&mut Self, usize)) -> SyncResult<Uuid> {
        let at = self.position(message_id).ok_or(SyncError::UnknownMessage(message_id))?;
        let snapshot = self.messages[at].clone();
        apply(self, at);
        let correlation_id = Uuid::new_v4();
        self.pending.insert(correlation_id, PendingOp::Mutation { message_id, snapshot });
        Ok(correlation_id)
    }

    /// # Errors
    /// Returns `SyncError::UnknownMessage` if the message is not loaded.
    pub fn begin_edit(&mut self, message_id: Uuid, body: String, now: OffsetDateTime) -> SyncResult<Uuid> {
        self.begin_mutation(message_id, |session, at| {
            let message = &mut session.messages[at];
            message.body = Some(body);
            message.edited = true;
            message.edited_at = Some(now);
        })
    }

    /// # Errors
    /// Returns `SyncError::UnknownMessage` if the message is not loaded.
    pub fn begin_delete(&mut self, message_id: Uuid, scope: DeleteScope, now: OffsetDateTime) -> SyncResult<Uuid> {
        self.begin_mutation(message_id, |session, at| match scope {
            DeleteScope::ForEveryone => {
                let message = &mut session.messages[at];
                message.deleted = true;
                message.body = None;
                message.deleted_at = Some(now);
                message.pin = None;
            }
            DeleteScope::ForMe => {
                session.messages.remove(at);
            }
        })
    }

    /// # Errors
    /// Returns `SyncError::UnknownMessage` if the message is not loaded.
    pub fn begin_star(&mut self, message_id: Uuid, starred: bool) -> SyncResult<Uuid> {
        self.begin_mutation(message_id, |session, at| session.messages[at].starred = starred)
    }

    /// # Errors
    /// Returns `SyncError::UnknownMessage` if the message is not loaded.
    pub fn begin_pin(
        &mut self,
        message_id: Uuid,
        duration: Option<PinDuration>,
        now: OffsetDateTime,
    ) -> SyncResult<Uuid> {
        let viewer = self.viewer;
        self.begin_mutation(message_id, |session, at| {
            session.messages[at].pin = duration.map(|d| Pin::new(viewer, d, now));
        })
    }

    /// Settles a mutation. `canonical` is the server's record when the call returns one.
    pub fn confirm(&mut self, correlation_id: Uuid, canonical: Option<MessageView>) -> ApplyOutcome {
        if self.pending.remove(&correlation_id).is_none() {
            return ApplyOutcome::Ignored;
        }
        match canonical {
            Some(view) => match self.position(view.id) {
                Some(at) => {
                    merge_into(&mut self.messages[at], view);
                    ApplyOutcome::Applied
                }
                None => ApplyOutcome::Ignored,
            },
            None => ApplyOutcome::Applied,
        }
    }

    /// Restores the snapshot taken right before the mutation.
    pub fn rollback(&mut self, correlation_id: Uuid) -> bool {
        let Some(PendingOp::Mutation { message_id, snapshot }) = self.pending.remove(&correlation_id) else {
            return false;
        };
        match self.position(message_id) {
            Some(at) => self.messages[at] = snapshot,
            None => self.insert_ordered(snapshot),
        }
        true
    }

    /// Merges a gateway frame. Frames for other appointments are ignored.
    pub fn apply_frame(&mut self, frame: &ServerFrame) -> ApplyOutcome {
        match frame {
            ServerFrame::MessageCreated(view) if view.appointment_id == self.appointment_id => {
                self.upsert(view.as_ref().clone(), true)
            }
            ServerFrame::MessageUpdated(view) if view.appointment_id == self.appointment_id => {
                self.upsert(view.as_ref().clone(), false)
            }
            ServerFrame::MessageHidden { appointment_id, message_id } if *appointment_id == self.appointment_id => {
                match self.position(*message_id) {
                    Some(at) => {
                        self.messages.remove(at);
                        ApplyOutcome::Applied
                    }
                    None => ApplyOutcome::Ignored,
                }
            }
            ServerFrame::ReceiptUpdated(update) if update.appointment_id == self.appointment_id => {
                self.apply_receipt(update)
            }
            ServerFrame::ChatReset { appointment_id, .. } if *appointment_id == self.appointment_id => {
                let pending = &self.pending;
                self.messages.retain(|m| matches!(pending.get(&m.id), Some(PendingOp::Send { .. })));
                ApplyOutcome::Applied
            }
            _ => ApplyOutcome::Ignored,
        }
    }

    fn upsert(&mut self, view: MessageView, created: bool) -> ApplyOutcome {
        if let Some(at) = self.position(view.id) {
            merge_into(&mut self.messages[at], view);
            return if created { ApplyOutcome::Duplicate } else { ApplyOutcome::Applied };
        }

        if let Some(correlation_id) = view.client_message_id
            && let Some(at) = self.position(correlation_id)
        {
            self.pending.remove(&correlation_id);
            merge_into(&mut self.messages[at], view);
            return ApplyOutcome::Applied;
        }

        self.insert_ordered(view);
        ApplyOutcome::Applied
    }

    pub fn apply_receipt(&mut self, update: &ReceiptUpdate) -> ApplyOutcome {
        let mut changed = false;
        for message in self.messages.iter_mut().filter(|m| update.message_ids.contains(&m.id)) {
            let status = message.delivery_status.merge(update.status);
            if status != message.delivery_status {
                message.delivery_status = status;
                changed = true;
            }
            if update.status == DeliveryStatus::Read && !message.read_by.contains(&update.reader_id) {
                message.read_by.push(update.reader_id);
                changed = true;
            }
        }
        if changed { ApplyOutcome::Applied } else { ApplyOutcome::Ignored }
    }

    /// Whether anything from the other side is still unread by the viewer.
    #[must_use]
    pub fn has_unread(&self) -> bool {
        self.messages.iter().any(|m| m.sender_id != self.viewer && !m.read_by.contains(&self.viewer))
    }

    #[must_use]
    pub fn active_pins(&self, now: OffsetDateTime) -> Vec<&MessageView> {
        self.messages.iter().filter(|m| m.pin.is_some_and(|p| p.is_active(now))).collect()
    }

    #[must_use]
    pub const fn viewer(&self) -> Uuid {
        self.viewer
    }
}
