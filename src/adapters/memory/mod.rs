use crate::domain::appointment::Appointment;
use crate::domain::message::{Message, Pin};
use crate::domain::report::Report;
use crate::domain::user::{Listing, User};
use crate::error::{AppError, Result};
use crate::storage::{AppointmentRepository, ListingRepository, MessageRepository, ReportRepository, UserRepository};
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    listings: HashMap<Uuid, Listing>,
    appointments: HashMap<Uuid, Appointment>,
    messages: HashMap<Uuid, Message>,
    reports: Vec<Report>,
}

impl MemoryState {
    fn has_other_active(&self, candidate: &Appointment) -> bool {
        candidate.is_active_for_duplicates()
            && self.appointments.values().any(|a| {
                a.id != candidate.id
                    && a.requester_id == candidate.requester_id
                    && a.listing_id == candidate.listing_id
                    && a.is_active_for_duplicates()
            })
    }

    fn message_mut(&mut self, id: Uuid) -> Result<&mut Message> {
        self.messages.get_mut(&id).ok_or(AppError::NotFound)
    }
}

/// In-process store behind every repository trait. A single lock serializes
/// writers, which gives each call the atomicity the SQL adapter gets from
/// single statements and transactions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, user: &User) -> Result<()> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(AppError::Conflict("Username already exists".into()));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.state.read().await.users.values().find(|u| u.username == username).cloned())
    }

    async fn soft_delete(&self, id: Uuid, at: OffsetDateTime) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.users.get_mut(&id) {
            Some(user) if user.deleted_at.is_none() => {
                user.deleted_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_admin(&self, user: &User) -> Result<User> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.users.values_mut().find(|u| u.username == user.username) {
            existing.is_admin = true;
            existing.password_hash.clone_from(&user.password_hash);
            existing.deleted_at = None;
            return Ok(existing.clone());
        }
        state.users.insert(user.id, user.clone());
        Ok(user.clone())
    }
}

#[async_trait]
impl ListingRepository for MemoryStore {
    async fn create(&self, listing: &Listing) -> Result<()> {
        self.state.write().await.listings.insert(listing.id, listing.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Listing>> {
        Ok(self.state.read().await.listings.get(&id).cloned())
    }
}

#[async_trait]
impl AppointmentRepository for MemoryStore {
    async fn insert(&self, appointment: &Appointment) -> Result<()> {
        let mut state = self.state.write().await;
        if state.has_other_active(appointment) {
            return Err(AppError::DuplicateActive);
        }
        state.appointments.insert(appointment.id, appointment.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Appointment>> {
        Ok(self.state.read().await.appointments.get(&id).cloned())
    }

    async fn update(&self, appointment: &Appointment) -> Result<Appointment> {
        let mut state = self.state.write().await;
        let stored_version = state.appointments.get(&appointment.id).ok_or(AppError::NotFound)?.version;
        if stored_version != appointment.version {
            return Err(AppError::StaleVersion);
        }
        if state.has_other_active(appointment) {
            return Err(AppError::DuplicateActive);
        }

        let mut next = appointment.clone();
        next.version += 1;
        state.appointments.insert(next.id, next.clone());
        Ok(next)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Appointment>> {
        let state = self.state.read().await;
        let mut list: Vec<_> = state.appointments.values().filter(|a| a.is_participant(user_id)).cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(list)
    }

    async fn list_all(&self) -> Result<Vec<Appointment>> {
        let state = self.state.read().await;
        let mut list: Vec<_> = state.appointments.values().cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(list)
    }

    async fn reset_chat(&self, appointment: &Appointment) -> Result<Appointment> {
        let mut state = self.state.write().await;
        let stored_version = state.appointments.get(&appointment.id).ok_or(AppError::NotFound)?.version;
        if stored_version != appointment.version {
            return Err(AppError::StaleVersion);
        }

        let mut next = appointment.clone();
        next.chat_lock = None;
        next.version += 1;
        state.messages.retain(|_, m| m.appointment_id != appointment.id);
        state.appointments.insert(next.id, next.clone());
        Ok(next)
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn create(&self, message: &Message) -> Result<(Message, bool)> {
        let mut state = self.state.write().await;
        if let Some(client_id) = message.client_message_id
            && let Some(existing) = state
                .messages
                .values()
                .find(|m| m.sender_id == message.sender_id && m.client_message_id == Some(client_id))
        {
            return Ok((existing.clone(), false));
        }
        state.messages.insert(message.id, message.clone());
        Ok((message.clone(), true))
    }

    async fn find(&self, id: Uuid) -> Result<Option<Message>> {
        Ok(self.state.read().await.messages.get(&id).cloned())
    }

    async fn list_for_appointment(&self, appointment_id: Uuid) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        let mut list: Vec<_> = state.messages.values().filter(|m| m.appointment_id == appointment_id).cloned().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(list)
    }

    async fn update_body(&self, id: Uuid, body: &str, edited_at: OffsetDateTime) -> Result<Option<Message>> {
        let mut state = self.state.write().await;
        let stored = state.message_mut(id)?;
        if stored.deleted {
            return Ok(None);
        }
        body.clone_into(&mut stored.body);
        stored.edited = true;
        stored.edited_at = Some(edited_at);
        Ok(Some(stored.clone()))
    }

    async fn tombstone(&self, id: Uuid, deleted_by: Uuid, at: OffsetDateTime) -> Result<Option<Message>> {
        let mut state = self.state.write().await;
        let stored = state.message_mut(id)?;
        if stored.deleted {
            return Ok(None);
        }
        stored.preserved_original_body = Some(std::mem::take(&mut stored.body));
        stored.deleted = true;
        stored.deleted_by = Some(deleted_by);
        stored.deleted_at = Some(at);
        stored.pin = None;
        Ok(Some(stored.clone()))
    }

    async fn set_pin(&self, id: Uuid, pin: Option<Pin>) -> Result<bool> {
        let mut state = self.state.write().await;
        let stored = state.message_mut(id)?;
        if pin.is_some() && stored.deleted {
            return Ok(false);
        }
        stored.pin = pin;
        Ok(true)
    }

    async fn add_removed_for(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        Ok(self.state.write().await.message_mut(id)?.apply_remove_for(user_id))
    }

    async fn set_starred(&self, id: Uuid, user_id: Uuid, starred: bool) -> Result<bool> {
        Ok(self.state.write().await.message_mut(id)?.apply_star(user_id, starred))
    }

    async fn mark_delivered(&self, appointment_id: Uuid, reader: Uuid, ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let mut state = self.state.write().await;
        let mut changed = Vec::new();
        for id in ids {
            if let Some(msg) = state.messages.get_mut(id)
                && msg.appointment_id == appointment_id
                && msg.apply_delivered(reader)
            {
                changed.push(*id);
            }
        }
        Ok(changed)
    }

    async fn mark_read(&self, appointment_id: Uuid, reader: Uuid) -> Result<Vec<Uuid>> {
        let mut state = self.state.write().await;
        let mut changed: Vec<_> = state
            .messages
            .values_mut()
            .filter(|m| m.appointment_id == appointment_id)
            .filter_map(|m| m.apply_read(reader).then_some((m.created_at, m.id)))
            .collect();
        changed.sort();
        Ok(changed.into_iter().map(|(_, id)| id).collect())
    }
}

#[async_trait]
impl ReportRepository for MemoryStore {
    async fn create(&self, report: &Report) -> Result<()> {
        self.state.write().await.reports.push(report.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Report>> {
        let mut reports = self.state.read().await.reports.clone();
        reports.reverse();
        Ok(reports)
    }
}
