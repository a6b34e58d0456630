use crate::domain::appointment::{
    ActorRole, Appointment, AppointmentStatus, NewAppointment, Schedule, TransitionOutcome, TransitionRequest,
};
use crate::domain::event::BusEvent;
use crate::domain::user::Actor;
use crate::error::{AppError, Result};
use crate::services::event_bus::EventBus;
use crate::storage::{AppointmentRepository, ListingRepository, UserRepository};
use backon::{ExponentialBuilder, Retryable};
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

const MAX_PURPOSE_LENGTH: usize = 500;

#[derive(Clone, Debug)]
struct Metrics {
    created_total: Counter<u64>,
    transitions_total: Counter<u64>,
    stale_retries_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("rendezvous-server");
        Self {
            created_total: meter
                .u64_counter("rendezvous_appointments_created_total")
                .with_description("Total number of appointments requested")
                .build(),
            transitions_total: meter
                .u64_counter("rendezvous_appointment_transitions_total")
                .with_description("Appointment status changes by target status")
                .build(),
            stale_retries_total: meter
                .u64_counter("rendezvous_appointment_stale_retries_total")
                .with_description("Appointment writes retried after a concurrent modification")
                .build(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateAppointment {
    pub listing_id: Uuid,
    pub schedule: Schedule,
    pub purpose: String,
    pub message: Option<String>,
}

/// Who hears about a successful appointment write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Audience {
    /// Both parties, the appointment channel and the admin feed.
    Everyone,
    /// Only the caller's own sessions.
    Caller,
}

#[derive(Clone, Debug)]
pub struct AppointmentService {
    appointments: Arc<dyn AppointmentRepository>,
    listings: Arc<dyn ListingRepository>,
    users: Arc<dyn UserRepository>,
    bus: EventBus,
    retry: ExponentialBuilder,
    metrics: Metrics,
}

impl AppointmentService {
    #[must_use]
    pub fn new(
        appointments: Arc<dyn AppointmentRepository>,
        listings: Arc<dyn ListingRepository>,
        users: Arc<dyn UserRepository>,
        bus: EventBus,
    ) -> Self {
        let retry = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(200))
            .with_max_times(5)
            .with_jitter();
        Self { appointments, listings, users, bus, retry, metrics: Metrics::new() }
    }

    async fn user_active(&self, user_id: Uuid) -> Result<bool> {
        Ok(self.users.find_by_id(user_id).await?.is_some_and(|u| u.is_active()))
    }

    #[tracing::instrument(
        skip(self, actor, req),
        fields(user_id = %actor.user_id, listing_id = %req.listing_id, appointment_id = tracing::field::Empty),
        err(level = "warn")
    )]
    pub async fn create(&self, actor: &Actor, req: CreateAppointment) -> Result<Appointment> {
        let purpose = req.purpose.trim().to_string();
        if purpose.is_empty() || purpose.chars().count() > MAX_PURPOSE_LENGTH {
            return Err(AppError::BadRequest(format!("Purpose must be between 1 and {MAX_PURPOSE_LENGTH} characters")));
        }

        let now = OffsetDateTime::now_utc();
        if req.schedule.at() < now {
            return Err(AppError::BadRequest("Appointment must be scheduled in the future".into()));
        }

        let listing = self.listings.find(req.listing_id).await?.ok_or(AppError::NotFound)?;
        if listing.owner_id == actor.user_id {
            return Err(AppError::BadRequest("You cannot book your own listing".into()));
        }
        if !self.user_active(listing.owner_id).await? {
            return Err(AppError::CounterpartyMissing);
        }

        let appointment = Appointment::new(
            NewAppointment {
                requester_id: actor.user_id,
                responder_id: listing.owner_id,
                listing_id: listing.id,
                schedule: req.schedule,
                purpose,
                message: req.message.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()),
            },
            now,
        );
        self.appointments.insert(&appointment).await?;

        tracing::Span::current().record("appointment_id", tracing::field::display(appointment.id));
        tracing::info!("Appointment requested");
        self.metrics.created_total.add(1, &[]);
        self.bus.announce_appointment(Arc::new(appointment.clone()));

        Ok(appointment)
    }

    /// Loads an appointment the actor may see, together with the actor's role in it.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if it does not exist or is hidden from the actor.
    pub async fn authorize(&self, actor: &Actor, id: Uuid) -> Result<(Appointment, ActorRole)> {
        let appointment = self.appointments.find(id).await?.ok_or(AppError::NotFound)?;
        let role = appointment.require_role(actor)?;
        Ok((appointment, role))
    }

    pub async fn get(&self, actor: &Actor, id: Uuid) -> Result<Appointment> {
        self.authorize(actor, id).await.map(|(appointment, _)| appointment)
    }

    /// The caller's own table, or every appointment for admins.
    #[tracing::instrument(level = "debug", skip(self, actor), fields(user_id = %actor.user_id))]
    pub async fn list(&self, actor: &Actor) -> Result<Vec<Appointment>> {
        if actor.is_admin {
            return self.appointments.list_all().await;
        }
        let mut list = self.appointments.list_for_user(actor.user_id).await?;
        list.retain(|a| a.is_visible_to(actor));
        Ok(list)
    }

    /// Reads, validates and writes an appointment under optimistic concurrency.
    /// A stale write is retried from a fresh read, so a transition that stopped
    /// being valid in the meantime fails instead of being reordered.
    async fn write<F>(&self, actor: &Actor, id: Uuid, apply: F) -> Result<(Appointment, bool)>
    where
        F: Fn(&mut Appointment, ActorRole, OffsetDateTime) -> Result<TransitionOutcome> + Send + Sync,
    {
        let apply = &apply;
        (|| async move {
            let (mut appointment, role) = self.authorize(actor, id).await?;
            if !apply(&mut appointment, role, OffsetDateTime::now_utc())?.changed() {
                return Ok::<_, AppError>((appointment, false));
            }
            let saved = self.appointments.update(&appointment).await?;
            Ok((saved, true))
        })
        .retry(&self.retry)
        .when(|e| matches!(e, AppError::StaleVersion))
        .notify(|_, delay| {
            self.metrics.stale_retries_total.add(1, &[]);
            tracing::debug!(appointment_id = %id, ?delay, "Stale appointment write, retrying");
        })
        .await
    }

    /// [`Self::write`] followed by an announcement when something changed.
    pub(crate) async fn mutate<F>(&self, actor: &Actor, id: Uuid, audience: Audience, apply: F) -> Result<Appointment>
    where
        F: Fn(&mut Appointment, ActorRole, OffsetDateTime) -> Result<TransitionOutcome> + Send + Sync,
    {
        let (appointment, changed) = self.write(actor, id, apply).await?;
        if changed {
            self.publish(&appointment, actor, audience);
        }
        Ok(appointment)
    }

    pub(crate) fn publish(&self, appointment: &Appointment, actor: &Actor, audience: Audience) {
        let shared = Arc::new(appointment.clone());
        match audience {
            Audience::Everyone => self.bus.announce_appointment(shared),
            Audience::Caller => self.bus.publish_to_user(actor.user_id, BusEvent::AppointmentUpdated(shared)),
        }
    }

    /// Clears the lock and purges the chat atomically, retrying stale versions.
    pub(crate) async fn reset_chat(&self, actor: &Actor, id: Uuid) -> Result<Appointment> {
        (|| async move {
            let (appointment, _) = self.authorize(actor, id).await?;
            self.appointments.reset_chat(&appointment).await
        })
        .retry(&self.retry)
        .when(|e| matches!(e, AppError::StaleVersion))
        .await
    }

    #[tracing::instrument(
        skip(self, actor, reason),
        fields(user_id = %actor.user_id, target = %target),
        err(level = "warn")
    )]
    pub async fn transition(
        &self,
        actor: &Actor,
        id: Uuid,
        target: AppointmentStatus,
        reason: Option<String>,
    ) -> Result<Appointment> {
        self.transition_with(actor, id, target, reason, None).await
    }

    /// Moves a cancelled appointment back to pending, optionally at a new date and time.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn reinitiate(&self, actor: &Actor, id: Uuid, reschedule: Option<Schedule>) -> Result<Appointment> {
        self.transition_with(actor, id, AppointmentStatus::Pending, None, reschedule).await
    }

    async fn transition_with(
        &self,
        actor: &Actor,
        id: Uuid,
        target: AppointmentStatus,
        reason: Option<String>,
        reschedule: Option<Schedule>,
    ) -> Result<Appointment> {
        let parties_present = if target == AppointmentStatus::Pending {
            let (appointment, _) = self.authorize(actor, id).await?;
            self.user_active(appointment.requester_id).await? && self.user_active(appointment.responder_id).await?
        } else {
            true
        };

        let (appointment, changed) = self
            .write(actor, id, |appointment, role, now| {
                appointment.apply_transition(
                    TransitionRequest { role, target, reason: reason.clone(), reschedule, parties_present },
                    now,
                )
            })
            .await?;

        if changed {
            self.metrics.transitions_total.add(1, &[KeyValue::new("to", target.as_str())]);
            tracing::info!(to = %target, "Appointment status changed");
            self.publish(&appointment, actor, Audience::Everyone);
        }
        Ok(appointment)
    }

    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn set_archived(&self, actor: &Actor, id: Uuid, archived: bool) -> Result<Appointment> {
        self.mutate(actor, id, Audience::Everyone, |appointment, _, now| Ok(appointment.set_archived(archived, now)))
            .await
    }

    /// Hides a finished or outdated appointment from the caller's table.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn remove_from_view(&self, actor: &Actor, id: Uuid) -> Result<Appointment> {
        self.mutate(actor, id, Audience::Caller, |appointment, role, now| appointment.remove_from_view(role, now))
            .await
    }

    /// Moves the caller's clear-chat watermark to now and returns it.
    #[tracing::instrument(skip(self, actor), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn clear_chat(&self, actor: &Actor, id: Uuid) -> Result<OffsetDateTime> {
        let appointment = self
            .mutate(actor, id, Audience::Caller, |appointment, _, now| {
                appointment.clear_chat_for(actor.user_id, now)?;
                Ok(TransitionOutcome::Changed)
            })
            .await?;
        appointment.chat_cleared_at(actor.user_id).ok_or(AppError::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventBusConfig;
    use crate::domain::user::{Listing, User};
    use crate::storage::Storage;

    struct Fixture {
        service: AppointmentService,
        storage: Storage,
        bus: EventBus,
        requester: Actor,
        responder: Actor,
        admin: Actor,
        listing_id: Uuid,
    }

    async fn add_user(storage: &Storage, name: &str, is_admin: bool) -> Actor {
        let user = User {
            id: Uuid::new_v4(),
            username: name.into(),
            password_hash: String::new(),
            is_admin,
            created_at: OffsetDateTime::now_utc(),
            deleted_at: None,
        };
        storage.users.create(&user).await.unwrap();
        Actor { user_id: user.id, is_admin }
    }

    async fn fixture() -> Fixture {
        let storage = Storage::in_memory();
        let bus = EventBus::new(&EventBusConfig::default());
        let requester = add_user(&storage, "requester", false).await;
        let responder = add_user(&storage, "responder", false).await;
        let admin = add_user(&storage, "admin", true).await;
        let listing = Listing {
            id: Uuid::new_v4(),
            owner_id: responder.user_id,
            title: "Flat".into(),
            created_at: OffsetDateTime::now_utc(),
        };
        storage.listings.create(&listing).await.unwrap();

        let service = AppointmentService::new(
            Arc::clone(&storage.appointments),
            Arc::clone(&storage.listings),
            Arc::clone(&storage.users),
            bus.clone(),
        );
        Fixture { service, storage, bus, requester, responder, admin, listing_id: listing.id }
    }

    fn tomorrow() -> Schedule {
        let at = OffsetDateTime::now_utc() + time::Duration::days(1);
        Schedule { date: at.date(), time: time::Time::from_hms(at.hour(), 0, 0).unwrap() }
    }

    fn request(listing_id: Uuid) -> CreateAppointment {
        CreateAppointment { listing_id, schedule: tomorrow(), purpose: "Viewing".into(), message: None }
    }

    #[tokio::test]
    async fn test_create_validates_listing_owner_and_purpose() {
        let f = fixture().await;

        let own = f.service.create(&f.responder, request(f.listing_id)).await;
        assert!(matches!(own, Err(AppError::BadRequest(_))));

        let blank = CreateAppointment { purpose: "  ".into(), ..request(f.listing_id) };
        assert!(matches!(f.service.create(&f.requester, blank).await, Err(AppError::BadRequest(_))));

        let missing = f.service.create(&f.requester, request(Uuid::new_v4())).await;
        assert!(matches!(missing, Err(AppError::NotFound)));

        f.service.create(&f.requester, request(f.listing_id)).await.unwrap();
        let dup = f.service.create(&f.requester, request(f.listing_id)).await;
        assert!(matches!(dup, Err(AppError::DuplicateActive)));
    }

    #[tokio::test]
    async fn test_transition_announces_to_both_parties_and_admin() {
        let f = fixture().await;
        let appt = f.service.create(&f.requester, request(f.listing_id)).await.unwrap();

        let mut requester_feed = f.bus.subscribe_user(f.requester.user_id);
        let mut admin_feed = f.bus.subscribe_admin();

        let accepted =
            f.service.transition(&f.responder, appt.id, AppointmentStatus::Accepted, None).await.unwrap();
        assert_eq!(accepted.status, AppointmentStatus::Accepted);
        assert_eq!(accepted.version, 1);

        assert!(matches!(requester_feed.recv().await.unwrap(), BusEvent::AppointmentUpdated(a) if a.id == appt.id));
        assert!(matches!(admin_feed.recv().await.unwrap(), BusEvent::AppointmentUpdated(_)));

        let again = f.service.transition(&f.responder, appt.id, AppointmentStatus::Accepted, None).await.unwrap();
        assert_eq!(again.version, 1);
        assert!(requester_feed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transition_errors() {
        let f = fixture().await;
        let appt = f.service.create(&f.requester, request(f.listing_id)).await.unwrap();

        let skip = f.service.transition(&f.responder, appt.id, AppointmentStatus::Completed, None).await;
        assert!(matches!(skip, Err(AppError::InvalidTransition { .. })));

        let wrong_role = f.service.transition(&f.requester, appt.id, AppointmentStatus::Accepted, None).await;
        assert!(matches!(wrong_role, Err(AppError::Unauthorized(_))));

        let no_reason = f.service.transition(&f.admin, appt.id, AppointmentStatus::DeletedByAdmin, None).await;
        assert!(matches!(no_reason, Err(AppError::ReasonRequired)));

        let stranger = Actor::user(Uuid::new_v4());
        let hidden = f.service.transition(&stranger, appt.id, AppointmentStatus::Accepted, None).await;
        assert!(matches!(hidden, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn test_reinitiation_requires_both_parties() {
        let f = fixture().await;
        let appt = f.service.create(&f.requester, request(f.listing_id)).await.unwrap();
        f.service.transition(&f.responder, appt.id, AppointmentStatus::Accepted, None).await.unwrap();
        f.service
            .transition(&f.requester, appt.id, AppointmentStatus::CancelledByRequester, None)
            .await
            .unwrap();

        f.storage.users.soft_delete(f.responder.user_id, OffsetDateTime::now_utc()).await.unwrap();

        let err = f.service.reinitiate(&f.requester, appt.id, None).await.unwrap_err();
        assert!(matches!(err, AppError::CounterpartyMissing));
    }

    #[tokio::test]
    async fn test_reinitiation_budget_is_two() {
        let f = fixture().await;
        let appt = f.service.create(&f.requester, request(f.listing_id)).await.unwrap();

        for _ in 0..2 {
            f.service.transition(&f.responder, appt.id, AppointmentStatus::Accepted, None).await.unwrap();
            f.service
                .transition(&f.requester, appt.id, AppointmentStatus::CancelledByRequester, None)
                .await
                .unwrap();
            f.service.reinitiate(&f.requester, appt.id, Some(tomorrow())).await.unwrap();
        }

        f.service.transition(&f.responder, appt.id, AppointmentStatus::Accepted, None).await.unwrap();
        f.service
            .transition(&f.requester, appt.id, AppointmentStatus::CancelledByRequester, None)
            .await
            .unwrap();
        let err = f.service.reinitiate(&f.requester, appt.id, None).await.unwrap_err();
        assert!(matches!(err, AppError::ReinitiationExhausted));
    }

    #[tokio::test]
    async fn test_remove_from_view_hides_only_for_caller() {
        let f = fixture().await;
        let appt = f.service.create(&f.requester, request(f.listing_id)).await.unwrap();

        let open = f.service.remove_from_view(&f.requester, appt.id).await;
        assert!(matches!(open, Err(AppError::Conflict(_))));

        f.service.transition(&f.responder, appt.id, AppointmentStatus::Rejected, None).await.unwrap();
        f.service.remove_from_view(&f.requester, appt.id).await.unwrap();

        assert!(f.service.list(&f.requester).await.unwrap().is_empty());
        assert_eq!(f.service.list(&f.responder).await.unwrap().len(), 1);
        assert_eq!(f.service.list(&f.admin).await.unwrap().len(), 1);
        assert!(matches!(f.service.get(&f.requester, appt.id).await, Err(AppError::NotFound)));
    }

    #[tokio::test]
    async fn test_clear_chat_watermark_is_per_user_and_monotonic() {
        let f = fixture().await;
        let appt = f.service.create(&f.requester, request(f.listing_id)).await.unwrap();

        let first = f.service.clear_chat(&f.requester, appt.id).await.unwrap();
        let second = f.service.clear_chat(&f.requester, appt.id).await.unwrap();
        assert!(second >= first);

        let stored = f.service.get(&f.responder, appt.id).await.unwrap();
        assert_eq!(stored.chat_cleared_at(f.responder.user_id), None);
        assert_eq!(stored.chat_cleared_at(f.requester.user_id), Some(second));
    }
}
