use crate::domain::chat_lock::ChatLock;
use crate::domain::user::Actor;
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};
use uuid::Uuid;

time::serde::format_description!(pub date_format, Date, "[year]-[month]-[day]");
time::serde::format_description!(pub time_format, Time, "[hour]:[minute]");

/// Reinitiation credits available to each party over the life of an appointment.
pub const MAX_REINITIATIONS: i16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppointmentStatus {
    Pending,
    Accepted,
    Rejected,
    CancelledByRequester,
    CancelledByResponder,
    CancelledByAdmin,
    Completed,
    NoShow,
    DeletedByAdmin,
}

impl AppointmentStatus {
    pub const ALL: [Self; 9] = [
        Self::Pending,
        Self::Accepted,
        Self::Rejected,
        Self::CancelledByRequester,
        Self::CancelledByResponder,
        Self::CancelledByAdmin,
        Self::Completed,
        Self::NoShow,
        Self::DeletedByAdmin,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::CancelledByRequester => "cancelledByRequester",
            Self::CancelledByResponder => "cancelledByResponder",
            Self::CancelledByAdmin => "cancelledByAdmin",
            Self::Completed => "completed",
            Self::NoShow => "noShow",
            Self::DeletedByAdmin => "deletedByAdmin",
        }
    }

    /// Pending and accepted appointments are still in negotiation.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }

    const fn requires_reason(self) -> bool {
        matches!(self, Self::CancelledByResponder | Self::CancelledByAdmin | Self::DeletedByAdmin)
    }

    /// Targets that may not be reached once the scheduled time has passed.
    const fn blocked_when_outdated(self) -> bool {
        matches!(
            self,
            Self::Pending
                | Self::Accepted
                | Self::Rejected
                | Self::CancelledByRequester
                | Self::CancelledByResponder
                | Self::CancelledByAdmin
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            "cancelledByRequester" => Ok(Self::CancelledByRequester),
            "cancelledByResponder" => Ok(Self::CancelledByResponder),
            "cancelledByAdmin" => Ok(Self::CancelledByAdmin),
            "completed" => Ok(Self::Completed),
            "noShow" => Ok(Self::NoShow),
            "deletedByAdmin" => Ok(Self::DeletedByAdmin),
            other => Err(format!("unknown appointment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActorRole {
    Requester,
    Responder,
    Admin,
}

impl ActorRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requester => "requester",
            Self::Responder => "responder",
            Self::Admin => "admin",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "requester" => Ok(Self::Requester),
            "responder" => Ok(Self::Responder),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Roles allowed to take the edge `from -> to`, or `None` if the edge does not exist.
fn permitted_roles(from: AppointmentStatus, to: AppointmentStatus) -> Option<&'static [ActorRole]> {
    use ActorRole as R;
    use AppointmentStatus as S;

    match (from, to) {
        (S::Pending, S::Accepted | S::Rejected) | (S::Accepted, S::CancelledByResponder) => Some(&[R::Responder]),
        (S::Accepted, S::CancelledByRequester) => Some(&[R::Requester]),
        (S::Accepted, S::Completed | S::NoShow) => Some(&[R::Responder, R::Admin]),
        (S::Pending | S::Accepted, S::CancelledByAdmin) => Some(&[R::Admin]),
        (S::CancelledByRequester, S::Pending) => Some(&[R::Requester, R::Admin]),
        (S::CancelledByResponder, S::Pending) => Some(&[R::Responder, R::Admin]),
        (from, S::DeletedByAdmin) if from != S::DeletedByAdmin => Some(&[R::Admin]),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub date: Date,
    pub time: Time,
}

impl Schedule {
    #[must_use]
    pub const fn at(&self) -> OffsetDateTime {
        PrimitiveDateTime::new(self.date, self.time).assume_utc()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Changed,
    Unchanged,
}

impl TransitionOutcome {
    #[must_use]
    pub const fn changed(self) -> bool {
        matches!(self, Self::Changed)
    }
}

#[derive(Debug, Clone)]
pub struct TransitionRequest {
    pub role: ActorRole,
    pub target: AppointmentStatus,
    pub reason: Option<String>,
    /// Only meaningful for reinitiation (`target == Pending`).
    pub reschedule: Option<Schedule>,
    /// Whether both requester and responder accounts still exist.
    pub parties_present: bool,
}

#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub requester_id: Uuid,
    pub responder_id: Uuid,
    pub listing_id: Uuid,
    pub schedule: Schedule,
    pub purpose: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appointment {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub responder_id: Uuid,
    pub listing_id: Uuid,
    pub date: Date,
    pub time: Time,
    pub purpose: String,
    pub message: Option<String>,
    pub status: AppointmentStatus,
    pub cancel_reason: Option<String>,
    pub admin_reason: Option<String>,
    pub requester_reinitiation_count: i16,
    pub responder_reinitiation_count: i16,
    pub archived: bool,
    pub archived_at: Option<OffsetDateTime>,
    pub visible_to_requester: bool,
    pub visible_to_responder: bool,
    pub chat_lock: Option<ChatLock>,
    pub requester_chat_cleared_at: Option<OffsetDateTime>,
    pub responder_chat_cleared_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub version: i64,
}

impl Appointment {
    #[must_use]
    pub fn new(new: NewAppointment, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::now_v7(),
            requester_id: new.requester_id,
            responder_id: new.responder_id,
            listing_id: new.listing_id,
            date: new.schedule.date,
            time: new.schedule.time,
            purpose: new.purpose,
            message: new.message,
            status: AppointmentStatus::Pending,
            cancel_reason: None,
            admin_reason: None,
            requester_reinitiation_count: 0,
            responder_reinitiation_count: 0,
            archived: false,
            archived_at: None,
            visible_to_requester: true,
            visible_to_responder: true,
            chat_lock: None,
            requester_chat_cleared_at: None,
            responder_chat_cleared_at: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    #[must_use]
    pub const fn schedule(&self) -> Schedule {
        Schedule { date: self.date, time: self.time }
    }

    #[must_use]
    pub fn is_outdated(&self, now: OffsetDateTime) -> bool {
        self.schedule().at() < now
    }

    /// Participant roles take precedence over the admin flag.
    #[must_use]
    pub fn role_of(&self, actor: &Actor) -> Option<ActorRole> {
        if actor.user_id == self.requester_id {
            Some(ActorRole::Requester)
        } else if actor.user_id == self.responder_id {
            Some(ActorRole::Responder)
        } else if actor.is_admin {
            Some(ActorRole::Admin)
        } else {
            None
        }
    }

    /// Resolves the caller's role, hiding the appointment from strangers.
    ///
    /// # Errors
    /// Returns `AppError::NotFound` if the actor is neither a participant nor an admin,
    /// or is a participant who removed the appointment from view.
    pub fn require_role(&self, actor: &Actor) -> Result<ActorRole> {
        match self.role_of(actor) {
            Some(role) if self.is_visible_to_role(role) => Ok(role),
            _ => Err(AppError::NotFound),
        }
    }

    #[must_use]
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        user_id == self.requester_id || user_id == self.responder_id
    }

    #[must_use]
    pub fn counterpart_of(&self, user_id: Uuid) -> Option<Uuid> {
        if user_id == self.requester_id {
            Some(self.responder_id)
        } else if user_id == self.responder_id {
            Some(self.requester_id)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn is_visible_to_role(&self, role: ActorRole) -> bool {
        match role {
            ActorRole::Requester => self.visible_to_requester,
            ActorRole::Responder => self.visible_to_responder,
            ActorRole::Admin => true,
        }
    }

    #[must_use]
    pub fn is_visible_to(&self, actor: &Actor) -> bool {
        self.role_of(actor).is_some_and(|role| self.is_visible_to_role(role))
    }

    #[must_use]
    pub fn is_chat_writable(&self, now: OffsetDateTime) -> bool {
        self.status != AppointmentStatus::DeletedByAdmin && !self.is_outdated(now)
    }

    #[must_use]
    pub fn chat_cleared_at(&self, user_id: Uuid) -> Option<OffsetDateTime> {
        if user_id == self.requester_id {
            self.requester_chat_cleared_at
        } else if user_id == self.responder_id {
            self.responder_chat_cleared_at
        } else {
            None
        }
    }

    /// Moves the caller's clear-chat watermark forward. It never moves back.
    ///
    /// # Errors
    /// Returns `AppError::Unauthorized` for non-participants.
    pub fn clear_chat_for(&mut self, user_id: Uuid, now: OffsetDateTime) -> Result<OffsetDateTime> {
        let slot = if user_id == self.requester_id {
            &mut self.requester_chat_cleared_at
        } else if user_id == self.responder_id {
            &mut self.responder_chat_cleared_at
        } else {
            return Err(AppError::Unauthorized("only participants have a chat history to clear".into()));
        };

        let watermark = slot.map_or(now, |prev| prev.max(now));
        *slot = Some(watermark);
        Ok(watermark)
    }

    /// Applies a status change after validating edge, role, reason and schedule.
    ///
    /// # Errors
    /// `InvalidTransition` for a missing edge, `Unauthorized` for a forbidden actor,
    /// `ReasonRequired`, `ReinitiationExhausted`, `CounterpartyMissing`, and
    /// `Conflict` when the appointment is outdated.
    pub fn apply_transition(&mut self, req: TransitionRequest, now: OffsetDateTime) -> Result<TransitionOutcome> {
        let from = self.status;
        let target = req.target;

        if target == from && req.reschedule.is_none() {
            let owns_status = AppointmentStatus::ALL
                .into_iter()
                .filter_map(|prior| permitted_roles(prior, target))
                .any(|roles| roles.contains(&req.role));
            if !owns_status {
                return Err(AppError::Unauthorized(format!("{} may not set an appointment to {target}", req.role)));
            }
            return Ok(TransitionOutcome::Unchanged);
        }

        let roles = permitted_roles(from, target)
            .ok_or_else(|| AppError::InvalidTransition { from: from.to_string(), to: target.to_string() })?;

        if !roles.contains(&req.role) {
            return Err(AppError::Unauthorized(format!("{} may not move an appointment from {from} to {target}", req.role)));
        }

        let reason = req.reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        if target.requires_reason() && reason.is_none() {
            return Err(AppError::ReasonRequired);
        }

        if req.reschedule.is_some() && target != AppointmentStatus::Pending {
            return Err(AppError::BadRequest("only reinitiation can reschedule".into()));
        }

        if target == AppointmentStatus::Pending {
            let used = if from == AppointmentStatus::CancelledByRequester {
                self.requester_reinitiation_count
            } else {
                self.responder_reinitiation_count
            };
            if used >= MAX_REINITIATIONS {
                return Err(AppError::ReinitiationExhausted);
            }
            if !req.parties_present {
                return Err(AppError::CounterpartyMissing);
            }
            let schedule = req.reschedule.unwrap_or_else(|| self.schedule());
            if schedule.at() < now {
                return Err(AppError::Conflict("appointment date has passed; reschedule to reinitiate".into()));
            }
        } else if target.blocked_when_outdated() && self.is_outdated(now) {
            return Err(AppError::Conflict("appointment date has passed".into()));
        }

        match target {
            AppointmentStatus::Pending => {
                if from == AppointmentStatus::CancelledByRequester {
                    self.requester_reinitiation_count += 1;
                } else {
                    self.responder_reinitiation_count += 1;
                }
                if let Some(schedule) = req.reschedule {
                    self.date = schedule.date;
                    self.time = schedule.time;
                }
                self.cancel_reason = None;
            }
            AppointmentStatus::CancelledByRequester | AppointmentStatus::CancelledByResponder => {
                self.cancel_reason = reason;
            }
            AppointmentStatus::CancelledByAdmin | AppointmentStatus::DeletedByAdmin => {
                self.admin_reason = reason;
            }
            _ => {}
        }

        self.status = target;
        self.updated_at = now;
        Ok(TransitionOutcome::Changed)
    }

    pub fn set_archived(&mut self, archived: bool, now: OffsetDateTime) -> TransitionOutcome {
        if self.archived == archived {
            return TransitionOutcome::Unchanged;
        }
        self.archived = archived;
        self.archived_at = archived.then_some(now);
        self.updated_at = now;
        TransitionOutcome::Changed
    }

    /// Hides the appointment from the caller's own table. One-way.
    ///
    /// # Errors
    /// `Unauthorized` for admins, `Conflict` while the appointment is still open and upcoming.
    pub fn remove_from_view(&mut self, role: ActorRole, now: OffsetDateTime) -> Result<TransitionOutcome> {
        if self.status.is_open() && !self.is_outdated(now) {
            return Err(AppError::Conflict("only finished or outdated appointments can be removed".into()));
        }

        let flag = match role {
            ActorRole::Requester => &mut self.visible_to_requester,
            ActorRole::Responder => &mut self.visible_to_responder,
            ActorRole::Admin => return Err(AppError::Unauthorized("admins cannot hide appointments".into())),
        };

        if !*flag {
            return Ok(TransitionOutcome::Unchanged);
        }
        *flag = false;
        self.updated_at = now;
        Ok(TransitionOutcome::Changed)
    }

    /// Whether this appointment blocks a new one for the same requester and listing.
    #[must_use]
    pub fn is_active_for_duplicates(&self) -> bool {
        self.status.is_open()
            || (self.status == AppointmentStatus::CancelledByRequester
                && self.requester_reinitiation_count < MAX_REINITIATIONS)
    }

    /// Renders the appointment for one viewer: the lock is reduced to a flag
    /// and only the viewer's own clear-chat watermark is exposed.
    #[must_use]
    pub fn view_for(&self, viewer: &Actor, now: OffsetDateTime) -> AppointmentView {
        AppointmentView {
            id: self.id,
            requester_id: self.requester_id,
            responder_id: self.responder_id,
            listing_id: self.listing_id,
            date: self.date,
            time: self.time,
            purpose: self.purpose.clone(),
            message: self.message.clone(),
            status: self.status,
            cancel_reason: self.cancel_reason.clone(),
            admin_reason: self.admin_reason.clone(),
            requester_reinitiation_count: self.requester_reinitiation_count,
            responder_reinitiation_count: self.responder_reinitiation_count,
            archived: self.archived,
            outdated: self.is_outdated(now),
            visible_to_requester: self.visible_to_requester,
            visible_to_responder: self.visible_to_responder,
            locked: self.chat_lock.is_some(),
            locked_by: self.chat_lock.as_ref().map(|l| l.locked_by),
            chat_cleared_at: self.chat_cleared_at(viewer.user_id),
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentView {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub responder_id: Uuid,
    pub listing_id: Uuid,
    #[serde(with = "date_format")]
    pub date: Date,
    #[serde(with = "time_format")]
    pub time: Time,
    pub purpose: String,
    pub message: Option<String>,
    pub status: AppointmentStatus,
    pub cancel_reason: Option<String>,
    pub admin_reason: Option<String>,
    pub requester_reinitiation_count: i16,
    pub responder_reinitiation_count: i16,
    pub archived: bool,
    pub outdated: bool,
    pub visible_to_requester: bool,
    pub visible_to_responder: bool,
    pub locked: bool,
    pub locked_by: Option<Uuid>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub chat_cleared_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub version: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime, time};

    const NOW: OffsetDateTime = datetime!(2026-03-01 12:00 UTC);

    fn appointment() -> Appointment {
        Appointment::new(
            NewAppointment {
                requester_id: Uuid::new_v4(),
                responder_id: Uuid::new_v4(),
                listing_id: Uuid::new_v4(),
                schedule: Schedule { date: date!(2026 - 04 - 01), time: time!(10:00) },
                purpose: "Haircut".into(),
                message: None,
            },
            NOW,
        )
    }

    fn request(role: ActorRole, target: AppointmentStatus, reason: Option<&str>) -> TransitionRequest {
        TransitionRequest { role, target, reason: reason.map(String::from), reschedule: None, parties_present: true }
    }

    fn move_to(appt: &mut Appointment, role: ActorRole, target: AppointmentStatus, reason: Option<&str>) -> Result<TransitionOutcome> {
        appt.apply_transition(request(role, target, reason), NOW)
    }

    #[test]
    fn test_pending_cannot_jump_to_completed() {
        let mut appt = appointment();
        for role in [ActorRole::Requester, ActorRole::Responder, ActorRole::Admin] {
            let err = move_to(&mut appt, role, AppointmentStatus::Completed, None).unwrap_err();
            assert!(matches!(err, AppError::InvalidTransition { .. }));
        }
        assert_eq!(appt.status, AppointmentStatus::Pending);
    }

    #[test]
    fn test_only_responder_accepts() {
        let mut appt = appointment();
        let err = move_to(&mut appt, ActorRole::Requester, AppointmentStatus::Accepted, None).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let outcome = move_to(&mut appt, ActorRole::Responder, AppointmentStatus::Accepted, None).unwrap();
        assert_eq!(outcome, TransitionOutcome::Changed);
        assert_eq!(appt.status, AppointmentStatus::Accepted);
    }

    #[test]
    fn test_reapplying_current_status_is_noop() {
        let mut appt = appointment();
        move_to(&mut appt, ActorRole::Responder, AppointmentStatus::Accepted, None).unwrap();
        let before = appt.clone();

        let outcome = move_to(&mut appt, ActorRole::Responder, AppointmentStatus::Accepted, None).unwrap();
        assert_eq!(outcome, TransitionOutcome::Unchanged);
        assert_eq!(appt, before);

        let err = move_to(&mut appt, ActorRole::Requester, AppointmentStatus::Accepted, None).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        assert_eq!(appt, before);
    }

    #[test]
    fn test_responder_cancel_requires_reason() {
        let mut appt = appointment();
        move_to(&mut appt, ActorRole::Responder, AppointmentStatus::Accepted, None).unwrap();

        let err = move_to(&mut appt, ActorRole::Responder, AppointmentStatus::CancelledByResponder, Some("  ")).unwrap_err();
        assert!(matches!(err, AppError::ReasonRequired));

        move_to(&mut appt, ActorRole::Responder, AppointmentStatus::CancelledByResponder, Some("sick")).unwrap();
        assert_eq!(appt.cancel_reason.as_deref(), Some("sick"));
    }

    #[test]
    fn test_requester_cancel_reason_is_optional() {
        let mut appt = appointment();
        move_to(&mut appt, ActorRole::Responder, AppointmentStatus::Accepted, None).unwrap();

        // The requester's cancellation is theirs alone, reason or not.
        let err =
            move_to(&mut appt, ActorRole::Admin, AppointmentStatus::CancelledByRequester, Some("on their behalf")).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        move_to(&mut appt, ActorRole::Requester, AppointmentStatus::CancelledByRequester, None).unwrap();
        assert_eq!(appt.status, AppointmentStatus::CancelledByRequester);
        assert!(appt.cancel_reason.is_none());
    }

    #[test]
    fn test_cancel_then_reinitiate_counts_only_on_reinitiate() {
        let mut appt = appointment();
        move_to(&mut appt, ActorRole::Responder, AppointmentStatus::Accepted, None).unwrap();
        move_to(&mut appt, ActorRole::Requester, AppointmentStatus::CancelledByRequester, Some("schedule conflict"))
            .unwrap();
        assert_eq!(appt.requester_reinitiation_count, 0);

        move_to(&mut appt, ActorRole::Requester, AppointmentStatus::Pending, None).unwrap();
        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert_eq!(appt.requester_reinitiation_count, 1);
        assert!(appt.cancel_reason.is_none());
    }

    #[test]
    fn test_third_reinitiation_is_exhausted() {
        let mut appt = appointment();
        for _ in 0..MAX_REINITIATIONS {
            move_to(&mut appt, ActorRole::Responder, AppointmentStatus::Accepted, None).unwrap();
            move_to(&mut appt, ActorRole::Requester, AppointmentStatus::CancelledByRequester, None).unwrap();
            move_to(&mut appt, ActorRole::Requester, AppointmentStatus::Pending, None).unwrap();
        }
        move_to(&mut appt, ActorRole::Responder, AppointmentStatus::Accepted, None).unwrap();
        move_to(&mut appt, ActorRole::Requester, AppointmentStatus::CancelledByRequester, None).unwrap();

        let err = move_to(&mut appt, ActorRole::Requester, AppointmentStatus::Pending, None).unwrap_err();
        assert!(matches!(err, AppError::ReinitiationExhausted));
        assert_eq!(appt.requester_reinitiation_count, MAX_REINITIATIONS);
        assert!(!appt.is_active_for_duplicates());
    }

    #[test]
    fn test_only_cancelling_party_reinitiates() {
        let mut appt = appointment();
        move_to(&mut appt, ActorRole::Responder, AppointmentStatus::Accepted, None).unwrap();
        move_to(&mut appt, ActorRole::Responder, AppointmentStatus::CancelledByResponder, Some("closed")).unwrap();

        let err = move_to(&mut appt, ActorRole::Requester, AppointmentStatus::Pending, None).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        move_to(&mut appt, ActorRole::Admin, AppointmentStatus::Pending, None).unwrap();
        assert_eq!(appt.responder_reinitiation_count, 1);
        assert_eq!(appt.requester_reinitiation_count, 0);
    }

    #[test]
    fn test_reinitiate_requires_both_parties() {
        let mut appt = appointment();
        move_to(&mut appt, ActorRole::Responder, AppointmentStatus::Accepted, None).unwrap();
        move_to(&mut appt, ActorRole::Requester, AppointmentStatus::CancelledByRequester, None).unwrap();

        let mut req = request(ActorRole::Requester, AppointmentStatus::Pending, None);
        req.parties_present = false;
        let err = appt.apply_transition(req, NOW).unwrap_err();
        assert!(matches!(err, AppError::CounterpartyMissing));
        assert_eq!(appt.status, AppointmentStatus::CancelledByRequester);
    }

    #[test]
    fn test_outdated_blocks_accept_but_not_completion() {
        let mut appt = appointment();
        let later = datetime!(2026-05-01 00:00 UTC);

        let err = appt.apply_transition(request(ActorRole::Responder, AppointmentStatus::Accepted, None), later);
        assert!(matches!(err, Err(AppError::Conflict(_))));

        appt.apply_transition(request(ActorRole::Responder, AppointmentStatus::Accepted, None), NOW).unwrap();
        appt.apply_transition(request(ActorRole::Responder, AppointmentStatus::Completed, None), later).unwrap();
        assert_eq!(appt.status, AppointmentStatus::Completed);
    }

    #[test]
    fn test_outdated_reinitiation_needs_future_reschedule() {
        let mut appt = appointment();
        move_to(&mut appt, ActorRole::Responder, AppointmentStatus::Accepted, None).unwrap();
        move_to(&mut appt, ActorRole::Requester, AppointmentStatus::CancelledByRequester, None).unwrap();
        let later = datetime!(2026-05-01 00:00 UTC);

        let err = appt.apply_transition(request(ActorRole::Requester, AppointmentStatus::Pending, None), later);
        assert!(matches!(err, Err(AppError::Conflict(_))));

        let mut req = request(ActorRole::Requester, AppointmentStatus::Pending, None);
        req.reschedule = Some(Schedule { date: date!(2026 - 06 - 01), time: time!(9:30) });
        appt.apply_transition(req, later).unwrap();
        assert_eq!(appt.date, date!(2026 - 06 - 01));
        assert!(!appt.is_outdated(later));
    }

    #[test]
    fn test_admin_delete_from_any_state_requires_reason() {
        let mut appt = appointment();
        let err = move_to(&mut appt, ActorRole::Admin, AppointmentStatus::DeletedByAdmin, None).unwrap_err();
        assert!(matches!(err, AppError::ReasonRequired));

        let err = move_to(&mut appt, ActorRole::Responder, AppointmentStatus::DeletedByAdmin, Some("x")).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        move_to(&mut appt, ActorRole::Admin, AppointmentStatus::DeletedByAdmin, Some("abuse")).unwrap();
        assert_eq!(appt.admin_reason.as_deref(), Some("abuse"));
        assert!(!appt.is_chat_writable(NOW));
    }

    #[test]
    fn test_remove_from_view_only_when_finished() {
        let mut appt = appointment();
        let err = appt.remove_from_view(ActorRole::Requester, NOW).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        move_to(&mut appt, ActorRole::Responder, AppointmentStatus::Rejected, None).unwrap();
        appt.remove_from_view(ActorRole::Requester, NOW).unwrap();
        assert!(!appt.visible_to_requester);
        assert!(appt.visible_to_responder);

        let requester = Actor::user(appt.requester_id);
        assert!(matches!(appt.require_role(&requester), Err(AppError::NotFound)));
        assert!(appt.is_visible_to(&Actor::admin(Uuid::new_v4())));
    }

    #[test]
    fn test_participant_role_wins_over_admin_flag() {
        let appt = appointment();
        assert_eq!(appt.role_of(&Actor::admin(appt.requester_id)), Some(ActorRole::Requester));
        assert_eq!(appt.role_of(&Actor::user(Uuid::new_v4())), None);
    }

    #[test]
    fn test_clear_chat_watermark_never_moves_back() {
        let mut appt = appointment();
        let user = appt.responder_id;
        let first = appt.clear_chat_for(user, NOW).unwrap();
        let second = appt.clear_chat_for(user, datetime!(2026-02-01 00:00 UTC)).unwrap();
        assert_eq!(first, NOW);
        assert_eq!(second, NOW);
        assert_eq!(appt.chat_cleared_at(user), Some(NOW));
        assert_eq!(appt.chat_cleared_at(appt.requester_id), None);
    }

    #[test]
    fn test_archive_overlay_keeps_status() {
        let mut appt = appointment();
        assert!(appt.set_archived(true, NOW).changed());
        assert!(!appt.set_archived(true, NOW).changed());
        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert!(appt.set_archived(false, NOW).changed());
        assert!(appt.archived_at.is_none());
    }
}
