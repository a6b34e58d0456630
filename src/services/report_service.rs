use crate::domain::report::{Report, ReportReason};
use crate::domain::user::Actor;
use crate::error::{AppError, Result};
use crate::services::appointment_service::AppointmentService;
use crate::storage::{MessageRepository, ReportRepository};
use opentelemetry::{KeyValue, global, metrics::Counter};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

const MAX_DETAILS_LENGTH: usize = 2000;

#[derive(Clone, Debug)]
struct Metrics {
    reports_total: Counter<u64>,
    report_failures_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("rendezvous-server");
        Self {
            reports_total: meter
                .u64_counter("rendezvous_reports_total")
                .with_description("Reports filed by reason")
                .build(),
            report_failures_total: meter
                .u64_counter("rendezvous_report_failures_total")
                .with_description("Reports accepted but not persisted")
                .build(),
        }
    }
}

/// Abuse reports. Filing is validated up front and persisted in the
/// background; the caller never waits on the write.
#[derive(Clone, Debug)]
pub struct ReportService {
    reports: Arc<dyn ReportRepository>,
    messages: Arc<dyn MessageRepository>,
    appointments: AppointmentService,
    metrics: Metrics,
}

impl ReportService {
    #[must_use]
    pub fn new(
        reports: Arc<dyn ReportRepository>,
        messages: Arc<dyn MessageRepository>,
        appointments: AppointmentService,
    ) -> Self {
        Self { reports, messages, appointments, metrics: Metrics::new() }
    }

    #[tracing::instrument(skip(self, actor, details), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn report_message(
        &self,
        actor: &Actor,
        message_id: Uuid,
        reason: ReportReason,
        details: Option<String>,
    ) -> Result<Uuid> {
        let message = self.messages.find(message_id).await?.ok_or(AppError::NotFound)?;
        self.appointments.authorize(actor, message.appointment_id).await?;
        self.file(actor, message.appointment_id, Some(message_id), reason, details)
    }

    #[tracing::instrument(skip(self, actor, details), fields(user_id = %actor.user_id), err(level = "warn"))]
    pub async fn report_conversation(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        reason: ReportReason,
        details: Option<String>,
    ) -> Result<Uuid> {
        self.appointments.authorize(actor, appointment_id).await?;
        self.file(actor, appointment_id, None, reason, details)
    }

    fn file(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        message_id: Option<Uuid>,
        reason: ReportReason,
        details: Option<String>,
    ) -> Result<Uuid> {
        let details = details.map(|d| d.trim().to_string()).filter(|d| !d.is_empty());
        if details.as_ref().is_some_and(|d| d.chars().count() > MAX_DETAILS_LENGTH) {
            return Err(AppError::BadRequest(format!("Details must be at most {MAX_DETAILS_LENGTH} characters")));
        }

        let report = Report {
            id: Uuid::now_v7(),
            reporter_id: actor.user_id,
            appointment_id,
            message_id,
            reason,
            details,
            created_at: OffsetDateTime::now_utc(),
        };
        let report_id = report.id;
        self.metrics.reports_total.add(1, &[KeyValue::new("reason", reason.as_str())]);

        let reports = Arc::clone(&self.reports);
        let metrics = self.metrics.clone();
        tokio::spawn(
            async move {
                if let Err(e) = reports.create(&report).await {
                    metrics.report_failures_total.add(1, &[]);
                    tracing::error!(error = %e, "Failed to persist report");
                }
            }
            .instrument(tracing::info_span!("persist_report", report.id = %report_id)),
        );

        Ok(report_id)
    }

    /// Newest first.
    ///
    /// # Errors
    /// Returns `AppError::Unauthorized` for non-admins.
    pub async fn list(&self, actor: &Actor) -> Result<Vec<Report>> {
        if !actor.is_admin {
            return Err(AppError::Unauthorized("only administrators can review reports".into()));
        }
        self.reports.list().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventBusConfig;
    use crate::domain::appointment::{Appointment, NewAppointment, Schedule};
    use crate::services::event_bus::EventBus;
    use crate::storage::Storage;

    #[tokio::test]
    async fn test_report_is_persisted_in_background() {
        let storage = Storage::in_memory();
        let at = OffsetDateTime::now_utc() + time::Duration::days(1);
        let requester = Uuid::new_v4();
        let appointment = Appointment::new(
            NewAppointment {
                requester_id: requester,
                responder_id: Uuid::new_v4(),
                listing_id: Uuid::new_v4(),
                schedule: Schedule { date: at.date(), time: at.time() },
                purpose: "Viewing".into(),
                message: None,
            },
            OffsetDateTime::now_utc(),
        );
        storage.appointments.insert(&appointment).await.unwrap();

        let appointments = AppointmentService::new(
            Arc::clone(&storage.appointments),
            Arc::clone(&storage.listings),
            Arc::clone(&storage.users),
            EventBus::new(&EventBusConfig::default()),
        );
        let service = ReportService::new(Arc::clone(&storage.reports), Arc::clone(&storage.messages), appointments);

        let stranger = Actor::user(Uuid::new_v4());
        let hidden = service.report_conversation(&stranger, appointment.id, ReportReason::Spam, None).await;
        assert!(matches!(hidden, Err(AppError::NotFound)));

        let id = service
            .report_conversation(&Actor::user(requester), appointment.id, ReportReason::Harassment, Some("rude".into()))
            .await
            .unwrap();

        let admin = Actor::admin(Uuid::new_v4());
        let mut reports = Vec::new();
        for _ in 0..50 {
            reports = service.list(&admin).await.unwrap();
            if !reports.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].id, id);
        assert!(matches!(service.list(&Actor::user(requester)).await, Err(AppError::Unauthorized(_))));
    }
}
