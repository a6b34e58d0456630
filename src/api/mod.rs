use crate::config::Config;
use crate::services::access_gate::AccessGate;
use crate::services::account_service::AccountService;
use crate::services::appointment_service::AppointmentService;
use crate::services::gateway::GatewayService;
use crate::services::health_service::HealthService;
use crate::services::listing_service::ListingService;
use crate::services::message_service::MessageService;
use crate::services::presence_service::PresenceService;
use crate::services::receipt_service::ReceiptService;
use crate::services::report_service::ReportService;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::{
    Router,
    routing::{delete, get, patch, post, put},
};
use std::time::Duration;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod appointments;
pub mod auth;
pub mod chat_lock;
pub mod gateway;
pub mod health;
pub mod listings;
pub mod messages;
pub mod middleware;
pub mod presence;
pub mod reports;
pub mod schemas;

#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Config,
    pub account_service: AccountService,
    pub listing_service: ListingService,
    pub appointment_service: AppointmentService,
    pub message_service: MessageService,
    pub receipt_service: ReceiptService,
    pub access_gate: AccessGate,
    pub report_service: ReportService,
    pub presence_service: PresenceService,
    pub gateway_service: GatewayService,
    pub shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

#[derive(Clone, Debug)]
pub struct MgmtState {
    pub health_service: HealthService,
}

#[derive(Debug)]
pub struct ServiceContainer {
    pub account_service: AccountService,
    pub listing_service: ListingService,
    pub appointment_service: AppointmentService,
    pub message_service: MessageService,
    pub receipt_service: ReceiptService,
    pub access_gate: AccessGate,
    pub report_service: ReportService,
    pub presence_service: PresenceService,
    pub gateway_service: GatewayService,
}

/// Configures and returns the primary application router.
pub fn app_router(
    config: Config,
    services: ServiceContainer,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> Router {
    let request_timeout = Duration::from_secs(config.server.request_timeout_secs);

    let state = AppState {
        config,
        account_service: services.account_service,
        listing_service: services.listing_service,
        appointment_service: services.appointment_service,
        message_service: services.message_service,
        receipt_service: services.receipt_service,
        access_gate: services.access_gate,
        report_service: services.report_service,
        presence_service: services.presence_service,
        gateway_service: services.gateway_service,
        shutdown_rx,
    };

    let account_routes = Router::new()
        .route("/users", post(auth::register))
        .route("/users/me", delete(auth::delete_account))
        .route("/sessions", post(auth::login));

    let appointment_routes = Router::new()
        .route("/listings", post(listings::create_listing))
        .route("/listings/{id}", get(listings::get_listing))
        .route("/appointments", post(appointments::create_appointment).get(appointments::list_appointments))
        .route("/appointments/{id}", get(appointments::get_appointment))
        .route("/appointments/{id}/transitions", post(appointments::transition_appointment))
        .route("/appointments/{id}/reinitiate", post(appointments::reinitiate_appointment))
        .route(
            "/appointments/{id}/archive",
            post(appointments::archive_appointment).delete(appointments::unarchive_appointment),
        )
        .route("/appointments/{id}/visibility", delete(appointments::remove_from_view))
        .route("/appointments/{id}/clear", post(appointments::clear_chat))
        .route("/appointments/{id}/reports", post(reports::report_conversation));

    let chat_routes = Router::new()
        .route("/appointments/{id}/messages", get(messages::list_messages).post(messages::send_message))
        .route("/appointments/{id}/pins", get(messages::active_pins))
        .route("/appointments/{id}/read", post(messages::mark_read))
        .route("/appointments/{id}/delivered", post(messages::mark_delivered))
        .route("/appointments/{id}/lock", post(chat_lock::lock_chat).delete(chat_lock::remove_lock))
        .route("/appointments/{id}/lock/reset", post(chat_lock::reset_lock))
        .route("/appointments/{id}/unlock", post(chat_lock::unlock_chat))
        .route("/appointments/{id}/close", post(chat_lock::close_chat))
        .route("/messages/{id}", patch(messages::edit_message).delete(messages::delete_message))
        .route("/messages/{id}/star", put(messages::star_message))
        .route("/messages/{id}/pin", put(messages::pin_message))
        .route("/messages/{id}/reports", post(reports::report_message));

    let misc_routes = Router::new()
        .route("/admin/reports", get(reports::list_reports))
        .route("/admin/appointments", get(admin::list_appointments))
        .route("/presence/{userId}", get(presence::get_presence))
        .route("/gateway", get(gateway::websocket_handler));

    Router::new()
        .nest("/v1", account_routes.merge(appointment_routes).merge(chat_routes).merge(misc_routes))
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout))
        .layer(PropagateRequestIdLayer::new(axum::http::HeaderName::from_static("x-request-id")))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(move |request: &Request<Body>| {
                    let request_id = request
                        .extensions()
                        .get::<tower_http::request_id::RequestId>()
                        .map(|id| id.header_value().to_str().unwrap_or_default())
                        .unwrap_or_default()
                        .to_string();

                    tracing::info_span!(
                        "request",
                        "request_id" = %request_id,
                        "http.request.method" = %request.method(),
                        "url.path" = %request.uri().path(),
                        "http.response.status_code" = tracing::field::Empty,
                        "otel.kind" = "server",
                        "user_id" = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: Duration, _span: &tracing::Span| {
                        let status = response.status();
                        tracing::Span::current().record("http.response.status_code", status.as_u16());

                        tracing::info!(
                            latency_ms = %latency.as_millis(),
                            status = %status.as_u16(),
                            "request completed"
                        );
                    },
                )
                .on_failure(|error, _latency, _span: &tracing::Span| {
                    tracing::error!(error = %error, "request failed");
                }),
        )
        .layer(SetRequestIdLayer::new(
            axum::http::HeaderName::from_static("x-request-id"),
            middleware::MakeRequestUuidOrHeader,
        ))
        .with_state(state)
}

pub fn mgmt_router(state: MgmtState) -> Router {
    Router::new().route("/livez", get(health::livez)).route("/readyz", get(health::readyz)).with_state(state)
}
