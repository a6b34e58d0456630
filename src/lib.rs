#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::todo)]
#![warn(clippy::panic)]
#![warn(clippy::dbg_macro)]
#![warn(clippy::print_stdout)]
#![warn(clippy::print_stderr)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(unreachable_pub)]
#![warn(missing_debug_implementations)]
#![warn(unused_qualifications)]
#![deny(unused_must_use)]

pub mod adapters;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod protocol;
pub mod services;
pub mod storage;
pub mod sync;
pub mod telemetry;
pub mod workers;

use crate::adapters::database::DbPool;
use crate::api::ServiceContainer;
use crate::config::Config;
use crate::services::access_gate::AccessGate;
use crate::services::account_service::AccountService;
use crate::services::appointment_service::AppointmentService;
use crate::services::event_bus::EventBus;
use crate::services::gateway::GatewayService;
use crate::services::health_service::HealthService;
use crate::services::listing_service::ListingService;
use crate::services::message_service::MessageService;
use crate::services::presence_service::PresenceService;
use crate::services::receipt_service::ReceiptService;
use crate::services::report_service::ReportService;
use crate::storage::Storage;
use crate::workers::{ChannelGcWorker, PresenceSweepWorker};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Wires repositories, services and workers. Without a database pool every
/// repository is backed by process memory.
#[derive(Debug)]
pub struct AppBuilder {
    config: Config,
    pool: Option<DbPool>,
}

/// A fully wired application, ready to be served.
#[derive(Debug)]
pub struct App {
    pub services: ServiceContainer,
    pub health_service: HealthService,
    pub workers: Workers,
}

#[derive(Debug)]
pub struct Workers {
    pub channel_gc: ChannelGcWorker,
    pub presence_sweep: PresenceSweepWorker,
}

impl Workers {
    #[must_use]
    pub fn spawn_all(self, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.channel_gc.run(shutdown_rx.clone())),
            tokio::spawn(self.presence_sweep.run(shutdown_rx)),
        ]
    }
}

impl AppBuilder {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config, pool: None }
    }

    #[must_use]
    pub fn with_database(mut self, pool: DbPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// # Errors
    /// Returns an error if seeding the administrator account fails.
    pub async fn build(self) -> anyhow::Result<App> {
        let config = self.config;
        let storage = match &self.pool {
            Some(pool) => Storage::postgres(pool.clone()),
            None => {
                tracing::warn!("No database configured, state is kept in memory only");
                Storage::in_memory()
            }
        };

        let bus = EventBus::new(&config.events);

        let account_service = AccountService::new(config.auth.clone(), Arc::clone(&storage.users), bus.clone());
        let listing_service = ListingService::new(Arc::clone(&storage.listings));
        let appointment_service = AppointmentService::new(
            Arc::clone(&storage.appointments),
            Arc::clone(&storage.listings),
            Arc::clone(&storage.users),
            bus.clone(),
        );
        let access_gate = AccessGate::new(&config.chat, appointment_service.clone(), bus.clone());
        let message_service = MessageService::new(
            &config.chat,
            Arc::clone(&storage.messages),
            appointment_service.clone(),
            access_gate.clone(),
            bus.clone(),
        );
        let receipt_service =
            ReceiptService::new(Arc::clone(&storage.messages), appointment_service.clone(), access_gate.clone(), bus.clone());
        let report_service =
            ReportService::new(Arc::clone(&storage.reports), Arc::clone(&storage.messages), appointment_service.clone());
        let presence_service = PresenceService::new(&config.presence, bus.clone());
        let gateway_service = GatewayService::new(
            bus.clone(),
            presence_service.clone(),
            message_service.clone(),
            receipt_service.clone(),
            access_gate.clone(),
            config.websocket.clone(),
        );

        account_service.seed_admin().await?;

        let workers = Workers {
            channel_gc: ChannelGcWorker::new(bus, config.events.gc_interval_secs),
            presence_sweep: PresenceSweepWorker::new(presence_service.clone(), config.presence.sweep_interval_secs),
        };

        Ok(App {
            services: ServiceContainer {
                account_service,
                listing_service,
                appointment_service,
                message_service,
                receipt_service,
                access_gate,
                report_service,
                presence_service,
                gateway_service,
            },
            health_service: HealthService::new(self.pool),
            workers,
        })
    }
}

/// Flips the shutdown channel on Ctrl-C or SIGTERM.
pub fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
            () = terminate => tracing::info!("Received SIGTERM, shutting down"),
        }

        let _ = shutdown_tx.send(true);
    });
}

/// Routes panics through tracing so they reach the log pipeline.
pub fn setup_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let location = info.location().map(ToString::to_string).unwrap_or_default();
        let payload = info
            .payload()
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| info.payload().downcast_ref::<String>().cloned())
            .unwrap_or_default();
        tracing::error!(panic.location = %location, panic.payload = %payload, "Thread panicked");
        default_hook(info);
    }));
}
