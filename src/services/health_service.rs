use crate::adapters::database::DbPool;
use opentelemetry::{KeyValue, global, metrics::Gauge};
use std::time::Duration;
use tokio::time::timeout;

const DB_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Debug)]
struct Metrics {
    status: Gauge<i64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("rendezvous-server");
        Self {
            status: meter
                .i64_gauge("rendezvous_health_status")
                .with_description("Status of health checks (1 for ok, 0 for error)")
                .build(),
        }
    }
}

/// Readiness probes. Without a database the in-process store is always ready.
#[derive(Clone, Debug)]
pub struct HealthService {
    pool: Option<DbPool>,
    metrics: Metrics,
}

impl HealthService {
    #[must_use]
    pub fn new(pool: Option<DbPool>) -> Self {
        Self { pool, metrics: Metrics::new() }
    }

    /// Checks database connectivity.
    ///
    /// # Errors
    /// Returns a string describing the failure if the database is unreachable.
    pub async fn check_db(&self) -> Result<(), String> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };

        let result = match timeout(DB_CHECK_TIMEOUT, sqlx::query("SELECT 1").execute(pool)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(format!("Database connection failed: {e:?}")),
            Err(_) => Err("Database connection timed out".to_string()),
        };
        self.metrics.status.record(i64::from(result.is_ok()), &[KeyValue::new("component", "database")]);
        result
    }
}
