use clap::{Args, Parser, ValueEnum};

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub database: DatabaseConfig,

    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub auth: AuthConfig,

    #[command(flatten)]
    pub chat: ChatConfig,

    #[command(flatten)]
    pub events: EventBusConfig,

    #[command(flatten)]
    pub websocket: WsConfig,

    #[command(flatten)]
    pub presence: PresenceConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            chat: ChatConfig::default(),
            events: EventBusConfig::default(),
            websocket: WsConfig::default(),
            presence: PresenceConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. When omitted the server keeps all state in memory.
    #[arg(long = "database-url", env = "RENDEZVOUS_DATABASE_URL")]
    pub url: Option<String>,

    /// Maximum number of pooled connections
    #[arg(long, env = "RENDEZVOUS_DB_MAX_CONNECTIONS", default_value_t = 20)]
    pub max_connections: u32,

    /// Minimum number of idle connections kept open
    #[arg(long, env = "RENDEZVOUS_DB_MIN_CONNECTIONS", default_value_t = 2)]
    pub min_connections: u32,

    /// Seconds to wait for a free connection before failing
    #[arg(long, env = "RENDEZVOUS_DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 5)]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: None, max_connections: 20, min_connections: 2, acquire_timeout_secs: 5 }
    }
}

#[derive(Clone, Debug, Args)]
pub struct ServerConfig {
    /// Host to listen on
    #[arg(long, env = "RENDEZVOUS_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "RENDEZVOUS_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Port for the management server (health checks)
    #[arg(long, env = "RENDEZVOUS_MGMT_PORT", default_value_t = 9090)]
    pub mgmt_port: u16,

    /// Seconds to wait for background tasks during shutdown
    #[arg(long, env = "RENDEZVOUS_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,

    /// Per-request timeout for HTTP handlers
    #[arg(long, env = "RENDEZVOUS_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            mgmt_port: 9090,
            shutdown_timeout_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct AuthConfig {
    /// Secret key for JWT signing
    #[arg(long, env = "RENDEZVOUS_JWT_SECRET", default_value = "dev-secret-change-me")]
    pub jwt_secret: String,

    /// Access token time-to-live in seconds
    #[arg(long, env = "RENDEZVOUS_ACCESS_TOKEN_TTL_SECS", default_value_t = 86_400)]
    pub access_token_ttl_secs: u64,

    /// Username of the administrator account seeded at startup
    #[arg(long, env = "RENDEZVOUS_ADMIN_USERNAME")]
    pub admin_username: Option<String>,

    /// Password of the administrator account seeded at startup
    #[arg(long, env = "RENDEZVOUS_ADMIN_PASSWORD")]
    pub admin_password: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dev-secret-change-me".to_string(),
            access_token_ttl_secs: 86_400,
            admin_username: None,
            admin_password: None,
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct ChatConfig {
    /// Maximum message body length in characters
    #[arg(long, env = "RENDEZVOUS_MAX_MESSAGE_LENGTH", default_value_t = 4000)]
    pub max_message_length: usize,

    /// Minimum chat lock password length
    #[arg(long, env = "RENDEZVOUS_MIN_LOCK_PASSWORD_LENGTH", default_value_t = 4)]
    pub min_lock_password_length: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { max_message_length: 4000, min_lock_password_length: 4 }
    }
}

#[derive(Clone, Debug, Args)]
pub struct EventBusConfig {
    /// How often to reclaim event channels that have no subscribers
    #[arg(long, env = "RENDEZVOUS_GC_INTERVAL_SECS", default_value_t = 60)]
    pub gc_interval_secs: u64,

    /// Capacity of each appointment and user event channel
    #[arg(long, env = "RENDEZVOUS_CHANNEL_CAPACITY", default_value_t = 64)]
    pub channel_capacity: usize,

    /// Capacity of the global presence and admin feeds
    #[arg(long, env = "RENDEZVOUS_GLOBAL_CHANNEL_CAPACITY", default_value_t = 1024)]
    pub global_channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { gc_interval_secs: 60, channel_capacity: 64, global_channel_capacity: 1024 }
    }
}

#[derive(Clone, Debug, Args)]
pub struct WsConfig {
    /// Size of the outbound frame buffer per connection
    #[arg(long, env = "RENDEZVOUS_WS_OUTBOUND_BUFFER_SIZE", default_value_t = 64)]
    pub outbound_buffer_size: usize,

    /// Size of the delivery acknowledgment buffer
    #[arg(long, env = "RENDEZVOUS_WS_ACK_BUFFER_SIZE", default_value_t = 256)]
    pub ack_buffer_size: usize,

    /// Number of delivery acknowledgments to batch before flushing
    #[arg(long, env = "RENDEZVOUS_WS_ACK_BATCH_SIZE", default_value_t = 50)]
    pub ack_batch_size: usize,

    /// How often to flush pending delivery acknowledgments
    #[arg(long, env = "RENDEZVOUS_WS_ACK_FLUSH_INTERVAL_MS", default_value_t = 250)]
    pub ack_flush_interval_ms: u64,

    /// Interval between server heartbeat pings
    #[arg(long, env = "RENDEZVOUS_WS_PING_INTERVAL_SECS", default_value_t = 15)]
    pub ping_interval_secs: u64,

    /// Consecutive missed pongs before a connection is dropped
    #[arg(long, env = "RENDEZVOUS_WS_MAX_MISSED_PONGS", default_value_t = 2)]
    pub max_missed_pongs: u8,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            outbound_buffer_size: 64,
            ack_buffer_size: 256,
            ack_batch_size: 50,
            ack_flush_interval_ms: 250,
            ping_interval_secs: 15,
            max_missed_pongs: 2,
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct PresenceConfig {
    /// Seconds without a heartbeat after which a user is considered offline
    #[arg(long, env = "RENDEZVOUS_PRESENCE_TIMEOUT_SECS", default_value_t = 45)]
    pub heartbeat_timeout_secs: u64,

    /// How often the presence sweeper runs
    #[arg(long, env = "RENDEZVOUS_PRESENCE_SWEEP_INTERVAL_SECS", default_value_t = 10)]
    pub sweep_interval_secs: u64,

    /// Time-to-live of a typing indicator
    #[arg(long, env = "RENDEZVOUS_TYPING_TTL_MS", default_value_t = 1000)]
    pub typing_ttl_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self { heartbeat_timeout_secs: 45, sweep_interval_secs: 10, typing_ttl_ms: 1000 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Default, Args)]
pub struct TelemetryConfig {
    /// OTLP collector endpoint (gRPC). Export is disabled when unset.
    #[arg(long, env = "RENDEZVOUS_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Log output format
    #[arg(long, env = "RENDEZVOUS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}
