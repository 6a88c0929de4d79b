use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use docbatch_scheduler::SchedulerConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Time allowed for background services to stop after the HTTP server
    /// has drained (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Directory scanned for templates (default: `./templates`).
    pub template_dir: PathBuf,
    pub scheduler: SchedulerConfig,
    pub ws: WsConfig,
    pub broadcast: BroadcastConfig,
}

/// WebSocket connection limits and heartbeat timing.
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub heartbeat_interval: Duration,
    /// A connection silent for longer than this is reaped.
    pub heartbeat_timeout: Duration,
    pub max_connections: usize,
    /// Admissions allowed per rolling minute window.
    pub max_connections_per_minute: usize,
    /// Inbound messages allowed per connection per minute.
    pub max_messages_per_minute: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            max_connections: 1000,
            max_connections_per_minute: 100,
            max_messages_per_minute: 120,
            outbound_queue_size: 256,
        }
    }
}

/// Progress broadcaster throttling.
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Flush period for queued progress diffs.
    pub interval: Duration,
    /// Maximum tasks flushed per tick.
    pub batch_size: usize,
    /// Minimum progress movement, in percentage points, worth sending.
    pub min_change_threshold: f64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            batch_size: 10,
            min_change_threshold: 1.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                 |
    /// |----------------------------------|-------------------------|
    /// | `HOST`                           | `0.0.0.0`               |
    /// | `PORT`                           | `3000`                  |
    /// | `CORS_ORIGINS`                   | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`           | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`          | `30`                    |
    /// | `TEMPLATE_DIR`                   | `./templates`           |
    /// | `MAX_CONCURRENCY`                | `3`                     |
    /// | `DEFAULT_MAX_RETRIES`            | `3`                     |
    /// | `RETRY_BASE_DELAY_MS`            | `200`                   |
    /// | `RETRY_MAX_DELAY_MS`             | `5000`                  |
    /// | `PROGRESS_EVERY_UNITS`           | `10`                    |
    /// | `PROGRESS_INTERVAL_MS`           | `500`                   |
    /// | `ESTIMATED_UNIT_MS`              | `2000`                  |
    /// | `WS_HEARTBEAT_INTERVAL_SECS`     | `30`                    |
    /// | `WS_HEARTBEAT_TIMEOUT_SECS`      | `60`                    |
    /// | `WS_MAX_CONNECTIONS`             | `1000`                  |
    /// | `WS_MAX_CONNECTIONS_PER_MINUTE`  | `100`                   |
    /// | `WS_MAX_MESSAGES_PER_MINUTE`     | `120`                   |
    /// | `WS_OUTBOUND_QUEUE_SIZE`         | `256`                   |
    /// | `BROADCAST_INTERVAL_MS`          | `100`                   |
    /// | `BROADCAST_BATCH_SIZE`           | `10`                    |
    /// | `BROADCAST_MIN_CHANGE_THRESHOLD` | `1.0`                   |
    ///
    /// Panics with the variable name when a value does not parse.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env_parse("PORT", "3000");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = env_parse("REQUEST_TIMEOUT_SECS", "30");
        let shutdown_timeout_secs: u64 = env_parse("SHUTDOWN_TIMEOUT_SECS", "30");
        let template_dir =
            PathBuf::from(std::env::var("TEMPLATE_DIR").unwrap_or_else(|_| "./templates".into()));

        let scheduler = SchedulerConfig {
            max_concurrency: env_parse("MAX_CONCURRENCY", "3"),
            default_max_retries: env_parse("DEFAULT_MAX_RETRIES", "3"),
            retry_base_delay: Duration::from_millis(env_parse("RETRY_BASE_DELAY_MS", "200")),
            retry_max_delay: Duration::from_millis(env_parse("RETRY_MAX_DELAY_MS", "5000")),
            progress_every_units: env_parse("PROGRESS_EVERY_UNITS", "10"),
            progress_interval: Duration::from_millis(env_parse("PROGRESS_INTERVAL_MS", "500")),
            estimated_unit_ms: env_parse("ESTIMATED_UNIT_MS", "2000"),
        };
        assert!(scheduler.max_concurrency >= 1, "MAX_CONCURRENCY must be at least 1");

        let ws = WsConfig {
            heartbeat_interval: Duration::from_secs(env_parse("WS_HEARTBEAT_INTERVAL_SECS", "30")),
            heartbeat_timeout: Duration::from_secs(env_parse("WS_HEARTBEAT_TIMEOUT_SECS", "60")),
            max_connections: env_parse("WS_MAX_CONNECTIONS", "1000"),
            max_connections_per_minute: env_parse("WS_MAX_CONNECTIONS_PER_MINUTE", "100"),
            max_messages_per_minute: env_parse("WS_MAX_MESSAGES_PER_MINUTE", "120"),
            outbound_queue_size: env_parse("WS_OUTBOUND_QUEUE_SIZE", "256"),
        };
        assert!(ws.outbound_queue_size >= 1, "WS_OUTBOUND_QUEUE_SIZE must be at least 1");

        let broadcast = BroadcastConfig {
            interval: Duration::from_millis(env_parse("BROADCAST_INTERVAL_MS", "100")),
            batch_size: env_parse("BROADCAST_BATCH_SIZE", "10"),
            min_change_threshold: env_parse("BROADCAST_MIN_CHANGE_THRESHOLD", "1.0"),
        };

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            template_dir,
            scheduler,
            ws,
            broadcast,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: &str) -> T {
    let raw = std::env::var(key).unwrap_or_else(|_| default.into());
    raw.trim().parse().unwrap_or_else(|_| {
        panic!(
            "{key} must be a valid {}, got {raw:?}",
            std::any::type_name::<T>()
        )
    })
}
