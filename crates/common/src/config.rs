use std::str::FromStr;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string for the managed database
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 10)
    pub db_max_connections: u32,

    /// Supabase project URL (e.g. `https://abc.supabase.co`)
    pub supabase_url: String,

    /// Service-role key used to authenticate the realtime socket
    pub supabase_service_role_key: String,

    /// Redis connection string, only needed when the delivery ledger is enabled
    pub redis_url: Option<String>,

    /// TTL of delivery ledger entries. `None` disables deduplication.
    pub dedup_ttl_secs: Option<u64>,

    /// Base reconnect backoff in milliseconds (default: 1000)
    pub base_backoff_ms: u64,

    /// Consecutive reconnect attempts before giving up (default: 10)
    pub max_reconnect_attempts: u32,

    /// Upper bound for each lookup / push call in milliseconds (default: 10000)
    pub call_timeout_ms: u64,

    /// Number of notification handlers allowed to run at once (default: 16)
    pub workers: usize,

    /// Pending insert events buffered ahead of the workers (default: 1024)
    pub queue_capacity: usize,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let supabase_url = lookup("SUPABASE_URL")
            .or_else(|| lookup("VITE_SUPABASE_URL"))
            .ok_or_else(|| anyhow::anyhow!("SUPABASE_URL environment variable is required"))?;

        Ok(Self {
            database_url: lookup("DATABASE_URL")
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_service_role_key: lookup("SUPABASE_SERVICE_ROLE_KEY").ok_or_else(|| {
                anyhow::anyhow!("SUPABASE_SERVICE_ROLE_KEY environment variable is required")
            })?,
            redis_url: lookup("REDIS_URL"),
            dedup_ttl_secs: lookup("NOTIFIER_DEDUP_TTL_SECS")
                .map(|v| {
                    v.parse().map_err(|_| {
                        anyhow::anyhow!("NOTIFIER_DEDUP_TTL_SECS must be a valid u64")
                    })
                })
                .transpose()?,
            base_backoff_ms: parse_or(&lookup, "NOTIFIER_BASE_BACKOFF_MS", 1000)?,
            max_reconnect_attempts: parse_or(&lookup, "NOTIFIER_MAX_RECONNECT_ATTEMPTS", 10)?,
            call_timeout_ms: parse_or(&lookup, "NOTIFIER_CALL_TIMEOUT_MS", 10_000)?,
            workers: parse_or(&lookup, "NOTIFIER_WORKERS", 16)?,
            queue_capacity: parse_or(&lookup, "NOTIFIER_QUEUE_CAPACITY", 1024)?,
        })
    }

    /// WebSocket endpoint of the Supabase Realtime service.
    pub fn realtime_url(&self) -> String {
        let base = self
            .supabase_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            base, self.supabase_service_role_key
        )
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!("{} must be a valid {}", key, std::any::type_name::<T>())
        }),
        None => Ok(default),
    }
}
