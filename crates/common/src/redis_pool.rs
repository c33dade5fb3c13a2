use std::time::Duration;

use redis::Client;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};

/// Open a Redis connection manager, used by the delivery ledger.
///
/// The manager reconnects on its own; `response_timeout` bounds each command.
pub async fn create_redis_pool(
    redis_url: &str,
    response_timeout: Duration,
) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let config = ConnectionManagerConfig::new().set_response_timeout(response_timeout);
    let manager = ConnectionManager::new_with_config(client, config).await?;

    tracing::info!(
        response_timeout_ms = response_timeout.as_millis() as u64,
        "Connected to Redis"
    );
    Ok(manager)
}
