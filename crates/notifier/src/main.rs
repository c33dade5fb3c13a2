use std::sync::Arc;
use std::time::Duration;

use webglow_common::config::AppConfig;
use webglow_common::db;
use webglow_common::redis_pool::create_redis_pool;
use webglow_notifier::directory::PgDirectory;
use webglow_notifier::handler::NotificationHandler;
use webglow_notifier::ledger::RedisLedger;
use webglow_notifier::listener::{ListenerConfig, NotificationListener};
use webglow_notifier::push::{FcmSender, FirebaseCredentials};
use webglow_notifier::realtime::RealtimeFeed;
use webglow_notifier::supervisor::ReconnectPolicy;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "webglow_notifier=info,webglow_common=info".into()),
        )
        .json()
        .init();

    tracing::info!("WebGlow notification listener starting...");

    // Load configuration
    let config = AppConfig::from_env()?;
    let call_timeout = Duration::from_millis(config.call_timeout_ms);

    // Push delivery is optional: without credentials the chat works, just silently
    let Some(credentials) = FirebaseCredentials::from_env() else {
        tracing::warn!(
            "Push notifications disabled: set FIREBASE_SERVICE_ACCOUNT or \
             FIREBASE_PROJECT_ID, FIREBASE_CLIENT_EMAIL and FIREBASE_PRIVATE_KEY"
        );
        return Ok(());
    };
    let push = match FcmSender::new(credentials, call_timeout) {
        Ok(push) => push,
        Err(e) => {
            tracing::error!(error = %e, "Push notifications disabled: invalid Firebase credentials");
            return Ok(());
        }
    };

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    let mut handler = NotificationHandler::new(
        Arc::new(PgDirectory::new(pool)),
        Arc::new(push),
        call_timeout,
    );

    if let Some(ttl_secs) = config.dedup_ttl_secs {
        let redis_url = config.redis_url.as_deref().ok_or_else(|| {
            anyhow::anyhow!("REDIS_URL is required when NOTIFIER_DEDUP_TTL_SECS is set")
        })?;
        let redis = create_redis_pool(redis_url, call_timeout).await?;
        handler = handler.with_ledger(Arc::new(RedisLedger::new(redis, ttl_secs)));
        tracing::info!(ttl_secs, "Delivery ledger enabled");
    }

    let feed = RealtimeFeed::new(
        config.realtime_url(),
        config.supabase_service_role_key.clone(),
        call_timeout,
    );

    let listener = NotificationListener::new(
        Arc::new(feed),
        Arc::new(handler),
        ListenerConfig {
            policy: ReconnectPolicy::new(
                Duration::from_millis(config.base_backoff_ms),
                config.max_reconnect_attempts,
            ),
            workers: config.workers,
            queue_capacity: config.queue_capacity,
        },
    );

    let handle = listener.start();

    // Run until Ctrl+C or until the reconnect budget is exhausted
    let failed = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
            false
        }
        _ = handle.failed() => true,
    };

    handle.shutdown().await;

    if failed {
        anyhow::bail!("notification listener failed; restart required");
    }

    tracing::info!("WebGlow notification listener stopped.");
    Ok(())
}
