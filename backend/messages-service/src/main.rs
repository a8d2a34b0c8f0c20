use actix_web::{web, App, HttpServer};
use anyhow::Context;
use delivery_attempts::{AttemptLedger, PgAttemptLedger};
use event_schema::topology::{HandlerKind, QUEUE_BINDINGS};
use messages_service::{
    broker::{
        kafka::{KafkaDeadLetterSink, KafkaDeliverySource},
        DeadLetterSink,
    },
    cache::{ConversationCache, RedisConversationCache},
    config, db,
    consumers::{run_attempt_cleanup, BrokerConsumer, ConsumerSet, RetryPolicy},
    handlers::{DeliveryHandler, MessageCreatedHandler, MessageUpdatedHandler},
    logging,
    repository::{
        ConversationStore, MessageStore, PgConversationStore, PgMessageStore,
        TimedConversationStore, TimedMessageStore,
    },
    routes,
    services::QueryService,
    state::AppState,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;

const ATTEMPT_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::from_env().context("failed to load configuration")?;
    logging::init_tracing(cfg.app.json_logs);

    let pool = db::init_pool(&cfg.database)
        .await
        .context("failed to initialize database pool")?;

    let store_timeout = cfg.consumer.store_timeout;
    let conversations: Arc<dyn ConversationStore> = Arc::new(TimedConversationStore::new(
        Arc::new(PgConversationStore::new(pool.clone())),
        store_timeout,
    ));
    let messages: Arc<dyn MessageStore> = Arc::new(TimedMessageStore::new(
        Arc::new(PgMessageStore::new(pool.clone())),
        store_timeout,
    ));

    // The query cache is optional; without Redis every read goes to Postgres
    let cache: Option<Arc<dyn ConversationCache>> = match cfg.cache.redis_url.as_deref() {
        Some(url) => {
            match RedisConversationCache::connect(url, cfg.cache.ttl, cfg.cache.timeout).await {
                Ok(cache) => {
                    info!(ttl_secs = cfg.cache.ttl.as_secs(), "Query cache enabled");
                    Some(Arc::new(cache) as Arc<dyn ConversationCache>)
                }
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, query cache disabled");
                    None
                }
            }
        }
        None => {
            info!("REDIS_URL not set, query cache disabled");
            None
        }
    };

    let query_service = Arc::new(QueryService::new(
        conversations.clone(),
        messages.clone(),
        cache,
    ));
    let state = AppState { query_service };

    let ledger: Arc<dyn AttemptLedger> = Arc::new(PgAttemptLedger::new(pool.clone()));
    let dead_letters: Arc<dyn DeadLetterSink> = Arc::new(
        KafkaDeadLetterSink::new(&cfg.kafka).context("failed to create dead-letter producer")?,
    );
    let policy = RetryPolicy::from_config(&cfg.consumer);

    let mut consumers = ConsumerSet::new();
    for binding in QUEUE_BINDINGS {
        let source = KafkaDeliverySource::new(&cfg.kafka, binding.queue)
            .with_context(|| format!("failed to subscribe queue {}", binding.queue))?;
        let handler: Arc<dyn DeliveryHandler> = match binding.handler {
            HandlerKind::Created => Arc::new(MessageCreatedHandler::new(
                conversations.clone(),
                messages.clone(),
            )),
            HandlerKind::Updated => Arc::new(MessageUpdatedHandler::new(
                conversations.clone(),
                messages.clone(),
                cfg.consumer.version_conflict_retries,
            )),
        };
        consumers.spawn_consumer(BrokerConsumer::new(
            binding,
            Arc::new(source),
            handler,
            ledger.clone(),
            dead_letters.clone(),
            policy.clone(),
        ));
    }

    let retention = cfg.consumer.attempt_retention;
    let cleanup_ledger = ledger.clone();
    consumers.spawn_task(move |shutdown| {
        run_attempt_cleanup(cleanup_ledger, retention, ATTEMPT_CLEANUP_INTERVAL, shutdown)
    });
    info!(consumers = consumers.len(), "Background tasks started");

    let bind_addr = format!("{}:{}", cfg.app.host, cfg.app.port);
    info!(%bind_addr, "Starting messages-service HTTP server");

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::configure)
    })
    .disable_signals()
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {bind_addr}"))?
    .run();
    let server_handle = server.handle();

    tokio::select! {
        res = server => {
            res.context("HTTP server failed")?;
            warn!("HTTP server exited on its own");
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    // Consumers first: they stop taking deliveries and finish the one in hand
    let grace = cfg.consumer.shutdown_grace;
    if consumers.shutdown(grace).await {
        info!("Consumers drained");
    } else {
        warn!("Consumers aborted after grace period");
    }

    server_handle.stop(true).await;
    pool.close().await;
    info!("messages-service stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
