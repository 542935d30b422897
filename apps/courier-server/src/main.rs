//! Courier: reliable outbound-message dispatching service.
//!
//! Wires the store, webhook sender, dispatch engine and HTTP API
//! together, then serves until SIGINT/SIGTERM.

mod config;
mod logging;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use courier_api::{api_router, ApiState};
use courier_db::DbPoolOptions;
use courier_dispatch::transport::{RabbitMqConfig, RabbitTransport};
use courier_dispatch::{
    AuditEmitter, DispatchScheduler, Dispatcher, MessageCache, MessageService, MessageStore,
    PgMessageStore, QueueScheduler, RetryPolicy, Scheduler, Transport, WebhookConfig,
    WebhookSender,
};

use config::Config;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("configuration error: {error}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.log.level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "starting courier"
    );

    // Database pool + migrations.
    let pool = match courier_db::connect(
        &config.database.url,
        DbPoolOptions {
            max_connections: config.database.max_connections,
            min_connections: config.database.max_idle_connections,
            ..DbPoolOptions::default()
        },
    )
    .await
    {
        Ok(pool) => {
            info!("database connection established");
            pool
        }
        Err(error) => {
            eprintln!("failed to connect to database: {error}");
            std::process::exit(1);
        }
    };

    if let Err(error) = courier_db::run_migrations(&pool).await {
        eprintln!("database migration failed: {error}");
        std::process::exit(1);
    }

    // Optional cache; a connection failure is not fatal.
    let cache = match &config.redis.url {
        None => None,
        Some(url) => match MessageCache::connect(url, config.redis.cache_ttl).await {
            Ok(cache) => {
                info!("connected to cache");
                Some(cache)
            }
            Err(error) => {
                tracing::warn!(%error, "failed to connect to cache, continuing without it");
                None
            }
        },
    };

    let audit = AuditEmitter::new(pool.clone());

    let sender = match WebhookSender::new(WebhookConfig {
        url: config.webhook.url.clone(),
        auth_key: config.webhook.auth_key.clone(),
        timeout: config.webhook.timeout,
        max_retries: config.webhook.max_retries,
    }) {
        Ok(sender) => sender.with_audit(audit.clone()),
        Err(error) => {
            eprintln!("failed to build webhook sender: {error}");
            std::process::exit(1);
        }
    };

    let store: Arc<dyn MessageStore> = Arc::new(PgMessageStore::new(pool.clone()));

    let mut dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(sender),
        RetryPolicy::default(),
        config.message.max_length,
    )
    .with_audit(audit.clone());
    if let Some(cache) = &cache {
        dispatcher = dispatcher.with_cache(cache.clone());
    }
    let dispatcher = Arc::new(dispatcher);

    // Transport choice: broker push when enabled, database polling
    // otherwise.
    let (service, scheduler) = if config.rabbitmq.is_active() {
        let transport_config = RabbitMqConfig {
            url: config
                .rabbitmq
                .url
                .clone()
                .unwrap_or_default(),
            messages_queue: config.rabbitmq.messages_queue.clone(),
            retry_queue: config.rabbitmq.retry_queue.clone(),
            dead_letter_queue: config.rabbitmq.dead_letter_queue.clone(),
            max_retries: config.rabbitmq.max_retries,
            retry_delay_multiplier: config.rabbitmq.retry_delay_multiplier,
        };
        let transport: Arc<dyn Transport> = match RabbitTransport::connect(transport_config).await
        {
            Ok(transport) => {
                info!("connected to rabbitmq");
                Arc::new(transport)
            }
            Err(error) => {
                eprintln!("failed to connect to rabbitmq: {error}");
                std::process::exit(1);
            }
        };

        let service = Arc::new(
            MessageService::new(store.clone(), dispatcher.clone(), config.message.max_length)
                .with_transport(transport.clone()),
        );
        let scheduler = DispatchScheduler::Queue(
            QueueScheduler::new(transport, dispatcher.clone(), store.clone())
                .with_audit(audit.clone()),
        );
        (service, Arc::new(scheduler))
    } else {
        let service = Arc::new(MessageService::new(
            store.clone(),
            dispatcher.clone(),
            config.message.max_length,
        ));
        let scheduler = DispatchScheduler::Polling(
            Scheduler::new(
                service.clone(),
                store.clone(),
                config.scheduler.interval,
                config.scheduler.batch_size,
            )
            .with_audit(audit.clone()),
        );
        (service, Arc::new(scheduler))
    };

    let state = ApiState {
        pool: pool.clone(),
        service,
        scheduler: scheduler.clone(),
        audit,
        cache,
        auth_key: config.webhook.auth_key.clone(),
    };

    // Read and write timeouts compose into one per-request deadline.
    let request_deadline = config.server.read_timeout + config.server.write_timeout;
    let app = api_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_deadline));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(error) => {
            eprintln!("failed to bind {addr}: {error}");
            std::process::exit(1);
        }
    };

    info!(%addr, "listening");

    if let Err(error) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        eprintln!("server error: {error}");
        std::process::exit(1);
    }

    // Drain the scheduler before the pool goes away.
    if scheduler.is_running().await {
        if let Err(error) = scheduler.stop().await {
            tracing::warn!(%error, "error stopping scheduler during shutdown");
        }
    }
    pool.close().await;

    info!("shutdown complete");
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "failed to install sigterm handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("shutdown signal received");
}
