use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use boxoffice_api::middleware::{RateLimiter, Unlimited};
use boxoffice_api::relay::{run_seat_relay, KafkaFanOut};
use boxoffice_api::state::reservation_settings;
use boxoffice_api::{app, AppState, AuthConfig};
use boxoffice_core::services::FanOut;
use boxoffice_core::{Clock, SystemClock};
use boxoffice_reservation::{EngineParts, JobWorker, ReservationEngine, RoomHub};
use boxoffice_store::app_config::{Config, FanOutMode};
use boxoffice_store::{DbClient, EventProducer, KafkaNotifier, PgSeatLedger, RedisClient, RedisJobQueue};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "boxoffice_api=debug,boxoffice_reservation=debug,tower_http=debug,axum::rejection=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Boxoffice API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    let ledger = Arc::new(PgSeatLedger::new(&db));

    // Redis
    let redis = Arc::new(
        RedisClient::new(&config.redis.url)
            .await
            .context("Failed to connect to Redis")?,
    );

    // Kafka
    let producer = EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let jobs = Arc::new(RedisJobQueue::new(
        (*redis).clone(),
        clock.clone(),
        Duration::from_secs(config.jobs.lease_seconds),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Fan-out
    let hub = Arc::new(RoomHub::new(config.fanout.subscriber_buffer));
    let mut relay = None;
    let fanout: Arc<dyn FanOut> = match config.fanout.mode {
        FanOutMode::Local => hub.clone() as Arc<dyn FanOut>,
        FanOutMode::Kafka => {
            relay = Some(tokio::spawn(run_seat_relay(
                config.kafka.brokers.clone(),
                config.kafka.group_id.clone(),
                config.kafka.seat_topic.clone(),
                hub.clone(),
                shutdown_rx.clone(),
            )));
            Arc::new(KafkaFanOut::new(hub.clone(), producer.clone(), config.kafka.seat_topic.clone()))
        }
    };

    let engine = Arc::new(ReservationEngine::new(
        EngineParts {
            ledger: ledger.clone(),
            bookings: ledger,
            locks: redis.clone(),
            jobs: jobs.clone(),
            fanout: fanout.clone(),
            clock,
        },
        reservation_settings(&config.reservation),
    ));

    // Background jobs
    let notifier = Arc::new(KafkaNotifier::new(producer, config.kafka.notification_topic.clone()));
    let worker = JobWorker::new(engine.clone(), jobs, notifier)
        .with_batch_size(config.jobs.batch_size)
        .with_poll_interval(Duration::from_millis(config.jobs.poll_interval_ms))
        .with_sweep_interval(Duration::from_secs(config.jobs.sweep_interval_seconds));
    let worker = tokio::spawn(worker.run(shutdown_rx));

    let rate_limiter: Arc<dyn RateLimiter> = if config.rate_limit.booking_per_minute > 0 {
        redis.clone() as Arc<dyn RateLimiter>
    } else {
        Arc::new(Unlimited)
    };

    let app_state = AppState {
        engine,
        hub,
        fanout,
        rate_limiter,
        booking_per_minute: config.rate_limit.booking_per_minute,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background tasks after in-flight requests drain
    let _ = shutdown_tx.send(true);
    worker.await?;
    if let Some(relay) = relay {
        if let Err(e) = relay.await? {
            tracing::error!("Seat relay failed: {}", e);
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}
