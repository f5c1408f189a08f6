use std::sync::Arc;
use std::net::SocketAddr;
use anyhow::Context;
use showseat_api::{app, state::{AppState, AuthConfig}, worker};
use showseat_booking::{BookingSettings, ReservationService, TokioExpiryScheduler};
use showseat_store::{DbClient, PgRecordStore, RedisLockStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "showseat_api=debug,showseat_booking=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = showseat_store::app_config::Config::load().context("Failed to load config")?;
    tracing::info!("Starting ShowSeat API on port {}", config.server.port);

    // Postgres: source of truth for seats and reservations
    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    // Redis: advisory seat locks
    let locks = RedisLockStore::new(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;

    let service = ReservationService::new(
        Arc::new(locks),
        Arc::new(PgRecordStore::new(db.pool.clone())),
        BookingSettings {
            hold_window: config.booking.hold_window(),
            operation_timeout: config.booking.operation_timeout(),
        },
    );

    let _sweeper = worker::start_expiry_worker(service.clone(), &config.booking);

    let app_state = AppState {
        expiry: Arc::new(TokioExpiryScheduler::new(service.clone())),
        reservations: service,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
