mod ws;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use keepsake_api::capsules;
use keepsake_api::groups;
use keepsake_api::state::{AppState, AppStateInner};
use keepsake_core::{
    CapsuleOpener, CapsuleScheduler, EventBus, ReminderScheduler, SqliteGranter, SqliteMembership,
    SystemClock,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keepsake=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("KEEPSAKE_DB_PATH").unwrap_or_else(|_| "keepsake.db".into());
    let host = std::env::var("KEEPSAKE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("KEEPSAKE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let tick_ms: u64 = std::env::var("KEEPSAKE_TICK_MS")
        .unwrap_or_else(|_| "1000".into())
        .parse()?;
    let call_timeout_ms: u64 = std::env::var("KEEPSAKE_CALL_TIMEOUT_MS")
        .unwrap_or_else(|_| "5000".into())
        .parse()?;

    // Init database
    let db = Arc::new(keepsake_db::Database::open(&PathBuf::from(&db_path))?);

    // Wire the lifecycle core
    let clock = Arc::new(SystemClock);
    let bus = EventBus::new();
    let reminders = ReminderScheduler::new(db.clone(), clock.clone(), bus.clone());
    let scheduler = CapsuleScheduler::new(
        db.clone(),
        reminders,
        clock.clone(),
        bus.clone(),
        Duration::from_millis(tick_ms),
    );
    let opener = CapsuleOpener::new(
        db.clone(),
        Arc::new(SqliteMembership::new(db.clone())),
        Arc::new(SqliteGranter::new(db.clone())),
        clock.clone(),
        bus.clone(),
        Duration::from_millis(call_timeout_ms),
    );

    // Rebuild tracking and reminders from the store, then start the sweep
    scheduler.reconcile().await?;
    {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await });
    }

    let state: AppState = Arc::new(AppStateInner {
        db,
        scheduler,
        opener,
        clock,
        bus: bus.clone(),
    });

    // Routes
    let app = Router::new()
        .route("/capsules", post(capsules::create_capsule))
        .route("/capsules/{capsule_id}/open", post(capsules::open_capsule))
        .route("/capsules/{capsule_id}", delete(capsules::delete_capsule))
        .route(
            "/groups/{group_id}/capsules",
            get(capsules::list_group_capsules),
        )
        .route("/groups/{group_id}/members", post(groups::add_member))
        .route("/events", get(ws::ws_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Keepsake server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
