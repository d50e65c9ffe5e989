use std::{env, net::SocketAddr, sync::Arc};

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use mailsweep_core::{
    ActionEngine, Config, Database, GmailProvider, Scheduler, SchedulerHandle, init_telemetry,
    migrations,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod api;

#[derive(Clone)]
pub struct AppState {
    pub engine: ActionEngine,
    /// None when the scheduler is disabled in config.
    pub scheduler: Option<SchedulerHandle>,
    pub db: Database,
    /// Cancelled on server shutdown; request-driven batches run on child tokens.
    pub shutdown: CancellationToken,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    let _guard = init_telemetry(&config.app, &config.telemetry)?;

    let db = Database::new(&config.paths.database).await?;
    migrations::run_migrations(&db).await?;

    let provider = GmailProvider::from_config(reqwest::Client::new(), &config.provider);
    let engine = ActionEngine::new(db.clone(), Arc::new(provider), config.engine.clone());

    let shutdown = CancellationToken::new();
    let scheduler = if config.scheduler.enabled {
        Some(Scheduler::spawn(
            engine.clone(),
            config.scheduler.clone(),
            shutdown.child_token(),
        ))
    } else {
        info!("scheduler disabled");
        None
    };

    let state = AppState {
        engine,
        scheduler: scheduler.clone(),
        db,
        shutdown: shutdown.clone(),
    };
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Mailsweep listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api::router())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    database: String,
    scheduler: String,
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_status = match state.db.health_check().await {
        Ok(_) => "ok",
        Err(err) => {
            warn!(error = %err, "database health check failed");
            "unhealthy"
        }
    };

    let scheduler_status = match &state.scheduler {
        None => "disabled",
        Some(handle) if handle.status().paused => "paused",
        Some(_) => "running",
    };

    let status = if db_status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if db_status == "ok" {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: db_status.to_string(),
            scheduler: scheduler_status.to_string(),
        }),
    )
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("received ctrl+c, shutting down");
        }
        _ = terminate => {
            warn!("received terminate signal, shutting down");
        }
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
}
