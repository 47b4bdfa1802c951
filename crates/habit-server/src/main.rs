mod carryover;
mod config;
mod reminders;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use habit_api::{AppState, AppStateInner};
use habit_db::Database;

use crate::carryover::CarryOver;
use crate::config::Config;
use crate::reminders::Reminders;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "habit=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.secret_is_placeholder() {
        eprintln!("FATAL: HABIT_JWT_SECRET is unset or still a placeholder.");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }

    // Init database
    let db = Database::open(&config.db_path)?;

    // Reminder jobs run on this runtime
    let reminders = Reminders::start(config.telegram_token.as_deref(), config.tz)?;

    let state: AppState = Arc::new(
        AppStateInner::new(db, config.jwt_secret.clone(), config.tz, reminders.scheduler())
            .with_token_ttl(config.token_ttl),
    );
    reminders::restore(&state).await?;

    let carry_over = Arc::new(CarryOver::new(state.clone()));
    let carry_over_task = tokio::spawn(carry_over.run_daily(config.carryover_at));
    info!(
        "Streak carry-over daily at {} (UTC{})",
        config.carryover_at, config.tz
    );

    let app = habit_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Habit server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    carry_over_task.abort();
    reminders.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
