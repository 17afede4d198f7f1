mod config;
mod sweeper;

use axum::http::{
    HeaderValue, Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use circle_api::AppStateInner;
use circle_db::{Database, migrations};

use crate::config::Config;

/// `circle [serve|migrate|rollback|flush|show-data]`
enum Command {
    Serve,
    Migrate,
    Rollback,
    Flush,
    ShowData,
}

impl Command {
    fn from_args() -> anyhow::Result<Self> {
        match std::env::args().nth(1).as_deref() {
            None | Some("serve") => Ok(Command::Serve),
            Some("migrate") => Ok(Command::Migrate),
            Some("rollback") => Ok(Command::Rollback),
            Some("flush") => Ok(Command::Flush),
            Some("show-data") => Ok(Command::ShowData),
            Some(other) => anyhow::bail!(
                "unknown command {other:?}; expected serve, migrate, rollback, flush or show-data"
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "circle=debug,circle_api=debug,circle_gateway=debug,tower_http=debug".into()
            }),
        )
        .init();

    let config = Config::from_env()?;
    let command = Command::from_args()?;

    let db = match command {
        Command::Migrate => {
            let db = Database::connect(&config.db_path)?;
            let applied = db.with_conn_mut(migrations::migrate)?;
            info!("Applied {} migration(s)", applied);
            return Ok(());
        }
        Command::Rollback => {
            let db = Database::connect(&config.db_path)?;
            let reverted = db.with_conn_mut(migrations::rollback)?;
            info!("Rolled back {} migration(s)", reverted);
            return Ok(());
        }
        Command::ShowData => {
            let db = Database::open(&config.db_path)?;
            for (table, count) in db.with_conn(migrations::table_counts)? {
                info!("{:<24} {}", table, count);
            }
            return Ok(());
        }
        Command::Flush => {
            let db = Database::open(&config.db_path)?;
            db.with_conn_mut(migrations::flush)?;
            db
        }
        Command::Serve => Database::open(&config.db_path)?,
    };

    let state = match config.bcrypt_cost {
        Some(cost) => AppStateInner::with_hash_cost(db, cost),
        None => AppStateInner::new(db),
    };

    tokio::spawn(sweeper::run_session_sweeper(
        state.sessions.clone(),
        config.session_sweep_secs,
    ));

    let cors = CorsLayer::new()
        .allow_origin(config.cors_origin.parse::<HeaderValue>()?)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true);

    let app = circle_api::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Circle server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    info!("Received Ctrl+C, shutting down...");
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
