use crimewatch_common::{
    score::{InvalidScorePolicyError, ScorePolicy},
    snowflake::{ProcessId, SnowflakePartOutOfRangeError, WorkerId},
};
use crimewatch_db::{DbClient, DbError, client::connect};
use serde::Deserialize;
use server::ServerState;
use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod server;

#[derive(Debug, Error)]
enum InitError {
    #[error("Error parsing .env file: {0}")]
    Dotenv(#[from] dotenvy::Error),
    #[error("Error parsing environment: {0}")]
    Envy(#[from] envy::Error),
    #[error("Invalid snowflake configuration: {0}")]
    Snowflake(#[from] SnowflakePartOutOfRangeError),
    #[error("Invalid score policy: {0}")]
    Policy(#[from] InvalidScorePolicyError),
    #[error("Error setting up the database: {0}")]
    Database(#[from] DbError),
    #[error("Error binding tcp listener: {0}")]
    TcpBind(std::io::Error),
    #[error("Error serving server: {0}")]
    TcpServe(std::io::Error),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Environment {
    #[default]
    Development,
    Production,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct Env {
    server_address: IpAddr,
    server_port: u16,
    database_url: String,
    #[serde(default = "default_database_max_connections")]
    database_max_connections: u32,
    #[serde(default)]
    worker_id: u8,
    #[serde(default)]
    process_id: u8,
    #[serde(default)]
    environment: Environment,
    /// `0` disables the reconciler.
    #[serde(default = "default_reconcile_interval_seconds")]
    reconcile_interval_seconds: u64,
    #[serde(default = "default_transaction_timeout_ms")]
    transaction_timeout_ms: u64,
}

fn default_database_max_connections() -> u32 {
    10
}

fn default_reconcile_interval_seconds() -> u64 {
    300
}

fn default_transaction_timeout_ms() -> u64 {
    5000
}

fn default_log_filter(environment: Environment) -> &'static str {
    match environment {
        Environment::Development => {
            "crimewatch_api=debug,\
            crimewatch_common=debug,\
            crimewatch_db=debug,\
            status_transition=info,\
            tower_http=debug,axum::rejection=trace,sqlx=debug"
        }
        Environment::Production => {
            "crimewatch_api=info,\
            crimewatch_db=info,\
            status_transition=info,\
            tower_http=info,sqlx=warn"
        }
    }
}

fn install_tracing(environment: Environment) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_log_filter(environment).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Loads `.env` if there is one. Returns whether a file was found, since
/// tracing is not installed yet.
fn load_dotenv() -> Result<bool, InitError> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(true),
        Err(err) if err.not_found() => Ok(false),
        Err(err) => Err(err.into()),
    }
}

async fn run_reconciler(db: Arc<DbClient>, interval: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            () = shutdown.cancelled() => break,
            result = db.reconcile_all() => match result {
                Ok(summary) => info!(
                    examined = summary.examined,
                    corrected = summary.corrected,
                    "Reconciled posts"
                ),
                Err(err) => error!(error = %err, "Reconciliation failed"),
            },
        }
    }

    debug!("Reconciler stopped");
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(err) => {
                error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
        () = shutdown.cancelled() => {},
    }

    shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<(), InitError> {
    let found_dotenv = load_dotenv()?;
    let env: Env = envy::from_env()?;
    install_tracing(env.environment);
    if !found_dotenv {
        debug!("No .env file found");
    }

    let policy: ScorePolicy = envy::prefixed("SCORE_").from_env()?;
    policy.validate()?;
    debug!(?policy, "Loaded score policy");

    let pool = connect(&env.database_url, env.database_max_connections).await?;
    let db_client = Arc::new(DbClient::new(
        pool,
        WorkerId::try_from(env.worker_id)?,
        ProcessId::try_from(env.process_id)?,
        policy,
        Duration::from_millis(env.transaction_timeout_ms),
    ));
    db_client.migrate().await?;
    info!("Database migrated");

    let shutdown = CancellationToken::new();
    let reconciler = (env.reconcile_interval_seconds > 0).then(|| {
        tokio::spawn(run_reconciler(
            Arc::clone(&db_client),
            Duration::from_secs(env.reconcile_interval_seconds),
            shutdown.child_token(),
        ))
    });

    let state = ServerState { db_client };
    let app = server::routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let server_address = SocketAddr::new(env.server_address, env.server_port);
    let listener = tokio::net::TcpListener::bind(server_address)
        .await
        .map_err(InitError::TcpBind)?;
    info!(%server_address, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .map_err(InitError::TcpServe)?;

    shutdown.cancel();
    if let Some(reconciler) = reconciler
        && let Err(err) = reconciler.await
    {
        error!(error = %err, "Reconciler task failed");
    }

    Ok(())
}
