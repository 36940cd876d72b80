//! Quiz arena backend entrypoint wiring REST, SSE, the scheduler and storage.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quiz_arena_back::{
    build_router,
    clock::SystemClock,
    config::AppConfig,
    dao::quiz_store::memory::MemoryQuizStore,
    services::scheduler::Scheduler,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::new(config, Arc::new(SystemClock));

    install_storage(&app_state).await;
    tokio::spawn(Scheduler::new(app_state.clone()).run());

    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Select the storage backend from `QUIZ_STORE` (`mongo` by default).
async fn install_storage(state: &SharedState) {
    let backend = env::var("QUIZ_STORE").unwrap_or_else(|_| "mongo".into());
    match backend.to_ascii_lowercase().as_str() {
        "memory" => {
            warn!("using the in-memory store; data is lost on restart");
            state.install_store(Arc::new(MemoryQuizStore::new())).await;
        }
        #[cfg(feature = "mongo-store")]
        "mongo" | "mongodb" => spawn_mongo_supervisor(state.clone()),
        other => {
            warn!(backend = other, "unsupported storage backend; falling back to memory");
            state.install_store(Arc::new(MemoryQuizStore::new())).await;
        }
    }
}

#[cfg(feature = "mongo-store")]
fn spawn_mongo_supervisor(state: SharedState) {
    use quiz_arena_back::{
        dao::quiz_store::{
            QuizStore,
            mongodb::{MongoQuizStore, connect, ensure_indexes},
        },
        services::storage_supervisor,
    };

    let uri = env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".into());
    let db_name = env::var("MONGO_DB").ok();
    info!(%uri, "using MongoDB storage");

    tokio::spawn(storage_supervisor::run(state, move || {
        let uri = uri.clone();
        let db_name = db_name.clone();
        async move {
            let manager = connect(&uri, db_name.as_deref()).await?;
            ensure_indexes(&manager.database().await).await?;
            Ok(Arc::new(MongoQuizStore::new(manager)) as Arc<dyn QuizStore>)
        }
    }));
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
