//! HertzBoard - realtime collaborative whiteboard backend
//!
//! Server bootstrap: load config, connect the persistence backend, build
//! the Hub and Dispatcher, and serve the `/ws` upgrade endpoint. Full
//! REST routing is out of scope; this is the minimal I/O layer that
//! hands an upgraded socket to a Session.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use hertzboard::auth::{AllowAllAuthenticator, Authenticator, ConnectionCredential, Role, StaticAuthorizer};
use hertzboard::clock::LamportClock;
use hertzboard::config::Config;
use hertzboard::crdt::CrdtEngine;
use hertzboard::dispatcher::Dispatcher;
use hertzboard::hub::Hub;
use hertzboard::replica::{InProcessReplicaBus, RedisReplicaBus, ReplicaBus};
use hertzboard::store::memory::{MemoryElementStore, MemoryOperationLogStore};
use hertzboard::store::postgres::{PostgresConfig, PostgresElementStore, PostgresOperationLogStore, PostgresPool};
use hertzboard::store::{ElementStore, OperationLogStore};
use std::panic;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    authenticator: Arc<dyn Authenticator>,
    dispatcher: Arc<Dispatcher>,
    hub: Arc<Hub>,
    config: Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("HertzBoard Fatal Error:");
        eprintln!("{panic_info}");
        if let Some(location) = panic_info.location() {
            eprintln!("Location: {}:{}:{}", location.file(), location.line(), location.column());
        }
        eprintln!("\nPlease report this error at: https://github.com/hertzboard/hertzboard/issues");
    }));

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("═══════════════════════════════════════════════════════════");
    log::info!("  HertzBoard - Realtime Collaborative Whiteboard Backend");
    log::info!("  Version: {}", hertzboard::VERSION);
    log::info!("═══════════════════════════════════════════════════════════");

    let config = Config::from_env();
    log::info!("Listening on {}", config.bind_addr);

    let (log_store, element_store): (Arc<dyn OperationLogStore>, Arc<dyn ElementStore>) =
        build_stores(&config).await?;

    let replica_bus: Arc<dyn ReplicaBus> = match &config.redis_url {
        Some(redis_url) => {
            log::info!("Replica bus: Redis pub/sub");
            Arc::new(RedisReplicaBus::connect(redis_url).await?)
        }
        None => {
            log::info!("Replica bus: in-process (single-replica mode)");
            Arc::new(InProcessReplicaBus::new())
        }
    };

    let hub = Hub::new(replica_bus, config.clone());
    let engine = Arc::new(CrdtEngine::new(LamportClock::new(), log_store, element_store));

    // Production identity wiring (JWT verification, DB-backed role
    // lookup) is out of scope; these doubles authenticate and authorize
    // every connection, matching a local/dev deployment.
    let authenticator: Arc<dyn Authenticator> =
        Arc::new(AllowAllAuthenticator::new(Uuid::new_v4(), "Guest".to_string()));
    let authorizer = Arc::new(StaticAuthorizer::new(Some(Role::Owner)));
    let dispatcher = Arc::new(Dispatcher::new(hub.clone(), engine, authorizer, config.sync_batch_limit));

    let state = AppState {
        authenticator,
        dispatcher,
        hub,
        config: config.clone(),
    };

    let app = Router::new().route("/ws", get(ws_upgrade)).with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr.as_str()).await?;

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("shutdown signal received, draining connections");
        let _ = shutdown_tx.send(());
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            tokio::time::sleep(config.shutdown_drain).await;
        })
        .await?;

    log::info!("═══════════════════════════════════════════════════════════");
    log::info!("  HertzBoard shutdown complete");
    log::info!("═══════════════════════════════════════════════════════════");
    Ok(())
}

async fn build_stores(
    config: &Config,
) -> anyhow::Result<(Arc<dyn OperationLogStore>, Arc<dyn ElementStore>)> {
    if config.database_url.is_empty() {
        log::warn!("no database configured; using in-memory stores (data does not survive a restart)");
        return Ok((
            Arc::new(MemoryOperationLogStore::new()),
            Arc::new(MemoryElementStore::new()),
        ));
    }

    let pg_config = PostgresConfig {
        url: config.database_url.clone(),
        ..PostgresConfig::default()
    };
    let pool = PostgresPool::connect(&pg_config).await?;
    pool.migrate().await?;

    Ok((
        Arc::new(PostgresOperationLogStore::new(pool.pool().clone())),
        Arc::new(PostgresElementStore::new(pool.pool().clone())),
    ))
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        hertzboard::session::run(
            socket,
            ConnectionCredential(String::new()),
            state.authenticator,
            state.dispatcher,
            state.hub,
            state.config,
        )
        .await;
    })
}
