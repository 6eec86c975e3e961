use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use globaltalk_api::middleware::require_auth;
use globaltalk_api::{AppState, AppStateInner, gift, points, ratings};
use globaltalk_gateway::GatewayState;
use globaltalk_gateway::clock::SystemClock;
use globaltalk_gateway::connection;
use globaltalk_gateway::dispatcher::Dispatcher;
use globaltalk_gateway::rooms::RoomRegistry;

#[derive(Clone)]
struct ServerState {
    gateway: GatewayState,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "globaltalk=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("GLOBALTALK_DB_PATH").unwrap_or_else(|_| "globaltalk.db".into());
    let host = std::env::var("GLOBALTALK_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("GLOBALTALK_PORT")
        .unwrap_or_else(|_| "4000".into())
        .parse()?;
    let agora_app_id = std::env::var("GLOBALTALK_AGORA_APP_ID").ok();

    // Init database
    let db = Arc::new(globaltalk_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let rooms = Arc::new(RoomRegistry::new(Arc::new(SystemClock)));
    let gateway = GatewayState {
        dispatcher: dispatcher.clone(),
        rooms,
        db: db.clone(),
        agora_app_id,
    };
    let api_state: AppState = Arc::new(AppStateInner { db, dispatcher });

    // Routes
    let public_routes = Router::new()
        .route("/api/health", get(health))
        .route("/ratings", post(ratings::submit_rating))
        .with_state(api_state.clone());

    let protected_routes = Router::new()
        .route("/gift", post(gift::send_gift))
        .route("/points/history", get(points::points_history))
        .layer(middleware::from_fn(require_auth))
        .with_state(api_state);

    let ws_route = Router::new()
        .route("/socket", get(ws_upgrade))
        .with_state(ServerState { gateway });

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("globaltalk server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "globaltalk",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state.gateway))
}
