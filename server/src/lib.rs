//! muxd: Axum glue around muxcore. One `/ws` endpoint, one connection per
//! socket, dispatch to session create/input/resize/close/detach/tmux ops.

mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use muxcore::config::{self, Config};
use muxcore::registry::SessionRegistry;
use tokio::net::TcpListener;

/// The session registry is shared across every `/ws` connection, the tmux
/// monitors, and the plugin loop — one process, one registry — so
/// `list_by_owner` can see sessions created on a different connection.
#[derive(Clone)]
struct AppState {
    config: &'static Config,
    registry: Arc<SessionRegistry>,
}

#[derive(serde::Deserialize)]
struct WsQuery {
    #[serde(default)]
    owner: Option<String>,
}

async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let owner = query.owner.unwrap_or_default();
    ws.on_upgrade(move |socket| ws::handle_socket(socket, owner, state.registry, state.config))
}

fn build_router() -> Router {
    let config = config::ensure_loaded();
    let state = AppState {
        config,
        registry: Arc::new(SessionRegistry::new()),
    };
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

/// Binds to `addr` and serves `/ws` until the process is terminated.
pub async fn run(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    serve(listener).await
}

/// Serves `/ws` on an already-bound listener. Split out from `run` so tests
/// can bind an ephemeral port (`127.0.0.1:0`) and read back the real address.
pub async fn serve(listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = build_router();
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "muxd listening");
    axum::serve(listener, app).await?;
    Ok(())
}
