use axum::{extract::State, response::Json, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::shutdown::{self, ShutdownReceiver};
use crate::state::{HuntState, StatusSnapshot};

pub struct StatusApiState {
    pub hunt: Arc<HuntState>,
    pub max_orders: u32,
}

pub fn router(state: Arc<StatusApiState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/admin/status", get(get_status))
        .with_state(state)
}

/// Serve the read-only status endpoint until shutdown.
pub async fn serve(
    addr: SocketAddr,
    state: Arc<StatusApiState>,
    mut shutdown: ShutdownReceiver,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Status API listening on {}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !shutdown::is_requested(&shutdown) {
                if shutdown.changed().await.is_err() {
                    // Sender gone: nobody can ask us to stop anymore.
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;
    Ok(())
}

async fn root() -> &'static str {
    "gpuhunt orchestrator online"
}

async fn get_status(State(state): State<Arc<StatusApiState>>) -> Json<StatusSnapshot> {
    Json(state.hunt.snapshot(state.max_orders))
}
