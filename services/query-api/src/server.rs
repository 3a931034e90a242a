//! HTTP routes of the query service.

use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::pool::SandboxPool;

/// Statement run by `GET /query`.
pub const QUERY_SQL: &str = "SELECT * FROM testdb";

pub struct AppState {
    pub pool: Arc<SandboxPool>,
}

/// Create the service router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/query", get(query_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state))
}

/// Serve `router` until `signal` resolves. On the signal the pool is closed,
/// so queries still waiting for a sandbox answer 503, and in-flight requests
/// get at most `drain_timeout` to finish.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    router: Router,
    pool: Arc<SandboxPool>,
    signal: F,
    drain_timeout: Duration,
) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    let (drain_tx, drain_rx) = oneshot::channel::<()>();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = drain_rx.await;
        })
        .into_future();
    tokio::pin!(server, signal);

    tokio::select! {
        served = &mut server => return served,
        _ = &mut signal => {}
    }

    info!("Draining in-flight requests");
    let _ = drain_tx.send(());
    pool.close();

    match tokio::time::timeout(drain_timeout, server).await {
        Ok(served) => served,
        Err(_) => {
            warn!(
                timeout_ms = drain_timeout.as_millis() as u64,
                "In-flight requests did not finish in time"
            );
            Ok(())
        }
    }
}

/// GET /query - run the fixed statement in a fresh sandbox
async fn query_handler(Extension(state): Extension<Arc<AppState>>) -> Response {
    match state.pool.execute(QUERY_SQL).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => {
            warn!(error = %e, "Query failed");
            e.into_response()
        }
    }
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "query-api",
    }))
}
