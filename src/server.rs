//! HTTP endpoint exposing the metrics registry.

use crate::output::prometheus::encode_metrics;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Registry, TEXT_FORMAT};
use std::future::{Future, IntoFuture};
use std::io;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Time given to in-flight scrapes once shutdown starts.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

/// Build the router serving `/metrics` from `registry`.
pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

/// Serve `/metrics` on `listener` until `cancel` fires.
///
/// Open connections get 15 seconds to finish, after which the
/// server is dropped.
pub async fn serve(
    listener: TcpListener,
    registry: Registry,
    cancel: CancellationToken,
) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    let shutdown = cancel.clone();
    let server = axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .into_future();
    shutdown_within(server, &cancel, SHUTDOWN_TIMEOUT).await?;

    info!("HTTP server stopped");
    Ok(())
}

/// Drive `server` to completion, giving up `grace` after `cancel` fires.
async fn shutdown_within<F>(server: F, cancel: &CancellationToken, grace: Duration) -> io::Result<()>
where
    F: Future<Output = io::Result<()>>,
{
    tokio::select! {
        result = server => result,
        _ = async {
            cancel.cancelled().await;
            sleep(grace).await;
        } => {
            warn!(?grace, "HTTP server did not stop in time, closing it");
            Ok(())
        }
    }
}

async fn metrics_handler(State(registry): State<Registry>) -> Response {
    match encode_metrics(&registry) {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Could not encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
