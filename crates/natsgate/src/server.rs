//! Router assembly and serving.

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::middleware::from_fn_with_state;
use axum::routing::{any, get};
use natsgate_nats::{FlushClient, PublishClient, RequestClient, SubscribeClient};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Config;
use crate::publish::{PublishHandler, publish_middleware};
use crate::registry::ServerRegistry;
use crate::request::{RequestHandler, handle_request};

pub const HEALTH_PATH: &str = "/healthz";

/// End of the pipeline for fire-and-forget routes.
async fn accepted() -> StatusCode {
    StatusCode::ACCEPTED
}

/// End of the pipeline for request/reply routes. The middleware writes the
/// replies ahead of this empty body.
async fn replied() -> StatusCode {
    StatusCode::OK
}

async fn health() -> &'static str {
    "ok"
}

/// One route per `[[publish]]` and `[[request]]` entry, plus `/healthz`.
pub fn router<N>(registry: Arc<ServerRegistry<N>>, config: &Config) -> Router
where
    N: PublishClient + SubscribeClient + FlushClient + RequestClient,
{
    let mut router = Router::new().route(HEALTH_PATH, get(health));

    for route in &config.publish {
        let handler = PublishHandler::new(Arc::clone(&registry), route.delivery_config());
        info!(
            path = %route.path,
            subject = %route.subject,
            await_response = route.await_response,
            "Publish route"
        );
        let terminal = if route.await_response { any(replied) } else { any(accepted) };
        router = router.merge(
            Router::new()
                .route(&route.path, terminal)
                .route_layer(from_fn_with_state(handler, publish_middleware::<N>)),
        );
    }

    for route in &config.request {
        let handler = RequestHandler::new(Arc::clone(&registry), route.request_config());
        info!(path = %route.path, subject = %route.subject, "Request route");
        router = router.merge(
            Router::new()
                .route(&route.path, any(handle_request::<N>))
                .with_state(handler),
        );
    }

    router
}

pub async fn serve(listener: TcpListener, app: Router) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "natsgate listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let interrupt = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, shutting down"),
            Err(error) => {
                warn!(error = %error, "Cannot listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, shutting down");
            }
            Err(error) => {
                warn!(error = %error, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {}
        _ = terminate => {}
    }
}
