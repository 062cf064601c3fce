//! HTTP service exposing `/login`, `/auth`, `/token` and `/me`.
//!
//! All handlers share one [`AppState`]: the OAuth client, the Graph client,
//! the token holder and the outstanding login states.

pub mod handlers;

use crate::auth::graph::GraphClient;
use crate::auth::oauth::OAuth2Client;
use crate::auth::token_store::{PendingStates, TokenHolder};
use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// State shared across all request handlers.
pub struct AppState {
    pub oauth: OAuth2Client,
    pub graph: GraphClient,
    pub tokens: TokenHolder,
    pub pending: PendingStates,
}

impl AppState {
    pub fn new(oauth: OAuth2Client, graph: GraphClient, max_pending_logins: usize) -> Self {
        Self {
            oauth,
            graph,
            tokens: TokenHolder::new(),
            pending: PendingStates::new(max_pending_logins),
        }
    }
}

/// Build the router with request logging applied to every route.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/login", get(handlers::login))
        .route("/auth", get(handlers::auth))
        .route("/token", get(handlers::token))
        .route("/me", get(handlers::me))
        .with_state(state)
        .layer(middleware::from_fn(log_request))
}

/// Serve on `addr` until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Log remote address, method and path of every request.
async fn log_request(request: Request, next: Next) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());

    info!("{} {} {}", remote, request.method(), request.uri().path());
    next.run(request).await
}

/// Every failure is reported as a plain-text 500 carrying the error message.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.requires_sign_in() {
            warn!("{} (sign in again via /login)", self);
        } else {
            error!("Request failed: {}", self);
        }

        (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", self)).into_response()
    }
}
