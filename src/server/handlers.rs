//! Route handlers for the sign-in service.

use super::AppState;
use crate::auth::oauth::{generate_state, CallbackParams, Token};
use crate::error::{AppError, AuthError, UsageError};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{debug, info};

/// GET /login: redirect the browser to the consent page.
pub async fn login(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let login_state = generate_state();
    let auth_url = state.oauth.authorization_url(&login_state)?;
    state.pending.insert(login_state);
    debug!("{} login(s) pending", state.pending.len());

    Ok((StatusCode::FOUND, [(header::LOCATION, auth_url.to_string())]).into_response())
}

/// GET /auth: OAuth redirect target, exchanges the code and keeps the token.
pub async fn auth(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<Token>, AppError> {
    let code = params.into_authorization_code()?;
    state.pending.redeem(code.state.as_deref())?;

    let token = state.oauth.exchange_code(&code.code).await?;
    state.tokens.set(token.clone());
    info!("Signed in, token stored");

    Ok(Json(token))
}

/// GET /token: the held token, or `null` before the first sign-in.
pub async fn token(State(state): State<Arc<AppState>>) -> Json<Option<Token>> {
    Json(state.tokens.get())
}

/// GET /me: the Graph profile of the signed-in user, passed through verbatim.
pub async fn me(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let token = current_token(&state).await?;
    let body = state.graph.fetch_profile(&token.access_token).await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response())
}

/// The held token, refreshed first if it has expired.
async fn current_token(state: &AppState) -> Result<Token, AppError> {
    let token = state.tokens.get().ok_or(UsageError::NotSignedIn)?;
    if !token.is_expired() {
        return Ok(token);
    }

    let refresh_token = token.refresh_token.as_deref().ok_or(AuthError::TokenExpired)?;
    info!("Access token expired, refreshing");
    let refreshed = state.oauth.refresh_token(refresh_token).await?;

    Ok(state.tokens.replace_if_current(&token.access_token, refreshed))
}
