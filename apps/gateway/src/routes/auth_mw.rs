use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use gateway_core::AuthProvider;

use crate::error_response::HttpError;
use crate::state::AppState;

pub async fn require_client_auth(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, HttpError> {
    state.client_auth.authenticate(request.headers())?;
    Ok(next.run(request).await)
}

pub async fn require_admin_auth(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, HttpError> {
    state.admin_auth.authenticate(request.headers())?;
    Ok(next.run(request).await)
}
