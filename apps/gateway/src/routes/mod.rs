mod admin;
mod auth_mw;
mod chat;
mod health;
mod models;

use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;

use crate::state::AppState;

/// Assembles the full HTTP surface (§4.4, §6.2): three auth tiers layered
/// onto their own route groups, then merged under one router and state.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new().route("/health", get(health::health));

    let client = Router::new()
        .route(
            "/v1/chat/completions",
            post(chat::create_chat_completion),
        )
        .route("/v1/models", get(models::list_models))
        .route("/v1/models/{model}", get(models::get_model))
        .route("/stats", get(health::stats))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_mw::require_client_auth,
        ));

    let admin = Router::new()
        .route(
            "/admin/keys",
            get(admin::list_keys)
                .post(admin::add_key)
                .delete(admin::remove_key),
        )
        .route("/admin/keys/{prefix}", put(admin::set_key_status))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_mw::require_admin_auth,
        ));

    Router::new()
        .merge(public)
        .merge(client)
        .merge(admin)
        .with_state(state)
}
