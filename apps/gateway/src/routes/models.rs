use axum::extract::{Path, State};
use axum::Json;
use gateway_core::ProxyError;
use gateway_protocol::openai::get_model::types::Model;
use gateway_protocol::openai::list_models::response::{ListModelsResponse, ListObjectType};
use gateway_transform::model_map::model_catalog;

use crate::error_response::HttpError;
use crate::state::{unix_now, AppState};

/// `GET /v1/models` (§6.2).
pub async fn list_models(State(_state): State<AppState>) -> Json<ListModelsResponse> {
    Json(ListModelsResponse {
        object: ListObjectType::List,
        data: model_catalog(unix_now()),
    })
}

/// `GET /v1/models/{model}` — not in the core table but a natural companion
/// to `list_models`, mirrored from `GET /v1/models` per-entry lookup.
pub async fn get_model(
    State(_state): State<AppState>,
    Path(model): Path<String>,
) -> Result<Json<Model>, HttpError> {
    model_catalog(unix_now())
        .into_iter()
        .find(|entry| entry.id == model)
        .map(Json)
        .ok_or_else(|| ProxyError::not_found(format!("unknown model: {model}")).into())
}
