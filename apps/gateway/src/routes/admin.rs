use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gateway_core::ProxyError;
use gateway_pool::{KeyDetail, KeyStatus, PoolError};
use serde::{Deserialize, Serialize};

use crate::error_response::HttpError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AddKeyBody {
    key_to_add: String,
}

#[derive(Deserialize)]
pub struct RemoveKeyBody {
    key_to_remove: String,
}

#[derive(Deserialize)]
pub struct StatusQuery {
    status: Option<String>,
}

#[derive(Deserialize)]
pub struct StatusBody {
    status: Option<String>,
}

#[derive(Serialize)]
struct KeysBody {
    keys: Vec<KeyDetail>,
}

/// `POST /admin/keys` (§6.2): 201 on success, 409 if already present.
pub async fn add_key(
    State(state): State<AppState>,
    Json(body): Json<AddKeyBody>,
) -> Result<Response, HttpError> {
    match state.pool.add(body.key_to_add).await {
        Ok(()) => Ok(http::StatusCode::CREATED.into_response()),
        Err(PoolError::Conflict) => Err(ProxyError::conflict("key already present").into()),
        Err(_) => Err(ProxyError::bad_request("could not add key").into()),
    }
}

/// `DELETE /admin/keys` (§6.2): 404 if the key is absent.
pub async fn remove_key(
    State(state): State<AppState>,
    Json(body): Json<RemoveKeyBody>,
) -> Result<Response, HttpError> {
    match state.pool.remove(&body.key_to_remove).await {
        Ok(()) => Ok(http::StatusCode::NO_CONTENT.into_response()),
        Err(PoolError::NotFound) => Err(ProxyError::not_found("key not found").into()),
        Err(_) => Err(ProxyError::bad_request("could not remove key").into()),
    }
}

/// `PUT /admin/keys/{prefix}` (§6.2): resolves `prefix` to a unique key and
/// sets its status; 404 if the prefix resolves to zero matches.
pub async fn set_key_status(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
    Query(query): Query<StatusQuery>,
    body: Option<Json<StatusBody>>,
) -> Result<Response, HttpError> {
    let raw_status = query
        .status
        .or_else(|| body.and_then(|Json(body)| body.status))
        .ok_or_else(|| ProxyError::bad_request("missing target status"))?;
    let status = parse_status(&raw_status)?;

    match state.pool.set_status(&prefix, status).await {
        Ok(()) => Ok(http::StatusCode::OK.into_response()),
        Err(PoolError::NotFound) => {
            Err(ProxyError::not_found("no key matches the given prefix").into())
        }
        Err(PoolError::Ambiguous) => {
            Err(ProxyError::conflict("prefix matches more than one key").into())
        }
        Err(PoolError::Conflict) => Err(ProxyError::conflict("could not set key status").into()),
    }
}

/// `GET /admin/keys` (§6.2): detailed per-key view, keys always masked.
pub async fn list_keys(State(state): State<AppState>) -> Json<KeysBody> {
    Json(KeysBody {
        keys: state.pool.detailed().await,
    })
}

fn parse_status(raw: &str) -> Result<KeyStatus, ProxyError> {
    match raw.to_ascii_uppercase().as_str() {
        "ACTIVE" => Ok(KeyStatus::Active),
        "COOLING" => Ok(KeyStatus::Cooling),
        "FAILED" => Ok(KeyStatus::Failed),
        other => Err(ProxyError::bad_request(format!(
            "unknown key status: {other}"
        ))),
    }
}
