use axum::body::Body;
use axum::response::{IntoResponse, Response};
use gateway_core::ProxyError;

/// `gateway-core` carries no axum dependency, so the status/body pair it
/// produces is wrapped into a real response here, at the edge.
pub struct HttpError(pub ProxyError);

impl From<ProxyError> for HttpError {
    fn from(error: ProxyError) -> Self {
        Self(error)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        Response::builder()
            .status(self.0.status)
            .header("content-type", "application/json")
            .body(Body::from(self.0.body))
            .expect("status and content-type are always valid")
    }
}
