//! Maps upstream HTTP failures onto the pool's failure classes and the
//! dispatcher's terminal HTTP status (§7, §9 "Decorator-based error monitoring").

use gateway_pool::ErrorClass;
use http::StatusCode;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    PermissionDenied,
    Unauthenticated,
    InvalidArgument,
    QuotaExhausted,
    Transient,
}

impl UpstreamErrorKind {
    pub fn pool_class(self) -> ErrorClass {
        match self {
            UpstreamErrorKind::PermissionDenied
            | UpstreamErrorKind::Unauthenticated
            | UpstreamErrorKind::InvalidArgument => ErrorClass::Permanent,
            UpstreamErrorKind::QuotaExhausted => ErrorClass::Quota,
            UpstreamErrorKind::Transient => ErrorClass::Transient,
        }
    }

    /// Status reported to the client once the dispatcher gives up (§4.3 "Terminal
    /// error mapping").
    pub fn terminal_status(self) -> StatusCode {
        match self {
            UpstreamErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            UpstreamErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            UpstreamErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            UpstreamErrorKind::QuotaExhausted => StatusCode::TOO_MANY_REQUESTS,
            UpstreamErrorKind::Transient => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Deserialize, Default)]
struct GoogleErrorEnvelope {
    error: Option<GoogleErrorBody>,
}

#[derive(Deserialize, Default)]
struct GoogleErrorBody {
    status: Option<String>,
}

/// Classifies a failed upstream HTTP response. Prefers the Google API
/// `error.status` string when present (e.g. `RESOURCE_EXHAUSTED`); falls back
/// to the HTTP status code.
pub fn classify_http_failure(status: u16, body: &[u8]) -> UpstreamErrorKind {
    if let Ok(envelope) = serde_json::from_slice::<GoogleErrorEnvelope>(body)
        && let Some(code) = envelope.error.and_then(|e| e.status)
    {
        let code = code.to_ascii_uppercase();
        if code.contains("PERMISSION_DENIED") {
            return UpstreamErrorKind::PermissionDenied;
        }
        if code.contains("UNAUTHENTICATED") {
            return UpstreamErrorKind::Unauthenticated;
        }
        if code.contains("RESOURCE_EXHAUSTED") {
            return UpstreamErrorKind::QuotaExhausted;
        }
        if code.contains("INVALID_ARGUMENT") {
            return UpstreamErrorKind::InvalidArgument;
        }
    }

    match status {
        401 => UpstreamErrorKind::Unauthenticated,
        403 => UpstreamErrorKind::PermissionDenied,
        400 => UpstreamErrorKind::InvalidArgument,
        429 => UpstreamErrorKind::QuotaExhausted,
        _ => UpstreamErrorKind::Transient,
    }
}

/// Classifies a transport-level failure (timeout, connect error, etc.) — always
/// transient; the key still gets backed off since the provider may be unhealthy.
pub fn classify_transport_failure() -> UpstreamErrorKind {
    UpstreamErrorKind::Transient
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_field_takes_precedence_over_http_code() {
        let body = br#"{"error":{"code":429,"status":"RESOURCE_EXHAUSTED","message":"quota"}}"#;
        assert_eq!(
            classify_http_failure(429, body),
            UpstreamErrorKind::QuotaExhausted
        );
    }

    #[test]
    fn falls_back_to_http_status_without_a_body() {
        assert_eq!(classify_http_failure(403, b""), UpstreamErrorKind::PermissionDenied);
        assert_eq!(classify_http_failure(500, b""), UpstreamErrorKind::Transient);
    }
}
