use bytes::Bytes;
use http::StatusCode;
use serde::Serialize;

/// Internal, abstract error taxonomy (§7). Each variant carries its fixed
/// HTTP status; message text is generic and never includes key material.
#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub body: Bytes,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    message: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
}

fn encode(status: StatusCode, kind: &'static str, message: impl AsRef<str>) -> ProxyError {
    let body = ErrorBody {
        error: ErrorDetail {
            message: message.as_ref(),
            kind,
        },
    };
    let body = serde_json::to_vec(&body).unwrap_or_else(|_| b"{\"error\":{}}".to_vec());
    ProxyError {
        status,
        body: Bytes::from(body),
    }
}

impl ProxyError {
    /// Request did not validate: empty messages, out-of-range fields, `tool_choice`
    /// without `tools`, streaming with `n > 1`, malformed JSON, unsupported path.
    pub fn bad_request(message: impl AsRef<str>) -> Self {
        encode(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn not_found(message: impl AsRef<str>) -> Self {
        encode(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn method_not_allowed(message: impl AsRef<str>) -> Self {
        encode(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", message)
    }

    /// Client auth failed.
    pub fn unauthorized(message: impl AsRef<str>) -> Self {
        encode(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    /// Admin auth failed, or the admin surface has no admin keys configured.
    pub fn forbidden(message: impl AsRef<str>) -> Self {
        encode(StatusCode::FORBIDDEN, "forbidden", message)
    }

    /// Dispatcher ran out of attempts without ever acquiring a key.
    pub fn pool_empty(message: impl AsRef<str>) -> Self {
        encode(StatusCode::SERVICE_UNAVAILABLE, "pool_empty", message)
    }

    /// Every attempt failed with a permission/unauthenticated/invalid-argument
    /// upstream error.
    pub fn upstream_permanent(status: StatusCode, message: impl AsRef<str>) -> Self {
        encode(status, "upstream_permanent", message)
    }

    /// Every attempt failed with a quota-exhausted upstream error.
    pub fn upstream_quota(message: impl AsRef<str>) -> Self {
        encode(StatusCode::TOO_MANY_REQUESTS, "upstream_quota", message)
    }

    /// Every attempt failed with a transient upstream error.
    pub fn upstream_transient(message: impl AsRef<str>) -> Self {
        encode(StatusCode::BAD_GATEWAY, "upstream_transient", message)
    }

    pub fn conflict(message: impl AsRef<str>) -> Self {
        encode(StatusCode::CONFLICT, "conflict", message)
    }
}
