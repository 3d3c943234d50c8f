use std::collections::HashSet;

use http::HeaderMap;

use crate::error::ProxyError;

#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub key_id: Option<String>,
}

pub trait AuthProvider: Send + Sync {
    #[allow(clippy::result_large_err)]
    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, ProxyError>;
}

/// Client auth backing `SECURITY_ADAPTER_API_KEYS`: an empty set means
/// insecure mode (all requests allowed, logged once at startup).
#[derive(Debug)]
pub struct ClientKeySet {
    keys: HashSet<String>,
    insecure: bool,
}

impl ClientKeySet {
    pub fn new(keys: Vec<String>) -> Self {
        let insecure = keys.is_empty();
        if insecure {
            tracing::warn!(
                "SECURITY_ADAPTER_API_KEYS is empty: running in insecure mode, all client requests allowed"
            );
        }
        Self {
            keys: keys.into_iter().collect(),
            insecure,
        }
    }
}

impl AuthProvider for ClientKeySet {
    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, ProxyError> {
        if self.insecure {
            return Ok(AuthContext::default());
        }

        let key = extract_api_key(headers)
            .ok_or_else(|| ProxyError::unauthorized("missing api key"))?;
        if self.keys.contains(&key) {
            Ok(AuthContext { key_id: Some(key) })
        } else {
            Err(ProxyError::unauthorized("invalid api key"))
        }
    }
}

/// Admin auth backing `SECURITY_ADMIN_API_KEYS`: an empty set means the
/// admin surface is disabled entirely (every request is 403).
#[derive(Debug)]
pub struct AdminKeySet {
    keys: HashSet<String>,
}

impl AdminKeySet {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }
}

impl AuthProvider for AdminKeySet {
    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, ProxyError> {
        if self.keys.is_empty() {
            return Err(ProxyError::forbidden("admin interface disabled"));
        }

        let key =
            extract_api_key(headers).ok_or_else(|| ProxyError::forbidden("missing admin key"))?;
        if self.keys.contains(&key) {
            Ok(AuthContext { key_id: Some(key) })
        } else {
            Err(ProxyError::forbidden("invalid admin key"))
        }
    }
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = header_value(headers, "x-api-key") {
        return Some(value);
    }

    let auth = header_value(headers, "authorization")?;
    let auth = auth.trim();
    if let Some(token) = auth.strip_prefix("Bearer ") {
        return Some(token.trim().to_string());
    }
    if let Some(token) = auth.strip_prefix("bearer ") {
        return Some(token.trim().to_string());
    }
    None
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with_bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            format!("Bearer {token}").parse().unwrap(),
        );
        headers
    }

    #[test]
    fn insecure_mode_allows_any_request() {
        let auth = ClientKeySet::new(Vec::new());
        assert!(auth.authenticate(&HeaderMap::new()).is_ok());
    }

    #[test]
    fn configured_keys_reject_unknown_tokens() {
        let auth = ClientKeySet::new(vec!["sk-good".to_string()]);
        assert!(auth.authenticate(&headers_with_bearer("sk-bad")).is_err());
        assert!(auth.authenticate(&headers_with_bearer("sk-good")).is_ok());
    }

    #[test]
    fn admin_with_no_keys_is_forbidden() {
        let auth = AdminKeySet::new(Vec::new());
        assert!(auth.authenticate(&headers_with_bearer("anything")).is_err());
    }
}
