use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use gateway_core::{AdminKeySet, ClientKeySet, Config, Dispatcher, WreqUpstreamClient};
use gateway_pool::CredentialPool;

/// Everything a request handler needs, shared across the whole process.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher<WreqUpstreamClient>>,
    pub pool: Arc<CredentialPool>,
    pub client_auth: Arc<ClientKeySet>,
    pub admin_auth: Arc<AdminKeySet>,
    pub started_at: SystemTime,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn uptime_secs(&self) -> u64 {
        self.started_at
            .elapsed()
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
