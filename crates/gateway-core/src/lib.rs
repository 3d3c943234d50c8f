pub mod auth;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod upstream;

pub use auth::{AdminKeySet, AuthContext, AuthProvider, ClientKeySet};
pub use classify::{classify_http_failure, classify_transport_failure, UpstreamErrorKind};
pub use config::{load_from_env, CacheConfig, CliArgs, Config, Environment};
pub use dispatch::Dispatcher;
pub use error::ProxyError;
pub use upstream::{StreamError, StreamItem, UpstreamClient, UpstreamError, WreqUpstreamClient};
