use std::env;
use std::net::SocketAddr;

use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SESSION_COOKIE_NAME: &str = "gp_session";
const DEFAULT_SESSION_MAX_AGE_SECONDS: u64 = 2_592_000;
const DEFAULT_SECURE_COOKIES: bool = false;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub backend_base_url: String,
    pub backend_timeout_ms: u64,
    pub session_cookie_name: String,
    pub session_max_age_seconds: u64,
    pub secure_cookies: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid GP_GATEWAY_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("GP_BACKEND_BASE_URL must be set to the backend API base URL")]
    MissingBackendBaseUrl,
}

impl Config {
    /// A missing backend base URL fails here, at boot, rather than surfacing
    /// as a 503 on the first proxied request.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_addr_raw = env::var("GP_GATEWAY_BIND_ADDR")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let bind_addr = bind_addr_raw
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_addr_raw,
                source,
            })?;

        let log_filter = env::var("GP_GATEWAY_LOG_FILTER")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let backend_base_url = env::var("GP_BACKEND_BASE_URL")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .ok_or(ConfigError::MissingBackendBaseUrl)?;

        let backend_timeout_ms = env::var("GP_BACKEND_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_BACKEND_TIMEOUT_MS);

        let session_cookie_name = env::var("GP_SESSION_COOKIE_NAME")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_COOKIE_NAME.to_string());

        let session_max_age_seconds = env::var("GP_SESSION_MAX_AGE_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SESSION_MAX_AGE_SECONDS);

        let secure_cookies = env::var("GP_SECURE_COOKIES")
            .ok()
            .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(DEFAULT_SECURE_COOKIES);

        Ok(Self {
            bind_addr,
            log_filter,
            backend_base_url,
            backend_timeout_ms,
            session_cookie_name,
            session_max_age_seconds,
            secure_cookies,
        })
    }
}

#[cfg(test)]
impl Config {
    #[must_use]
    pub fn for_tests(backend_base_url: String) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            log_filter: "debug".to_string(),
            backend_base_url,
            backend_timeout_ms: 1_000,
            session_cookie_name: DEFAULT_SESSION_COOKIE_NAME.to_string(),
            session_max_age_seconds: DEFAULT_SESSION_MAX_AGE_SECONDS,
            secure_cookies: false,
        }
    }
}
