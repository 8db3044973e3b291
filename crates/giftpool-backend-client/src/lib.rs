//! HTTP client for the Giftpool backend API.
//!
//! The gateway never talks to the backend directly; every call goes through
//! [`BackendClient`], which owns base-url normalization, bearer attachment,
//! timeouts and the normalization of backend error bodies into the
//! [`BackendError`] taxonomy.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_REQUEST_ATTEMPTS: usize = 2;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone)]
pub struct BackendClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub request_attempts: usize,
}

impl BackendClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            request_attempts: DEFAULT_REQUEST_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: String,
    timeout: Duration,
    request_attempts: usize,
    http: reqwest::Client,
}

/// Outcome taxonomy for backend calls. The UI only ever sees one of these,
/// never a raw transport error.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend_base_url_missing")]
    BaseUrlMissing,
    #[error("backend_invalid_path")]
    InvalidPath,
    #[error("{message}")]
    Validation { message: String },
    #[error("Unauthenticated.")]
    Unauthenticated,
    #[error("{message}")]
    Unauthorized { message: String },
    #[error("{message}")]
    NotFound { message: String },
    #[error("{message}")]
    Conflict { message: String },
    #[error("{message}")]
    ServiceUnavailable { message: String },
    #[error("backend_missing_access_token")]
    MissingToken,
    #[error("backend_json_decode_failed:{message}")]
    Decode { message: String },
}

impl BackendError {
    /// HTTP status the gateway should answer with for this outcome.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BaseUrlMissing | Self::ServiceUnavailable { .. } => 503,
            Self::InvalidPath | Self::Validation { .. } => 400,
            Self::Unauthenticated => 401,
            Self::Unauthorized { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::MissingToken => 502,
            Self::Decode { .. } => 502,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wishlist {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub public_slug: String,
    #[serde(default)]
    pub deadline: Option<String>,
    #[serde(default)]
    pub item_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WishlistCreate {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub wishlist_id: String,
    pub title: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub product_url: Option<String>,
    #[serde(default = "default_allow_contributions")]
    pub allow_contributions: bool,
    #[serde(default)]
    pub reserved_total: f64,
    #[serde(default)]
    pub contributors_count: u32,
}

fn default_allow_contributions() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemCreate {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_url: Option<String>,
    #[serde(default = "default_allow_contributions")]
    pub allow_contributions: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicWishlist {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub amount: f64,
    #[serde(default)]
    pub is_full_reservation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest_name: Option<String>,
}

/// Form fields the real-time transport's client library sends when asking
/// for a channel authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelAuthForm {
    pub socket_id: String,
    pub channel_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<String>,
}

/// The backend's channel-authorization answer, relayed verbatim: the signed
/// auth object (or error body) plus the upstream HTTP status.
#[derive(Debug, Clone)]
pub struct ChannelAuthRelay {
    pub status: u16,
    pub body: serde_json::Value,
}

impl BackendClient {
    pub fn new(config: BackendClientConfig) -> Result<Self, BackendError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            timeout: Duration::from_millis(config.timeout_ms.max(250)),
            request_attempts: config.request_attempts.max(1),
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<String, BackendError> {
        let token: TokenResponse = self
            .post_json("/api/auth/login", request, None, "Login failed")
            .await?;
        match token.access_token {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(BackendError::MissingToken),
        }
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<(), BackendError> {
        let _: serde_json::Value = self
            .post_json("/api/auth/register", request, None, "Registration failed")
            .await?;
        Ok(())
    }

    pub async fn current_user(&self, bearer: &str) -> Result<UserProfile, BackendError> {
        self.get_json("/api/users/me", Some(bearer), "Failed to load profile")
            .await
    }

    pub async fn update_current_user(
        &self,
        bearer: &str,
        patch: &serde_json::Value,
    ) -> Result<UserProfile, BackendError> {
        self.send_json(
            reqwest::Method::PATCH,
            "/api/users/me",
            patch,
            Some(bearer),
            "Failed to update profile",
        )
        .await
    }

    pub async fn list_wishlists(&self, bearer: &str) -> Result<Vec<Wishlist>, BackendError> {
        self.get_json("/api/wishlists", Some(bearer), "Failed to load wishlists")
            .await
    }

    pub async fn create_wishlist(
        &self,
        bearer: &str,
        request: &WishlistCreate,
    ) -> Result<Wishlist, BackendError> {
        self.post_json(
            "/api/wishlists",
            request,
            Some(bearer),
            "Failed to create wishlist",
        )
        .await
    }

    pub async fn get_wishlist(&self, bearer: &str, id: &str) -> Result<Wishlist, BackendError> {
        self.get_json(
            &format!("/api/wishlists/{}", id.trim()),
            Some(bearer),
            "Failed to load wishlist",
        )
        .await
    }

    pub async fn list_items(&self, bearer: &str, wishlist_id: &str) -> Result<Vec<Item>, BackendError> {
        self.get_json(
            &format!("/api/wishlists/{}/items", wishlist_id.trim()),
            Some(bearer),
            "Failed to load items",
        )
        .await
    }

    pub async fn create_item(
        &self,
        bearer: &str,
        wishlist_id: &str,
        request: &ItemCreate,
    ) -> Result<Item, BackendError> {
        self.post_json(
            &format!("/api/wishlists/{}/items", wishlist_id.trim()),
            request,
            Some(bearer),
            "Failed to add item",
        )
        .await
    }

    pub async fn delete_item(
        &self,
        bearer: &str,
        wishlist_id: &str,
        item_id: &str,
    ) -> Result<(), BackendError> {
        let path = format!(
            "/api/wishlists/{}/items/{}",
            wishlist_id.trim(),
            item_id.trim()
        );
        let url = self.endpoint(&path).ok_or(BackendError::InvalidPath)?;
        let response = self
            .http
            .delete(url)
            .header("x-request-id", request_id())
            .header(AUTHORIZATION, format!("Bearer {bearer}"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let bytes = response.bytes().await.unwrap_or_default();
        Err(error_from_status(status, &bytes, "Failed to delete item"))
    }

    pub async fn public_wishlist_by_slug(&self, slug: &str) -> Result<PublicWishlist, BackendError> {
        self.get_json(
            &format!("/api/public/wishlists/by-slug/{}", slug.trim()),
            None,
            "Wishlist not found",
        )
        .await
    }

    /// Reservation/contribution writes are anonymous: guests carry no bearer.
    /// Sent exactly once; a retried contribution could commit money twice.
    pub async fn create_reservation(
        &self,
        wishlist_id: &str,
        item_id: &str,
        request: &ReservationRequest,
    ) -> Result<serde_json::Value, BackendError> {
        let path = format!(
            "/api/wishlists/{}/items/{}/reservations",
            wishlist_id.trim(),
            item_id.trim()
        );
        self.send_json(
            reqwest::Method::POST,
            &path,
            request,
            None,
            "Failed to save the reservation",
        )
        .await
    }

    /// Relay a channel-authorization request. The backend expects form
    /// encoding and answers with a signed auth object; both the body and the
    /// HTTP status come back untouched so the transport client sees exactly
    /// what the backend decided.
    pub async fn authorize_channel(
        &self,
        form: &ChannelAuthForm,
        bearer: Option<&str>,
    ) -> Result<ChannelAuthRelay, BackendError> {
        let url = self
            .endpoint("/api/pusher/auth")
            .ok_or(BackendError::InvalidPath)?;
        let body = serde_urlencoded::to_string(form).map_err(|error| BackendError::Decode {
            message: error.to_string(),
        })?;

        let mut request = self
            .http
            .post(url)
            .header("x-request-id", request_id())
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .timeout(self.timeout)
            .body(body);
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.unwrap_or_default();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        Ok(ChannelAuthRelay { status, body })
    }

    pub async fn get_json<T>(
        &self,
        path: &str,
        bearer: Option<&str>,
        fallback: &str,
    ) -> Result<T, BackendError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let url = self.endpoint(path).ok_or(BackendError::InvalidPath)?;
        let mut last_error: Option<String> = None;

        for attempt in 0..self.request_attempts {
            let mut request = self
                .http
                .get(url.as_str())
                .header("x-request-id", request_id())
                .timeout(self.timeout);
            if let Some(token) = bearer {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }

            match request.send().await {
                Ok(response) => return decode_json_response(response, fallback).await,
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt + 1 >= self.request_attempts {
                        break;
                    }
                }
            }
        }

        Err(BackendError::ServiceUnavailable {
            message: last_error.unwrap_or_else(|| "unknown".to_string()),
        })
    }

    pub async fn post_json<Req, Res>(
        &self,
        path: &str,
        payload: &Req,
        bearer: Option<&str>,
        fallback: &str,
    ) -> Result<Res, BackendError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        self.send_json(reqwest::Method::POST, path, payload, bearer, fallback)
            .await
    }

    async fn send_json<Req, Res>(
        &self,
        method: reqwest::Method,
        path: &str,
        payload: &Req,
        bearer: Option<&str>,
        fallback: &str,
    ) -> Result<Res, BackendError>
    where
        Req: Serialize + ?Sized,
        Res: for<'de> serde::Deserialize<'de>,
    {
        let url = self.endpoint(path).ok_or(BackendError::InvalidPath)?;
        let mut request = self
            .http
            .request(method, url)
            .header("x-request-id", request_id())
            .timeout(self.timeout)
            .json(payload);
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(transport_error)?;
        decode_json_response(response, fallback).await
    }
}

fn request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn transport_error(error: reqwest::Error) -> BackendError {
    BackendError::ServiceUnavailable {
        message: error.to_string(),
    }
}

fn normalize_base_url(base_url: &str) -> Result<String, BackendError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(BackendError::BaseUrlMissing);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

async fn decode_json_response<T>(
    response: reqwest::Response,
    fallback: &str,
) -> Result<T, BackendError>
where
    T: for<'de> serde::Deserialize<'de>,
{
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| BackendError::ServiceUnavailable {
            message: error.to_string(),
        })?;

    if !status.is_success() {
        return Err(error_from_status(status, &bytes, fallback));
    }

    serde_json::from_slice::<T>(&bytes).map_err(|error| BackendError::Decode {
        message: error.to_string(),
    })
}

/// Map a non-2xx backend response to the error taxonomy. 5xx never surfaces
/// the raw body to the caller; everything else carries the normalized detail.
fn error_from_status(status: StatusCode, body: &[u8], fallback: &str) -> BackendError {
    if status.is_server_error() {
        return BackendError::ServiceUnavailable {
            message: "The service is temporarily unavailable. Try again later.".to_string(),
        };
    }

    let message = normalize_error_detail(body, fallback);
    match status.as_u16() {
        401 => BackendError::Unauthenticated,
        403 => BackendError::Unauthorized { message },
        404 => BackendError::NotFound { message },
        409 => BackendError::Conflict { message },
        _ => BackendError::Validation { message },
    }
}

/// The backend reports errors in three shapes: a plain `detail` string, a
/// list of strings, or a structured validation list of `{loc, msg, type}`
/// objects. All of them collapse to one human-readable message.
#[must_use]
pub fn normalize_error_detail(body: &[u8], fallback: &str) -> String {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return fallback.to_string();
    };

    let detail = value.get("detail").or_else(|| value.get("error"));
    match detail {
        Some(serde_json::Value::String(message)) if !message.trim().is_empty() => {
            message.trim().to_string()
        }
        Some(serde_json::Value::Array(entries)) => entries
            .iter()
            .find_map(|entry| match entry {
                serde_json::Value::String(message) if !message.trim().is_empty() => {
                    Some(message.trim().to_string())
                }
                serde_json::Value::Object(fields) => fields
                    .get("msg")
                    .and_then(serde_json::Value::as_str)
                    .map(|msg| msg.trim().to_string())
                    .filter(|msg| !msg.is_empty()),
                _ => None,
            })
            .unwrap_or_else(|| fallback.to_string()),
        _ => fallback.to_string(),
    }
}
