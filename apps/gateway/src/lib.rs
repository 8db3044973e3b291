//! Giftpool session-bridging gateway.
//!
//! Sits between the browser and the backend API: turns the backend's bearer
//! token into an httpOnly cookie session, forwards it on proxied calls,
//! relays channel-authorization requests, and guards page routes with the
//! (session x path-class) redirect state machine in [`session`].

pub mod config;

mod api_envelope;
mod session;
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::body::Bytes;
use axum::extract::{Extension, Path, Request, State};
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use giftpool_backend_client::{
    BackendClient, BackendClientConfig, BackendError, ChannelAuthForm, ItemCreate, LoginRequest,
    RegisterRequest, ReservationRequest, WishlistCreate,
};

use crate::api_envelope::{
    ApiErrorCode, ApiErrorTuple, error_response, error_response_with_status, unauthorized_error,
    validation_error,
};
use crate::config::Config;
use crate::session::{
    DEFAULT_RETURN_TARGET, GuardDecision, SessionContext, clear_cookie, guard_decision,
    sanitize_return_target, session_cookie,
};

pub const SERVICE_NAME: &str = "giftpool-gateway";

const REQUEST_TIMEOUT_SECONDS: u64 = 30;

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    backend: BackendClient,
    started_at: SystemTime,
}

pub fn build_router(config: Config) -> Result<Router, BackendError> {
    let backend = BackendClient::new(BackendClientConfig {
        base_url: config.backend_base_url.clone(),
        timeout_ms: config.backend_timeout_ms,
        request_attempts: giftpool_backend_client::DEFAULT_REQUEST_ATTEMPTS,
    })?;
    let state = AppState {
        config: Arc::new(config),
        backend,
        started_at: SystemTime::now(),
    };
    let guard_state = state.clone();
    let session_state = state.clone();

    let page_router = Router::new()
        .route("/", get(page_landing))
        .route("/login", get(page_login))
        .route("/register", get(page_register))
        .route("/dashboard", get(page_dashboard))
        .route("/dashboard/wishlists/:id", get(page_wishlist_detail))
        .route("/w/:slug", get(page_public_wishlist))
        .route_layer(middleware::from_fn_with_state(guard_state, page_guard_gate));

    let auth_api_router = Router::new()
        .route("/api/auth/login", post(auth_login))
        .route("/api/auth/register", post(auth_register))
        .route("/api/auth/logout", post(auth_logout));

    let owner_api_router = Router::new()
        .route("/api/users/me", get(users_me_show).patch(users_me_update))
        .route("/api/wishlists", get(wishlists_index).post(wishlists_create))
        .route("/api/wishlists/:id", get(wishlists_show))
        .route(
            "/api/wishlists/:id/items",
            get(items_index).post(items_create),
        )
        .route("/api/wishlists/:id/items/:item_id", delete(items_delete))
        .route_layer(middleware::from_fn_with_state(
            session_state,
            session_required_gate,
        ));

    let guest_api_router = Router::new()
        .route("/api/public/wishlists/by-slug/:slug", get(public_wishlist_show))
        .route(
            "/api/wishlists/:id/items/:item_id/reservations",
            post(reservations_create),
        )
        .route("/api/pusher/auth", post(pusher_auth));

    Ok(Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(readiness))
        .merge(page_router)
        .merge(auth_api_router)
        .merge(owner_api_router)
        .merge(guest_api_router)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(
                    REQUEST_TIMEOUT_SECONDS,
                ))),
        ))
}

// --- Route guard -----------------------------------------------------------

async fn page_guard_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let has_session = SessionContext::from_headers(request.headers(), &state.config.session_cookie_name)
        .is_authenticated();
    match guard_decision(has_session, request.uri().path()) {
        GuardDecision::Allow => next.run(request).await,
        GuardDecision::RedirectToDashboard => {
            Redirect::temporary(DEFAULT_RETURN_TARGET).into_response()
        }
        GuardDecision::RedirectToLogin { from } => {
            let query =
                serde_urlencoded::to_string([("from", from.as_str())]).unwrap_or_default();
            Redirect::temporary(&format!("/login?{query}")).into_response()
        }
    }
}

/// Authenticated proxy routes reject locally; the backend is not contacted
/// when the cookie is absent.
async fn session_required_gate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let session =
        SessionContext::from_headers(request.headers(), &state.config.session_cookie_name);
    if !session.is_authenticated() {
        return unauthorized_error("Authentication required.").into_response();
    }
    request.extensions_mut().insert(session);
    next.run(request).await
}

// --- Pages -----------------------------------------------------------------

fn shell(title: &str) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{title}</title></head><body data-app=\"giftpool\"></body></html>"
    ))
}

async fn page_landing() -> Html<String> {
    shell("Giftpool")
}

async fn page_login() -> Html<String> {
    shell("Sign in - Giftpool")
}

async fn page_register() -> Html<String> {
    shell("Create account - Giftpool")
}

async fn page_dashboard() -> Html<String> {
    shell("Dashboard - Giftpool")
}

async fn page_wishlist_detail(Path(_id): Path<String>) -> Html<String> {
    shell("Wishlist - Giftpool")
}

async fn page_public_wishlist(Path(_slug): Path<String>) -> Html<String> {
    shell("Wishlist - Giftpool")
}

// --- Auth ------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LoginBody {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    from: Option<String>,
}

async fn auth_login(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: LoginBody = match parse_json_body(&body) {
        Ok(value) => value,
        Err(error) => return error.into_response(),
    };
    let Some(email) = payload
        .email
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return validation_error("email", "Email is required.").into_response();
    };
    let Some(password) = payload.password.as_deref().filter(|value| !value.is_empty()) else {
        return validation_error("password", "Password is required.").into_response();
    };

    let request = LoginRequest {
        email: email.to_string(),
        password: password.to_string(),
    };
    match state.backend.login(&request).await {
        Ok(access_token) => {
            let redirect_to = sanitize_return_target(payload.from.as_deref());
            let cookie = session_cookie(
                &state.config.session_cookie_name,
                &access_token,
                state.config.session_max_age_seconds,
                state.config.secure_cookies,
            );
            json_with_cookie(json!({ "ok": true, "redirect_to": redirect_to }), &cookie)
        }
        Err(error) => backend_error_response(&error).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct RegisterBody {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

/// Registration succeeds even when the follow-up sign-in fails; the caller
/// gets `{ok:true}` without a cookie and signs in manually.
async fn auth_register(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: RegisterBody = match parse_json_body(&body) {
        Ok(value) => value,
        Err(error) => return error.into_response(),
    };
    let Some(email) = payload
        .email
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return validation_error("email", "Email is required.").into_response();
    };
    let Some(password) = payload.password.as_deref().filter(|value| !value.is_empty()) else {
        return validation_error("password", "Password is required.").into_response();
    };

    let request = RegisterRequest {
        email: email.to_string(),
        password: password.to_string(),
        name: payload.name.unwrap_or_default().trim().to_string(),
    };
    if let Err(error) = state.backend.register(&request).await {
        return backend_error_response(&error).into_response();
    }

    let login = LoginRequest {
        email: email.to_string(),
        password: password.to_string(),
    };
    match state.backend.login(&login).await {
        Ok(access_token) => {
            let cookie = session_cookie(
                &state.config.session_cookie_name,
                &access_token,
                state.config.session_max_age_seconds,
                state.config.secure_cookies,
            );
            json_with_cookie(json!({ "ok": true }), &cookie)
        }
        Err(error) => {
            tracing::warn!(error = %error, "auto-login after registration failed");
            Json(json!({ "ok": true })).into_response()
        }
    }
}

async fn auth_logout(State(state): State<AppState>) -> Response {
    let cookie = clear_cookie(
        &state.config.session_cookie_name,
        state.config.secure_cookies,
    );
    json_with_cookie(json!({ "ok": true }), &cookie)
}

// --- Proxied owner API -----------------------------------------------------

async fn users_me_show(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Response {
    let Some(bearer) = session.bearer() else {
        return unauthorized_error("Authentication required.").into_response();
    };
    match state.backend.current_user(bearer).await {
        Ok(profile) => Json(profile).into_response(),
        Err(error) => backend_error_response(&error).into_response(),
    }
}

async fn users_me_update(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    body: Bytes,
) -> Response {
    let Some(bearer) = session.bearer() else {
        return unauthorized_error("Authentication required.").into_response();
    };
    let patch: serde_json::Value = match parse_json_body(&body) {
        Ok(value) => value,
        Err(error) => return error.into_response(),
    };
    match state.backend.update_current_user(bearer, &patch).await {
        Ok(profile) => Json(profile).into_response(),
        Err(error) => backend_error_response(&error).into_response(),
    }
}

async fn wishlists_index(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Response {
    let Some(bearer) = session.bearer() else {
        return unauthorized_error("Authentication required.").into_response();
    };
    match state.backend.list_wishlists(bearer).await {
        Ok(wishlists) => Json(wishlists).into_response(),
        Err(error) => backend_error_response(&error).into_response(),
    }
}

async fn wishlists_create(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    body: Bytes,
) -> Response {
    let Some(bearer) = session.bearer() else {
        return unauthorized_error("Authentication required.").into_response();
    };
    let request: WishlistCreate = match parse_json_body(&body) {
        Ok(value) => value,
        Err(error) => return error.into_response(),
    };
    if request.title.trim().is_empty() {
        return validation_error("title", "Title is required.").into_response();
    }
    match state.backend.create_wishlist(bearer, &request).await {
        Ok(wishlist) => (StatusCode::CREATED, Json(wishlist)).into_response(),
        Err(error) => backend_error_response(&error).into_response(),
    }
}

async fn wishlists_show(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
) -> Response {
    let Some(bearer) = session.bearer() else {
        return unauthorized_error("Authentication required.").into_response();
    };
    match state.backend.get_wishlist(bearer, &id).await {
        Ok(wishlist) => Json(wishlist).into_response(),
        Err(error) => backend_error_response(&error).into_response(),
    }
}

async fn items_index(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
) -> Response {
    let Some(bearer) = session.bearer() else {
        return unauthorized_error("Authentication required.").into_response();
    };
    match state.backend.list_items(bearer, &id).await {
        Ok(items) => Json(items).into_response(),
        Err(error) => backend_error_response(&error).into_response(),
    }
}

async fn items_create(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let Some(bearer) = session.bearer() else {
        return unauthorized_error("Authentication required.").into_response();
    };
    let request: ItemCreate = match parse_json_body(&body) {
        Ok(value) => value,
        Err(error) => return error.into_response(),
    };
    if request.title.trim().is_empty() {
        return validation_error("title", "Title is required.").into_response();
    }
    match state.backend.create_item(bearer, &id, &request).await {
        Ok(item) => (StatusCode::CREATED, Json(item)).into_response(),
        Err(error) => backend_error_response(&error).into_response(),
    }
}

async fn items_delete(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Path((id, item_id)): Path<(String, String)>,
) -> Response {
    let Some(bearer) = session.bearer() else {
        return unauthorized_error("Authentication required.").into_response();
    };
    match state.backend.delete_item(bearer, &id, &item_id).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(error) => backend_error_response(&error).into_response(),
    }
}

// --- Guest API -------------------------------------------------------------

async fn public_wishlist_show(State(state): State<AppState>, Path(slug): Path<String>) -> Response {
    match state.backend.public_wishlist_by_slug(&slug).await {
        Ok(wishlist) => Json(wishlist).into_response(),
        Err(error) => backend_error_response(&error).into_response(),
    }
}

async fn reservations_create(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let request: ReservationRequest = match parse_json_body(&body) {
        Ok(value) => value,
        Err(error) => return error.into_response(),
    };
    if !request.amount.is_finite() || request.amount <= 0.0 {
        return validation_error("amount", "Enter a valid amount.").into_response();
    }
    match state.backend.create_reservation(&id, &item_id, &request).await {
        Ok(reservation) => (StatusCode::CREATED, Json(reservation)).into_response(),
        Err(error) => backend_error_response(&error).into_response(),
    }
}

/// Channel authorizer relay. The transport's JS client posts form data, some
/// wrappers post JSON; both are re-encoded as form data for the backend. The
/// bearer is attached only when a session cookie is present, and the signed
/// answer comes back with the upstream status untouched.
async fn pusher_auth(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    let form: ChannelAuthForm = if is_json {
        match serde_json::from_slice(&body) {
            Ok(value) => value,
            Err(_) => {
                return error_response(ApiErrorCode::InvalidRequest, "Invalid JSON body.")
                    .into_response();
            }
        }
    } else {
        match serde_urlencoded::from_bytes(&body) {
            Ok(value) => value,
            Err(_) => {
                return error_response(ApiErrorCode::InvalidRequest, "Invalid form body.")
                    .into_response();
            }
        }
    };

    if form.socket_id.trim().is_empty() {
        return validation_error("socket_id", "socket_id is required.").into_response();
    }
    if form.channel_name.trim().is_empty() {
        return validation_error("channel_name", "channel_name is required.").into_response();
    }

    let session = SessionContext::from_headers(&headers, &state.config.session_cookie_name);
    match state.backend.authorize_channel(&form, session.bearer()).await {
        Ok(relay) => {
            let status =
                StatusCode::from_u16(relay.status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(relay.body)).into_response()
        }
        Err(error) => backend_error_response(&error).into_response(),
    }
}

// --- Health ----------------------------------------------------------------

#[derive(Debug, serde::Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = match state.started_at.elapsed() {
        Ok(duration) => duration.as_secs(),
        Err(_) => 0,
    };

    Json(HealthResponse {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds,
    })
}

#[derive(Debug, serde::Serialize)]
struct ReadinessResponse {
    status: &'static str,
    backend: String,
}

async fn readiness(State(state): State<AppState>) -> Json<ReadinessResponse> {
    Json(ReadinessResponse {
        status: "ready",
        backend: backend_host(state.backend.base_url()),
    })
}

fn backend_host(base_url: &str) -> String {
    base_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

// --- Shared helpers --------------------------------------------------------

fn parse_json_body<T>(body: &Bytes) -> Result<T, ApiErrorTuple>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_slice(body)
        .map_err(|_| error_response(ApiErrorCode::InvalidRequest, "Invalid JSON body."))
}

fn json_with_cookie(value: serde_json::Value, cookie: &str) -> Response {
    let mut response = Json(value).into_response();
    match HeaderValue::from_str(cookie) {
        Ok(header) => {
            response.headers_mut().append(SET_COOKIE, header);
            response
        }
        Err(_) => error_response(
            ApiErrorCode::InternalError,
            "Failed to set the session cookie.",
        )
        .into_response(),
    }
}

/// Map a backend outcome onto the gateway boundary. 5xx and transport errors
/// surface as a fixed 503 message; the upstream status otherwise passes
/// through with the normalized detail.
fn backend_error_response(error: &BackendError) -> ApiErrorTuple {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let code = match error {
        BackendError::Validation { .. } | BackendError::InvalidPath => ApiErrorCode::InvalidRequest,
        BackendError::Unauthenticated => ApiErrorCode::Unauthorized,
        BackendError::Unauthorized { .. } => ApiErrorCode::Forbidden,
        BackendError::NotFound { .. } => ApiErrorCode::NotFound,
        BackendError::Conflict { .. } => ApiErrorCode::Conflict,
        BackendError::MissingToken | BackendError::Decode { .. } => {
            ApiErrorCode::UpstreamProtocolError
        }
        BackendError::BaseUrlMissing | BackendError::ServiceUnavailable { .. } => {
            ApiErrorCode::ServiceUnavailable
        }
    };
    let message = match error {
        BackendError::MissingToken => {
            "The sign-in service returned an unusable response.".to_string()
        }
        BackendError::Decode { .. } => "The backend returned an unreadable response.".to_string(),
        BackendError::BaseUrlMissing | BackendError::ServiceUnavailable { .. } => {
            "The service is temporarily unavailable. Try again later.".to_string()
        }
        other => other.to_string(),
    };
    error_response_with_status(status, code, message)
}
