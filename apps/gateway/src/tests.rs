#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use anyhow::Result;
use axum::Json;
use axum::body::Body;
use axum::extract::Path;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use crate::build_router;
use crate::config::Config;

const DEAD_BACKEND: &str = "http://127.0.0.1:9";

fn gateway(backend_base_url: &str) -> Router {
    build_router(Config::for_tests(backend_base_url.to_string())).expect("build router")
}

/// Spawns a stub backend with the given routes on an ephemeral port.
async fn spawn_backend(app: Router) -> Result<(String, tokio::sync::oneshot::Sender<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let _ = server.await;
    });
    Ok((format!("http://{addr}"), shutdown_tx))
}

async fn body_json(response: axum::response::Response) -> Result<Value> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

fn json_request(method: &str, uri: &str, payload: &Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))?)
}

fn get_request(uri: &str) -> Result<Request<Body>> {
    Ok(Request::builder().uri(uri).body(Body::empty())?)
}

fn authed_get_request(uri: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .uri(uri)
        .header(COOKIE, "gp_session=tok-1")
        .body(Body::empty())?)
}

#[tokio::test]
async fn healthz_route_returns_ok() -> Result<()> {
    let app = gateway(DEAD_BACKEND);
    let response = app.oneshot(get_request("/healthz")?).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "giftpool-gateway");
    Ok(())
}

#[tokio::test]
async fn readyz_reports_backend_host() -> Result<()> {
    let app = gateway("http://backend.internal:9000");
    let response = app.oneshot(get_request("/readyz")?).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await?;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["backend"], "backend.internal:9000");
    Ok(())
}

// --- Route guard -----------------------------------------------------------

#[tokio::test]
async fn protected_page_redirects_anonymous_visitors_to_login_with_return_target() -> Result<()> {
    let app = gateway(DEAD_BACKEND);
    let response = app.oneshot(get_request("/dashboard")?).await?;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(LOCATION).unwrap(),
        "/login?from=%2Fdashboard"
    );
    Ok(())
}

#[tokio::test]
async fn nested_protected_page_preserves_full_path_in_return_target() -> Result<()> {
    let app = gateway(DEAD_BACKEND);
    let response = app
        .oneshot(get_request("/dashboard/wishlists/42")?)
        .await?;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(LOCATION).unwrap(),
        "/login?from=%2Fdashboard%2Fwishlists%2F42"
    );
    Ok(())
}

#[tokio::test]
async fn auth_pages_redirect_signed_in_visitors_to_dashboard() -> Result<()> {
    for path in ["/login", "/register"] {
        let app = gateway(DEAD_BACKEND);
        let response = app.oneshot(authed_get_request(path)?).await?;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers().get(LOCATION).unwrap(), "/dashboard");
    }
    Ok(())
}

#[tokio::test]
async fn public_wishlist_page_is_never_guarded() -> Result<()> {
    let app = gateway(DEAD_BACKEND);
    let anonymous = app.oneshot(get_request("/w/summer-party")?).await?;
    assert_eq!(anonymous.status(), StatusCode::OK);

    let app = gateway(DEAD_BACKEND);
    let signed_in = app.oneshot(authed_get_request("/w/summer-party")?).await?;
    assert_eq!(signed_in.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn protected_page_renders_for_signed_in_visitors() -> Result<()> {
    let app = gateway(DEAD_BACKEND);
    let response = app.oneshot(authed_get_request("/dashboard")?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

// --- Login / register / logout ---------------------------------------------

#[tokio::test]
async fn login_sets_session_cookie_and_returns_sanitized_redirect() -> Result<()> {
    let backend = Router::new().route(
        "/api/auth/login",
        post(|| async { Json(json!({ "access_token": "tok-1" })) }),
    );
    let (base_url, shutdown) = spawn_backend(backend).await?;

    let app = gateway(&base_url);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            &json!({
                "email": "owner@example.com",
                "password": "hunter2",
                "from": "/dashboard/wishlists/42"
            }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .unwrap()
        .to_str()?
        .to_string();
    assert_eq!(
        cookie,
        "gp_session=tok-1; Path=/; HttpOnly; SameSite=Lax; Max-Age=2592000"
    );

    let body = body_json(response).await?;
    assert_eq!(body["ok"], true);
    assert_eq!(body["redirect_to"], "/dashboard/wishlists/42");

    drop(shutdown);
    Ok(())
}

#[tokio::test]
async fn login_rejects_open_redirect_return_targets() -> Result<()> {
    let backend = Router::new().route(
        "/api/auth/login",
        post(|| async { Json(json!({ "access_token": "tok-1" })) }),
    );
    let (base_url, shutdown) = spawn_backend(backend).await?;

    let app = gateway(&base_url);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            &json!({
                "email": "owner@example.com",
                "password": "hunter2",
                "from": "//evil.example.com/phish"
            }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["redirect_to"], "/dashboard");

    drop(shutdown);
    Ok(())
}

#[tokio::test]
async fn login_requires_email_and_password() -> Result<()> {
    let app = gateway(DEAD_BACKEND);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            &json!({ "email": "owner@example.com" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await?;
    assert_eq!(body["error"]["code"], "invalid_request");
    assert_eq!(body["errors"]["password"][0], "Password is required.");
    Ok(())
}

#[tokio::test]
async fn login_upstream_success_without_token_maps_to_bad_gateway() -> Result<()> {
    let backend = Router::new().route(
        "/api/auth/login",
        post(|| async { Json(json!({ "ok": true })) }),
    );
    let (base_url, shutdown) = spawn_backend(backend).await?;

    let app = gateway(&base_url);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            &json!({ "email": "owner@example.com", "password": "hunter2" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(response.headers().get(SET_COOKIE).is_none());

    let body = body_json(response).await?;
    assert_eq!(body["error"]["code"], "upstream_protocol_error");

    drop(shutdown);
    Ok(())
}

#[tokio::test]
async fn login_maps_unreachable_backend_to_service_unavailable() -> Result<()> {
    let app = gateway(DEAD_BACKEND);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            &json!({ "email": "owner@example.com", "password": "hunter2" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = body_json(response).await?;
    assert_eq!(body["error"]["code"], "service_unavailable");
    assert_eq!(
        body["message"],
        "The service is temporarily unavailable. Try again later."
    );
    Ok(())
}

#[tokio::test]
async fn login_never_leaks_upstream_server_error_bodies() -> Result<()> {
    let backend = Router::new().route(
        "/api/auth/login",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "secret stack trace") }),
    );
    let (base_url, shutdown) = spawn_backend(backend).await?;

    let app = gateway(&base_url);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            &json!({ "email": "owner@example.com", "password": "hunter2" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = body_json(response).await?;
    assert!(!body["message"].to_string().contains("stack trace"));

    drop(shutdown);
    Ok(())
}

#[tokio::test]
async fn login_passes_through_invalid_credentials_as_unauthorized() -> Result<()> {
    let backend = Router::new().route(
        "/api/auth/login",
        post(|| async {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "detail": "Invalid credentials" })),
            )
        }),
    );
    let (base_url, shutdown) = spawn_backend(backend).await?;

    let app = gateway(&base_url);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/login",
            &json!({ "email": "owner@example.com", "password": "wrong" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await?;
    assert_eq!(body["error"]["code"], "unauthorized");

    drop(shutdown);
    Ok(())
}

#[tokio::test]
async fn register_with_working_auto_login_sets_cookie() -> Result<()> {
    let backend = Router::new()
        .route(
            "/api/auth/register",
            post(|| async { Json(json!({ "id": "user-1" })) }),
        )
        .route(
            "/api/auth/login",
            post(|| async { Json(json!({ "access_token": "tok-2" })) }),
        );
    let (base_url, shutdown) = spawn_backend(backend).await?;

    let app = gateway(&base_url);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            &json!({ "email": "new@example.com", "password": "hunter2", "name": "New Owner" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response.headers().get(SET_COOKIE).unwrap().to_str()?;
    assert!(cookie.starts_with("gp_session=tok-2;"));

    let body = body_json(response).await?;
    assert_eq!(body["ok"], true);

    drop(shutdown);
    Ok(())
}

#[tokio::test]
async fn register_reports_success_without_cookie_when_auto_login_fails() -> Result<()> {
    let backend = Router::new()
        .route(
            "/api/auth/register",
            post(|| async { Json(json!({ "id": "user-1" })) }),
        )
        .route(
            "/api/auth/login",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "down") }),
        );
    let (base_url, shutdown) = spawn_backend(backend).await?;

    let app = gateway(&base_url);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            &json!({ "email": "new@example.com", "password": "hunter2" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(SET_COOKIE).is_none());

    let body = body_json(response).await?;
    assert_eq!(body["ok"], true);

    drop(shutdown);
    Ok(())
}

#[tokio::test]
async fn register_surfaces_duplicate_email_conflicts() -> Result<()> {
    let backend = Router::new().route(
        "/api/auth/register",
        post(|| async {
            (
                StatusCode::CONFLICT,
                Json(json!({ "detail": "Email already registered" })),
            )
        }),
    );
    let (base_url, shutdown) = spawn_backend(backend).await?;

    let app = gateway(&base_url);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/auth/register",
            &json!({ "email": "dupe@example.com", "password": "hunter2" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = body_json(response).await?;
    assert_eq!(body["error"]["code"], "conflict");
    assert_eq!(body["message"], "Email already registered");

    drop(shutdown);
    Ok(())
}

#[tokio::test]
async fn logout_clears_the_session_cookie() -> Result<()> {
    let app = gateway(DEAD_BACKEND);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/logout")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(SET_COOKIE).unwrap(),
        "gp_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
    );
    Ok(())
}

// --- Proxied owner API -----------------------------------------------------

#[tokio::test]
async fn authenticated_proxy_routes_reject_missing_sessions_locally() -> Result<()> {
    // The dead backend address proves no upstream call is attempted.
    let app = gateway(DEAD_BACKEND);
    let response = app.oneshot(get_request("/api/users/me")?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = body_json(response).await?;
    assert_eq!(body["error"]["code"], "unauthorized");
    Ok(())
}

#[tokio::test]
async fn proxied_profile_call_forwards_the_cookie_as_bearer() -> Result<()> {
    let backend = Router::new().route(
        "/api/users/me",
        get(|headers: HeaderMap| async move {
            let auth = headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            Json(json!({ "id": "user-1", "email": "owner@example.com", "auth_seen": auth }))
        }),
    );
    let (base_url, shutdown) = spawn_backend(backend).await?;

    let app = gateway(&base_url);
    let response = app.oneshot(authed_get_request("/api/users/me")?).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await?;
    assert_eq!(body["email"], "owner@example.com");

    drop(shutdown);
    Ok(())
}

#[tokio::test]
async fn proxied_wishlist_lookup_passes_404_through() -> Result<()> {
    let backend = Router::new().route(
        "/api/wishlists/:id",
        get(|Path(_id): Path<String>| async {
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "detail": "Wishlist not found" })),
            )
        }),
    );
    let (base_url, shutdown) = spawn_backend(backend).await?;

    let app = gateway(&base_url);
    let response = app.oneshot(authed_get_request("/api/wishlists/w1")?).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_json(response).await?;
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(body["message"], "Wishlist not found");

    drop(shutdown);
    Ok(())
}

#[tokio::test]
async fn wishlist_creation_validates_title_before_proxying() -> Result<()> {
    let app = gateway(DEAD_BACKEND);
    let mut request = json_request("POST", "/api/wishlists", &json!({ "title": "  " }))?;
    request
        .headers_mut()
        .insert(COOKIE, "gp_session=tok-1".parse()?);
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await?;
    assert_eq!(body["errors"]["title"][0], "Title is required.");
    Ok(())
}

// --- Guest API -------------------------------------------------------------

#[tokio::test]
async fn public_wishlist_is_proxied_without_a_session() -> Result<()> {
    let backend = Router::new().route(
        "/api/public/wishlists/by-slug/:slug",
        get(|Path(slug): Path<String>| async move {
            Json(json!({
                "id": "w1",
                "title": "Summer party",
                "public_slug": slug,
                "items": [
                    { "id": "i1", "wishlist_id": "w1", "title": "Espresso machine", "price": 250.0 }
                ]
            }))
        }),
    );
    let (base_url, shutdown) = spawn_backend(backend).await?;

    let app = gateway(&base_url);
    let response = app
        .oneshot(get_request("/api/public/wishlists/by-slug/summer-party")?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await?;
    assert_eq!(body["title"], "Summer party");
    assert_eq!(body["items"][0]["allow_contributions"], true);

    drop(shutdown);
    Ok(())
}

#[tokio::test]
async fn reservation_writes_are_forwarded_anonymously() -> Result<()> {
    let backend = Router::new().route(
        "/api/wishlists/:id/items/:item_id/reservations",
        post(
            |headers: HeaderMap, Json(payload): Json<Value>| async move {
                assert!(headers.get(AUTHORIZATION).is_none());
                assert_eq!(payload["amount"], 300.0);
                assert_eq!(payload["is_full_reservation"], false);
                (StatusCode::CREATED, Json(json!({ "id": "res-1" })))
            },
        ),
    );
    let (base_url, shutdown) = spawn_backend(backend).await?;

    let app = gateway(&base_url);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/wishlists/w1/items/i1/reservations",
            &json!({ "amount": 300.0, "is_full_reservation": false }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await?;
    assert_eq!(body["id"], "res-1");

    drop(shutdown);
    Ok(())
}

#[tokio::test]
async fn reservation_rejects_non_positive_amounts_locally() -> Result<()> {
    let app = gateway(DEAD_BACKEND);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/wishlists/w1/items/i1/reservations",
            &json!({ "amount": -5.0 }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await?;
    assert_eq!(body["errors"]["amount"][0], "Enter a valid amount.");
    Ok(())
}

// --- Channel authorizer ----------------------------------------------------

fn echoing_pusher_backend() -> Router {
    Router::new().route(
        "/api/pusher/auth",
        post(|headers: HeaderMap, body: String| async move {
            let content_type = headers
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let auth = headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            Json(json!({ "content_type": content_type, "body": body, "auth": auth }))
        }),
    )
}

#[tokio::test]
async fn channel_auth_re_encodes_json_requests_as_form_data() -> Result<()> {
    let (base_url, shutdown) = spawn_backend(echoing_pusher_backend()).await?;

    let app = gateway(&base_url);
    let mut request = json_request(
        "POST",
        "/api/pusher/auth",
        &json!({ "socket_id": "123.45", "channel_name": "private-wishlist-w1" }),
    )?;
    request
        .headers_mut()
        .insert(COOKIE, "gp_session=tok-1".parse()?);
    let response = app.oneshot(request).await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await?;
    assert_eq!(body["content_type"], "application/x-www-form-urlencoded");
    assert_eq!(body["body"], "socket_id=123.45&channel_name=private-wishlist-w1");
    assert_eq!(body["auth"], "Bearer tok-1");

    drop(shutdown);
    Ok(())
}

#[tokio::test]
async fn channel_auth_forwards_guests_without_a_bearer() -> Result<()> {
    let (base_url, shutdown) = spawn_backend(echoing_pusher_backend()).await?;

    let app = gateway(&base_url);
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/pusher/auth")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(
                    "socket_id=123.45&channel_name=private-wishlist-w1",
                ))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await?;
    assert_eq!(body["auth"], Value::Null);

    drop(shutdown);
    Ok(())
}

#[tokio::test]
async fn channel_auth_relays_upstream_denials_verbatim() -> Result<()> {
    let backend = Router::new().route(
        "/api/pusher/auth",
        post(|| async {
            (
                StatusCode::FORBIDDEN,
                Json(json!({ "detail": "Not allowed on this channel" })),
            )
        }),
    );
    let (base_url, shutdown) = spawn_backend(backend).await?;

    let app = gateway(&base_url);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/pusher/auth",
            &json!({ "socket_id": "123.45", "channel_name": "private-wishlist-w1" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = body_json(response).await?;
    assert_eq!(body["detail"], "Not allowed on this channel");

    drop(shutdown);
    Ok(())
}

#[tokio::test]
async fn channel_auth_requires_socket_id_and_channel_name() -> Result<()> {
    let app = gateway(DEAD_BACKEND);
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/pusher/auth",
            &json!({ "socket_id": "", "channel_name": "private-wishlist-w1" }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await?;
    assert_eq!(body["errors"]["socket_id"][0], "socket_id is required.");
    Ok(())
}
