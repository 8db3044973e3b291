use axum::http::HeaderMap;
use axum::http::header::COOKIE;

/// Session credential extracted from the request, threaded explicitly into
/// proxied backend calls.
#[derive(Debug, Clone)]
pub struct SessionContext {
    token: Option<String>,
}

impl SessionContext {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, cookie_name: &str) -> Self {
        Self {
            token: extract_cookie_value(headers, cookie_name),
        }
    }

    #[must_use]
    pub fn bearer(&self) -> Option<&str> {
        self.token.as_deref()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

pub fn session_cookie(name: &str, token: &str, max_age_seconds: u64, secure: bool) -> String {
    let mut cookie =
        format!("{name}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn clear_cookie(name: &str, secure: bool) -> String {
    let mut cookie = format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn extract_cookie_value(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    for part in raw.split(';') {
        // Nameless cookies ("foo" without '=') are legal in the header;
        // skip them instead of giving up on the remaining segments.
        let mut pieces = part.trim().splitn(2, '=');
        let Some(key) = pieces.next() else {
            continue;
        };
        let Some(value) = pieces.next() else {
            continue;
        };

        if key.trim() == cookie_name {
            return non_empty(value.trim().to_string());
        }
    }

    None
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    Public,
    AuthOnly,
    Protected,
}

#[must_use]
pub fn classify_path(path: &str) -> PathClass {
    if path == "/login" || path == "/register" {
        return PathClass::AuthOnly;
    }
    if path == "/dashboard"
        || path.starts_with("/dashboard/")
        || path == "/wishlists"
        || path.starts_with("/wishlists/")
    {
        return PathClass::Protected;
    }
    PathClass::Public
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    RedirectToDashboard,
    RedirectToLogin { from: String },
}

/// Redirect state machine over (has session, path class). Public paths are
/// never touched, so /w/:slug stays reachable for anonymous guests.
#[must_use]
pub fn guard_decision(has_session: bool, path: &str) -> GuardDecision {
    match (has_session, classify_path(path)) {
        (true, PathClass::AuthOnly) => GuardDecision::RedirectToDashboard,
        (false, PathClass::Protected) => GuardDecision::RedirectToLogin {
            from: path.to_string(),
        },
        _ => GuardDecision::Allow,
    }
}

pub const DEFAULT_RETURN_TARGET: &str = "/dashboard";

/// Only same-origin relative paths survive as post-login return targets.
/// `//host`, anything with a backslash, and control characters all fall back
/// to the dashboard.
#[must_use]
pub fn sanitize_return_target(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return DEFAULT_RETURN_TARGET.to_string();
    };
    let candidate = raw.trim();
    if !candidate.starts_with('/')
        || candidate.starts_with("//")
        || candidate.contains('\\')
        || candidate.chars().any(char::is_control)
    {
        return DEFAULT_RETURN_TARGET.to_string();
    }
    candidate.to_string()
}
