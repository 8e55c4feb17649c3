use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::extractors::{api_key_from_parts, query_param};
use crate::billing::WEBHOOK_PATH;
use crate::error::ApiError;
use crate::state::AppState;

pub const CSRF_HEADER: &str = "csrf-token";
pub const CSRF_HEADER_ALT: &str = "x-csrf-token";
pub const CSRF_FIELD: &str = "_csrf";

// Unsafe requests that want to carry the token in a JSON body get buffered
// up to this cap; larger or non-JSON bodies contribute no token.
const MAX_BUFFERED_BODY: usize = 64 * 1024;

#[derive(Debug, Serialize)]
pub struct CsrfTokenResponse {
    #[serde(rename = "csrfToken")]
    pub csrf_token: String,
}

/// `GET /csrf-token`: issue (or repeat) the session's anti-forgery token.
pub async fn csrf_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let (sid, set_cookie) = state.sessions.establish(&headers);
    let token = state
        .sessions
        .ensure_csrf_token(&sid)
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("session vanished during issuance")))?;

    let mut res = Json(CsrfTokenResponse { csrf_token: token }).into_response();
    if let Some(cookie) = set_cookie {
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            res.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    Ok(res)
}

/// Anti-forgery guard over the whole router. Safe methods pass; the payment
/// webhook and API-key callers are exempt (neither can hold a browser
/// session); everything else must present the session's token.
pub async fn csrf_guard(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if matches!(req.method().as_str(), "GET" | "HEAD" | "OPTIONS") {
        return Ok(next.run(req).await);
    }
    if req.uri().path() == WEBHOOK_PATH {
        debug!("csrf bypass for payment webhook");
        return Ok(next.run(req).await);
    }
    if api_key_from_parts(req.headers(), req.uri().query()).is_some() {
        debug!("csrf bypass for api-key caller");
        return Ok(next.run(req).await);
    }

    let stored = state
        .sessions
        .resolve(req.headers())
        .and_then(|sid| state.sessions.csrf_token(&sid));

    let (req, supplied) = supplied_token(req).await;
    match (stored, supplied) {
        (Some(stored), Some(supplied)) if stored == supplied => Ok(next.run(req).await),
        _ => {
            warn!(path = %req.uri().path(), "csrf token missing or mismatched");
            Err(ApiError::InvalidCsrfToken)
        }
    }
}

/// Caller-supplied token: header, then query, then JSON body field. Body
/// bytes are re-injected so downstream extractors still see them.
async fn supplied_token(req: Request) -> (Request, Option<String>) {
    for name in [CSRF_HEADER, CSRF_HEADER_ALT] {
        let token = req
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if token.is_some() {
            return (req, token);
        }
    }
    if let Some(token) = query_param(req.uri().query(), CSRF_FIELD) {
        return (req, Some(token));
    }

    let is_json = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return (req, None);
    }

    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(b) => b,
        Err(_) => {
            return (Request::from_parts(parts, Body::empty()), None);
        }
    };
    let token = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(|v| v.get(CSRF_FIELD)?.as_str().map(str::to_string));
    (Request::from_parts(parts, Body::from(bytes)), token)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn token_of(req: Request) -> Option<String> {
        supplied_token(req).await.1
    }

    fn post(uri: &str) -> axum::http::request::Builder {
        Request::builder().method("POST").uri(uri)
    }

    #[tokio::test]
    async fn header_token_wins() {
        let req = post("/auth/logout")
            .header(CSRF_HEADER, "abc")
            .body(Body::empty())
            .unwrap();
        assert_eq!(token_of(req).await.as_deref(), Some("abc"));

        let req = post("/auth/logout")
            .header(CSRF_HEADER_ALT, "def")
            .body(Body::empty())
            .unwrap();
        assert_eq!(token_of(req).await.as_deref(), Some("def"));
    }

    #[tokio::test]
    async fn query_token_is_read() {
        let req = post("/auth/logout?_csrf=xyz").body(Body::empty()).unwrap();
        assert_eq!(token_of(req).await.as_deref(), Some("xyz"));
    }

    #[tokio::test]
    async fn json_body_token_is_read_and_body_survives() {
        let req = post("/auth/logout")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"_csrf":"body-token","email":"a@b.c"}"#))
            .unwrap();
        let (req, token) = supplied_token(req).await;
        assert_eq!(token.as_deref(), Some("body-token"));

        let bytes = to_bytes(req.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.starts_with(b"{\"_csrf\""));
    }

    #[tokio::test]
    async fn non_json_bodies_contribute_no_token() {
        let req = post("/auth/logout")
            .body(Body::from("_csrf=nope"))
            .unwrap();
        assert!(token_of(req).await.is_none());
    }
}
