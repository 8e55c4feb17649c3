use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use tracing::warn;
use uuid::Uuid;

use crate::auth::repo_types::User;
use crate::error::ApiError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_KEY_QUERY: &str = "api_key";

/// How the request proved who it is. Resolved once per request; handlers
/// read the user id through `user_id()` regardless of mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    /// Cookie-carried server-side session.
    Session(Uuid),
    /// Long-lived bearer key in a header or query parameter.
    ApiKey(Uuid),
}

impl Identity {
    pub fn user_id(&self) -> Uuid {
        match self {
            Identity::Session(id) | Identity::ApiKey(id) => *id,
        }
    }
}

/// Extracts the authenticated identity: session first, API key second.
/// Pure lookup; never mutates the credential store.
pub struct CurrentUser(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user_id) = state
            .sessions
            .resolve(&parts.headers)
            .and_then(|sid| state.sessions.user_id(&sid))
        {
            return Ok(CurrentUser(Identity::Session(user_id)));
        }

        if let Some(key) = api_key_from_parts(&parts.headers, parts.uri.query()) {
            match User::find_by_api_key(&state.db, &key).await {
                Ok(Some(user)) => return Ok(CurrentUser(Identity::ApiKey(user.id))),
                Ok(None) => warn!("request presented an unknown api key"),
                Err(e) => return Err(ApiError::Internal(e)),
            }
        }

        Err(ApiError::Unauthenticated)
    }
}

/// The API-key channel: `X-API-Key` header or `api_key` query parameter.
pub fn api_key_from_parts(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }
    query_param(query, API_KEY_QUERY)
}

/// Minimal query-string lookup; keys in this system are hex tokens and never
/// percent-encoded.
pub fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    for pair in query?.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            if k == name && !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn identity_exposes_one_user_id_accessor() {
        let id = Uuid::new_v4();
        assert_eq!(Identity::Session(id).user_id(), id);
        assert_eq!(Identity::ApiKey(id).user_id(), id);
    }

    #[test]
    fn api_key_header_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("sk_from_header"));
        let key = api_key_from_parts(&headers, Some("api_key=sk_from_query"));
        assert_eq!(key.as_deref(), Some("sk_from_header"));
    }

    #[test]
    fn api_key_falls_back_to_query() {
        let key = api_key_from_parts(&HeaderMap::new(), Some("foo=bar&api_key=sk_abc"));
        assert_eq!(key.as_deref(), Some("sk_abc"));
    }

    #[test]
    fn absent_api_key_is_none() {
        assert!(api_key_from_parts(&HeaderMap::new(), None).is_none());
        assert!(api_key_from_parts(&HeaderMap::new(), Some("api_key=")).is_none());
    }

    #[test]
    fn query_param_matches_exact_names() {
        assert_eq!(
            query_param(Some("_csrf=tok&x=1"), "_csrf").as_deref(),
            Some("tok")
        );
        assert!(query_param(Some("csrf=tok"), "_csrf").is_none());
    }
}
