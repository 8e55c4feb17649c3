use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use axum::http::{header, HeaderMap};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::auth::token::{generate_session_id, generate_token};

pub const SESSION_COOKIE: &str = "sid";

const CSRF_TOKEN_BYTES: usize = 32;

/// Server-side session state referenced by the opaque cookie value.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub user_id: Option<Uuid>,
    pub csrf_token: Option<String>,
    pub expires_at: OffsetDateTime,
}

/// In-memory, single-node session store. Entries expire on an absolute
/// window; expired entries are dropped on access.
#[derive(Clone)]
pub struct SessionStore {
    entries: Arc<RwLock<HashMap<String, SessionEntry>>>,
    ttl: Duration,
    cookie_secure: bool,
}

impl SessionStore {
    pub fn new(ttl_hours: i64, cookie_secure: bool) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl: Duration::hours(ttl_hours),
            cookie_secure,
        }
    }

    /// Create a fresh session and return its id.
    pub fn create(&self) -> String {
        let id = generate_session_id();
        let entry = SessionEntry {
            user_id: None,
            csrf_token: None,
            expires_at: OffsetDateTime::now_utc() + self.ttl,
        };
        self.entries.write().unwrap().insert(id.clone(), entry);
        id
    }

    /// Look up a live session, dropping it if expired.
    pub fn get(&self, id: &str) -> Option<SessionEntry> {
        let mut entries = self.entries.write().unwrap();
        match entries.get(id) {
            Some(entry) if entry.expires_at > OffsetDateTime::now_utc() => Some(entry.clone()),
            Some(_) => {
                entries.remove(id);
                None
            }
            None => None,
        }
    }

    pub fn user_id(&self, id: &str) -> Option<Uuid> {
        self.get(id).and_then(|e| e.user_id)
    }

    /// Bind an authenticated user to the session (signup/login).
    pub fn bind_user(&self, id: &str, user_id: Uuid) {
        if let Some(entry) = self.entries.write().unwrap().get_mut(id) {
            entry.user_id = Some(user_id);
        }
    }

    /// Read the session's CSRF token without creating one.
    pub fn csrf_token(&self, id: &str) -> Option<String> {
        self.get(id).and_then(|e| e.csrf_token)
    }

    /// CSRF token for the session, generated lazily on first access and then
    /// stable until the session is destroyed.
    pub fn ensure_csrf_token(&self, id: &str) -> Option<String> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries.get_mut(id)?;
        if entry.expires_at <= OffsetDateTime::now_utc() {
            entries.remove(id);
            return None;
        }
        if entry.csrf_token.is_none() {
            entry.csrf_token = Some(generate_token(CSRF_TOKEN_BYTES));
        }
        entry.csrf_token.clone()
    }

    pub fn destroy(&self, id: &str) {
        self.entries.write().unwrap().remove(id);
    }

    /// Session id from the request's cookie header, if it names a live
    /// session.
    pub fn resolve(&self, headers: &HeaderMap) -> Option<String> {
        let id = session_id_from_headers(headers)?;
        self.get(&id).map(|_| id)
    }

    /// Reuse the caller's live session or create a new one. The second value
    /// is a `Set-Cookie` header to attach when a new session was issued.
    pub fn establish(&self, headers: &HeaderMap) -> (String, Option<String>) {
        if let Some(id) = self.resolve(headers) {
            return (id, None);
        }
        let id = self.create();
        let cookie = self.cookie(&id);
        (id, Some(cookie))
    }

    pub fn cookie(&self, id: &str) -> String {
        let secure = if self.cookie_secure { "; Secure" } else { "" };
        format!(
            "{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{secure}",
            self.ttl.whole_seconds()
        )
    }

    /// Expired cookie sent on logout.
    pub fn clear_cookie(&self) -> String {
        let secure = if self.cookie_secure { "; Secure" } else { "" };
        format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{secure}")
    }
}

/// Parse the session id out of the `Cookie` header.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for cookie in cookie_header.split(';') {
        let mut parts = cookie.trim().splitn(2, '=');
        if parts.next() == Some(SESSION_COOKIE) {
            return parts.next().map(str::to_string);
        }
    }
    None
}
