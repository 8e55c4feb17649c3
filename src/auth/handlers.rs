use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use lazy_static::lazy_static;
use regex::Regex;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AckResponse, ForgotPasswordRequest, ForgotPasswordResponse, LoginRequest,
            ResetPasswordRequest, SignupRequest, SignupResponse,
        },
        password::{hash_password, verify_password},
        repo::StoreError,
        repo_types::User,
        token::{generate_api_key, generate_reset_token},
    },
    email,
    error::ApiError,
    state::AppState,
};

const RESET_TOKEN_TTL: Duration = Duration::hours(1);

// Unique-token collisions against the store are vanishingly rare; a couple
// of retries with fresh material is the whole recovery policy.
const TOKEN_RETRY_ATTEMPTS: u32 = 3;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Attach a session for `user_id`, reusing the caller's live session when
/// one exists, and decorate the response with the new cookie if issued.
fn establish_session(
    state: &AppState,
    headers: &HeaderMap,
    user_id: uuid::Uuid,
    mut response: Response,
) -> Response {
    let (sid, set_cookie) = state.sessions.establish(headers);
    state.sessions.bind_user(&sid, user_id);
    if let Some(cookie) = set_cookie {
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    response
}

/// Insert the user, regenerating the API key on the (theoretical) unique
/// collision. Returns the stored row and the plaintext key for the one-time
/// reveal.
async fn create_with_fresh_key(
    db: &PgPool,
    email: &str,
    password_hash: &str,
    name: Option<&str>,
) -> Result<(User, String), ApiError> {
    for attempt in 0..TOKEN_RETRY_ATTEMPTS {
        let api_key = generate_api_key();
        match User::create(db, email, password_hash, name, &api_key).await {
            Ok(user) => return Ok((user, api_key)),
            Err(e) if e.violates("email") => {
                warn!(email = %email, "email already registered");
                return Err(ApiError::DuplicateEmail);
            }
            Err(e) if e.violates("api_key") && attempt + 1 < TOKEN_RETRY_ATTEMPTS => {
                warn!("api key collision, regenerating");
            }
            Err(e) => return Err(ApiError::Internal(e.into())),
        }
    }
    Err(ApiError::Internal(anyhow::anyhow!(
        "could not allocate a unique api key"
    )))
}

#[instrument(skip(state, headers, payload))]
pub async fn signup(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<SignupRequest>,
) -> Result<Response, ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!("signup with invalid email");
        return Err(ApiError::Validation("Invalid email".into()));
    }
    if payload.password.len() < 8 {
        warn!("signup password too short");
        return Err(ApiError::Validation("Password too short".into()));
    }

    let hash = hash_password(&payload.password)?;
    let (user, api_key) =
        create_with_fresh_key(&state.db, &payload.email, &hash, payload.name.as_deref()).await?;

    // Welcome mail is detached; a provider outage must not delay signup.
    email::send_detached(
        state.mailer.clone(),
        email::welcome_email(&user.email, user.name.as_deref()),
    );

    info!(user_id = %user.id, "user signed up");
    let response = Json(SignupResponse {
        success: true,
        api_key,
    })
    .into_response();
    Ok(establish_session(&state, &headers, user.id, response))
}

#[instrument(skip(state, headers, payload))]
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    payload.email = payload.email.trim().to_lowercase();

    // One failure shape for unknown email and wrong password, so responses
    // do not reveal which accounts exist.
    let user = match User::find_by_email(&state.db, &payload.email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!("login with unknown email");
            return Err(ApiError::InvalidCredentials);
        }
        Err(e) => return Err(ApiError::Internal(e)),
    };

    if !verify_password(&payload.password, &user.password_hash) {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(ApiError::InvalidCredentials);
    }

    info!(user_id = %user.id, "user logged in");
    let response = Json(AckResponse { success: true }).into_response();
    Ok(establish_session(&state, &headers, user.id, response))
}

#[instrument(skip(state, headers))]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(sid) = state.sessions.resolve(&headers) {
        state.sessions.destroy(&sid);
        debug!("session destroyed");
    }

    let mut response = Json(AckResponse { success: true }).into_response();
    if let Ok(value) = HeaderValue::from_str(&state.sessions.clear_cookie()) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
    response
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(mut payload): Json<ForgotPasswordRequest>,
) -> Json<ForgotPasswordResponse> {
    payload.email = payload.email.trim().to_lowercase();

    // Anti-enumeration contract: the response is identical whether or not
    // the account exists, and identical when the store write fails.
    match User::find_by_email(&state.db, &payload.email).await {
        Ok(Some(user)) => issue_reset_token(&state, &user).await,
        Ok(None) => debug!("password reset requested for unknown email"),
        Err(e) => error!(error = %e, "reset lookup failed"),
    }

    Json(ForgotPasswordResponse {
        success: true,
        message: "If that email exists, a password reset link has been sent".into(),
    })
}

async fn issue_reset_token(state: &AppState, user: &User) {
    let expires_at = OffsetDateTime::now_utc() + RESET_TOKEN_TTL;
    for attempt in 0..TOKEN_RETRY_ATTEMPTS {
        let token = generate_reset_token();
        match User::set_reset_token(&state.db, user.id, &token, expires_at).await {
            Ok(()) => {
                email::send_detached(
                    state.mailer.clone(),
                    email::reset_email(&user.email, &state.config.base_url, &token),
                );
                info!(user_id = %user.id, "reset token issued");
                return;
            }
            Err(e) if e.violates("reset_token") && attempt + 1 < TOKEN_RETRY_ATTEMPTS => {
                warn!("reset token collision, regenerating");
            }
            Err(e) => {
                error!(error = %e, user_id = %user.id, "storing reset token failed");
                return;
            }
        }
    }
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    if payload.password.len() < 8 {
        warn!("reset password too short");
        return Err(ApiError::Validation("Password too short".into()));
    }

    let now = OffsetDateTime::now_utc();
    let user = User::find_by_valid_reset_token(&state.db, &payload.token, now)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| {
            // Wrong, consumed and expired tokens collapse into one outcome.
            warn!("reset with invalid or expired token");
            ApiError::InvalidOrExpiredToken
        })?;

    let hash = hash_password(&payload.password)?;
    let consumed = User::consume_reset_token(&state.db, user.id, &payload.token, &hash)
        .await
        .map_err(ApiError::Internal)?;
    if !consumed {
        warn!(user_id = %user.id, "reset token consumed concurrently");
        return Err(ApiError::InvalidOrExpiredToken);
    }

    info!(user_id = %user.id, "password reset completed");
    Ok(Json(AckResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape_is_enforced() {
        assert!(is_valid_email("user@example.com"));
        assert!(is_valid_email("user+tag@sub.example.co"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("spaces in@example.com"));
        assert!(!is_valid_email("user@nodot"));
    }
}
