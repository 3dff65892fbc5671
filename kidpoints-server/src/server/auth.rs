use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use bcrypt::verify;
use chrono::{Duration, Utc};
use kidpoints_shared::auth::Role;
use kidpoints_shared::jwt::{self, JwtClaims};
use tracing::error;

use crate::storage::models::Profile;

use super::{AppError, AppState};

/// How many days of inactivity before a session is considered expired.
const SESSION_IDLE_DAYS: i64 = 14;
/// How many days before mandatory re-login.
const TOKEN_TTL_DAYS: i64 = 30;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub claims: JwtClaims,
}

pub async fn require_bearer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return Err(AppError::unauthorized()),
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let prefix = "Bearer ";
    if !header_str.starts_with(prefix) {
        return Err(AppError::unauthorized());
    }
    let token = &header_str[prefix.len()..];

    let claims = authenticate_token(&state, token).await?;
    req.extensions_mut().insert(AuthCtx { claims });
    Ok(next.run(req).await)
}

/// Verifies the JWT signature, then atomically touches the server-side
/// session inside its idle window. Shared by the bearer middleware and
/// the SSE endpoint (which receives the token as a query parameter).
pub async fn authenticate_token(state: &AppState, token: &str) -> Result<JwtClaims, AppError> {
    let claims = match jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error=%e, "auth: jwt decode failed");
            return Err(AppError::unauthorized());
        }
    };

    let cutoff = Utc::now() - Duration::days(SESSION_IDLE_DAYS);
    match state
        .store
        .touch_session_with_cutoff(&claims.jti, cutoff.naive_utc())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(
                jti = %claims.jti,
                user_id = %claims.sub,
                cutoff = %cutoff,
                "auth: session missing or expired (last_used_at < cutoff)"
            );
            return Err(AppError::unauthorized());
        }
        Err(e) => {
            error!(jti = %claims.jti, error=%e, "auth: touch_session_with_cutoff failed");
            return Err(AppError::internal(e));
        }
    }
    Ok(claims)
}

/// Mints a token for a stored profile and registers its session.
pub async fn issue_jwt_for_profile(
    state: &AppState,
    profile: &Profile,
) -> Result<String, AppError> {
    let role = parse_role(profile)?;
    let jti = uuid::Uuid::new_v4().to_string();
    let exp = (Utc::now() + Duration::days(TOKEN_TTL_DAYS)).timestamp();
    let claims = JwtClaims {
        sub: profile.id.clone(),
        jti: jti.clone(),
        exp,
        role,
        family_id: profile.family_id.clone(),
    };

    state
        .store
        .create_session(&jti, &profile.id)
        .await
        .map_err(|e| {
            error!(user_id = %profile.id, error=%e, "login/signup: create_session failed");
            AppError::internal(e)
        })?;
    let token = jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        error!(user_id = %profile.id, error=%e, "login/signup: jwt encode failed");
        AppError::internal(e)
    })?;
    Ok(token)
}

/// Resolves the submitted identifier to a profile and checks the
/// password. A value containing `@` is treated as an email; anything
/// else is a child-account login resolved to its profile first.
pub async fn resolve_credentials(
    state: &AppState,
    login: &str,
    password: &str,
) -> Result<Profile, AppError> {
    let lookup = if login.contains('@') {
        state.store.find_profile_by_email(login).await
    } else {
        state.store.find_profile_by_login(login).await
    };
    let profile = lookup.map_err(AppError::internal)?.ok_or_else(|| {
        tracing::warn!(login = %login, "login: unknown account");
        AppError::unauthorized()
    })?;

    if !verify(password, &profile.password_hash).map_err(|e| {
        tracing::error!(login = %login, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        tracing::warn!(login = %login, "login: invalid password");
        return Err(AppError::unauthorized());
    }
    Ok(profile)
}

pub fn parse_role(profile: &Profile) -> Result<Role, AppError> {
    profile.role.parse::<Role>().map_err(|e| {
        error!(user_id = %profile.id, error = %e, "profile row carries unknown role");
        AppError::internal(e)
    })
}
