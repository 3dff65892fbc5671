use super::{AppError, auth::AuthCtx};
use axum::response::Response;
use axum::{
    extract::OriginalUri,
    http::{Method, Request},
    middleware::Next,
};
use kidpoints_shared::auth::Role;
use kidpoints_shared::jwt::JwtClaims;
use percent_encoding::percent_decode_str;

/// Role gate over the family-scoped API. This is the self-hosted
/// counterpart of the original deployment's row-level security: every
/// request must stay inside the caller's own family, children may only
/// touch their own resources, and management verbs require an admin.
pub async fn enforce_acl(
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|orig| orig.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();
    let Some(auth) = req.extensions().get::<AuthCtx>() else {
        return Err(AppError::unauthorized());
    };
    let claims = &auth.claims;

    let Some(family_id) = claims.family_id.as_deref() else {
        tracing::warn!(user_id = %claims.sub, "ACL: token without family scope");
        return Err(AppError::forbidden());
    };

    let segs = segmented(&path);
    if segs.len() < 4
        || segs[0] != "api"
        || segs[1] != "v1"
        || segs[2] != "family"
        || decode(segs[3]) != family_id
    {
        tracing::warn!(?segs, "ACL: path outside family scope");
        return Err(AppError::forbidden());
    }
    let rest = &segs[4..];

    let decision = match claims.role {
        Role::Owner | Role::Admin => allow_admin(&method, rest, claims),
        Role::Child => allow_child(&method, rest, claims),
    };

    if let Err(err) = decision {
        tracing::warn!(
            method = %method,
            path = %path,
            user_id = %claims.sub,
            role = ?claims.role,
            "ACL: no rule matched; denying"
        );
        return Err(err);
    }

    Ok(next.run(req).await)
}

fn allow_admin(method: &Method, rest: &[&str], claims: &JwtClaims) -> Result<(), AppError> {
    match rest {
        ["me"] if *method == Method::GET => Ok(()),
        ["profiles"] if *method == Method::GET => Ok(()),
        ["children"] if *method == Method::POST => Ok(()),
        // Only the family owner may attach a co-parent account.
        ["admins"] if *method == Method::POST => {
            if claims.role == Role::Owner {
                Ok(())
            } else {
                Err(AppError::forbidden())
            }
        }
        ["profiles", _] if *method == Method::PATCH || *method == Method::DELETE => Ok(()),
        ["event-types"] if *method == Method::GET || *method == Method::POST => Ok(()),
        ["event-types", "reorder"] if *method == Method::POST => Ok(()),
        ["event-types", _] if *method == Method::PATCH || *method == Method::DELETE => Ok(()),
        ["children", _, "events"] if *method == Method::GET || *method == Method::POST => Ok(()),
        ["children", _, "balance"] if *method == Method::GET => Ok(()),
        ["events", "pending"] if *method == Method::GET => Ok(()),
        ["events", "pending", "count"] if *method == Method::GET => Ok(()),
        ["events", _] if *method == Method::PATCH || *method == Method::DELETE => Ok(()),
        ["events", _, action]
            if *method == Method::POST && (action == &"approve" || action == &"reject") =>
        {
            Ok(())
        }
        ["push", "subscriptions"] if *method == Method::POST => Ok(()),
        ["push", "subscriptions", "unsubscribe"] if *method == Method::POST => Ok(()),
        ["notification-settings"] if *method == Method::GET || *method == Method::PUT => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}

fn allow_child(method: &Method, rest: &[&str], claims: &JwtClaims) -> Result<(), AppError> {
    match rest {
        ["me"] if *method == Method::GET => Ok(()),
        // Children read the templates to fill their request form.
        ["event-types"] if *method == Method::GET => Ok(()),
        ["children", child, "events"] if *method == Method::GET || *method == Method::POST => {
            ensure_self(claims, child)
        }
        ["children", child, "balance"] if *method == Method::GET => ensure_self(claims, child),
        ["push", "subscriptions"] if *method == Method::POST => Ok(()),
        ["push", "subscriptions", "unsubscribe"] if *method == Method::POST => Ok(()),
        ["notification-settings"] if *method == Method::GET || *method == Method::PUT => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}

fn segmented(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn decode(seg: &str) -> String {
    percent_decode_str(seg).decode_utf8_lossy().to_string()
}

/// A child token only ever acts on its own profile id.
fn ensure_self(claims: &JwtClaims, seg: &str) -> Result<(), AppError> {
    if claims.sub == decode(seg) {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}
