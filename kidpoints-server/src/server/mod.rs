mod acl;
pub mod auth;
mod config;
pub mod push;
mod sse;

use crate::server::auth::AuthCtx;
use crate::storage::{EventArgs, ProfileArgs, StorageError, models};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::{Method, StatusCode, header},
    routing::{get, patch, post},
};
use chrono::NaiveDate;
pub use config::{AppConfig, PushConfig};
use kidpoints_shared::api::{self, ServerEvent};
use kidpoints_shared::auth::Role;
use kidpoints_shared::domain::{EventStatus, validate_password};
use kidpoints_shared::jwt;
use push::{ChangeKind, EventChange, PushService};
use serde::{Deserialize, Serialize};
use sse::FamilyEvent;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

/// Synthetic email domain backing child accounts that only have a login.
const CHILD_EMAIL_DOMAIN: &str = "child.local";
const MIN_LOGIN_LENGTH: usize = 3;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: crate::storage::Store,
    push: Option<PushService>,
    events_tx: broadcast::Sender<FamilyEvent>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: crate::storage::Store) -> Self {
        let push = PushService::from_config(&config);
        let (events_tx, _) = broadcast::channel(64);
        Self {
            config,
            store,
            push,
            events_tx,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn subscribe_events(&self) -> broadcast::Receiver<FamilyEvent> {
        self.events_tx.subscribe()
    }

    fn publish_event(&self, family_id: &str, event: ServerEvent) {
        // No receivers is fine; nobody is watching right now.
        let _ = self.events_tx.send(FamilyEvent {
            family_id: family_id.to_string(),
            event,
        });
    }

    /// Fires the realtime refresh after any write to the events table.
    /// Failures are logged and swallowed; the write already succeeded.
    async fn notify_event_change(&self, family_id: &str, child_id: &str) {
        match self.store.pending_count(family_id).await {
            Ok(count) => self.publish_event(family_id, ServerEvent::PendingCount { count }),
            Err(e) => tracing::warn!(error = %e, "realtime: pending count failed"),
        }
        self.publish_event(
            family_id,
            ServerEvent::EventChanged {
                child_id: child_id.to_string(),
            },
        );
    }

    fn dispatch_push(&self, change: EventChange) {
        if let Some(push) = &self.push {
            push.dispatch_change(self.store.clone(), change);
        }
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/api/v1/family/{family_id}/me", get(api_me))
        .route("/api/v1/family/{family_id}/profiles", get(api_list_profiles))
        .route(
            "/api/v1/family/{family_id}/profiles/{id}",
            patch(api_update_profile).delete(api_delete_profile),
        )
        .route("/api/v1/family/{family_id}/children", post(api_create_child))
        .route("/api/v1/family/{family_id}/admins", post(api_create_admin))
        .route(
            "/api/v1/family/{family_id}/event-types",
            get(api_list_event_types).post(api_create_event_type),
        )
        .route(
            "/api/v1/family/{family_id}/event-types/reorder",
            post(api_reorder_event_types),
        )
        .route(
            "/api/v1/family/{family_id}/event-types/{id}",
            patch(api_update_event_type).delete(api_delete_event_type),
        )
        .route(
            "/api/v1/family/{family_id}/children/{id}/events",
            get(api_list_child_events).post(api_create_event),
        )
        .route(
            "/api/v1/family/{family_id}/children/{id}/balance",
            get(api_child_balance),
        )
        .route(
            "/api/v1/family/{family_id}/events/pending",
            get(api_list_pending),
        )
        .route(
            "/api/v1/family/{family_id}/events/pending/count",
            get(api_pending_count),
        )
        .route(
            "/api/v1/family/{family_id}/events/{id}",
            patch(api_update_event).delete(api_delete_event),
        )
        .route(
            "/api/v1/family/{family_id}/events/{id}/approve",
            post(api_approve_event),
        )
        .route(
            "/api/v1/family/{family_id}/events/{id}/reject",
            post(api_reject_event),
        )
        .route(
            "/api/v1/family/{family_id}/push/subscriptions",
            post(api_push_subscribe),
        )
        .route(
            "/api/v1/family/{family_id}/push/subscriptions/unsubscribe",
            post(api_push_unsubscribe),
        )
        .route(
            "/api/v1/family/{family_id}/notification-settings",
            get(api_get_notification_settings).put(api_put_notification_settings),
        )
        .with_state(state.clone())
        .layer(middleware::from_fn(acl::enforce_acl))
        .layer(middleware::from_fn(set_auth_span_fields))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            user_id = tracing::field::Empty,
            role = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/v1/auth/signup", post(api_auth_signup))
        .route("/api/v1/auth/login", post(api_auth_login))
        .route("/api/v1/auth/logout", post(api_auth_logout))
        .route("/api/v1/sse", get(sse::sse_handler))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured

    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    // Put into request extensions for trace layer & handlers
    req.extensions_mut().insert(ReqId(rid.clone()));
    // Call next
    let mut resp = next.run(req).await;
    // Set header on response
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;

    // General security headers for all responses
    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-opener-policy"),
        HeaderValue::from_static("same-origin"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("same-origin"),
    );
    // HSTS is only honored on HTTPS; harmless otherwise
    headers.insert(
        HeaderName::from_static("strict-transport-security"),
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );

    // Disable caching for API and health endpoints
    if path == "/healthz" || path.starts_with("/api/") || path == "/api" {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
        headers.insert(
            HeaderName::from_static("pragma"),
            HeaderValue::from_static("no-cache"),
        );
        headers.insert(
            HeaderName::from_static("expires"),
            HeaderValue::from_static("0"),
        );
    }

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        let span = Span::current();
        span.record("user_id", tracing::field::display(&auth.claims.sub));
        span.record("role", tracing::field::debug(&auth.claims.role));
    }
    Ok(next.run(req).await)
}

// Auth endpoints

async fn api_auth_signup(
    State(state): State<AppState>,
    Json(body): Json<api::SignupReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let email = body.email.trim().to_string();
    if !email.contains('@') {
        return Err(AppError::bad_request("invalid email address"));
    }
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    let family_name = body.family_name.trim().to_string();
    if family_name.is_empty() {
        return Err(AppError::bad_request("family name is required"));
    }
    validate_password(&body.password).map_err(AppError::bad_request)?;

    let password_hash =
        bcrypt::hash(&body.password, bcrypt::DEFAULT_COST).map_err(AppError::internal)?;
    let owner = ProfileArgs {
        id: Uuid::new_v4().to_string(),
        email: Some(email),
        login: None,
        name,
        password_hash,
        role: Role::Owner.as_str().to_string(),
        family_id: None,
        parent_id: None,
    };

    let (family, profile) = state
        .store
        .create_family_with_owner(&family_name, owner)
        .await
        .map_err(|e| map_insert_err(e, "email already registered"))?;

    let seeded = state
        .store
        .seed_default_event_types(&profile.id, &family.id)
        .await
        .map_err(AppError::internal)?;
    tracing::info!(user_id = %profile.id, family_id = %family.id, seeded, "signup: family created");

    let token = auth::issue_jwt_for_profile(&state, &profile).await?;
    Ok(Json(api::AuthResp { token }))
}

async fn api_auth_login(
    State(state): State<AppState>,
    Json(body): Json<api::AuthReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let profile = auth::resolve_credentials(&state, body.login.trim(), &body.password).await?;
    let token = auth::issue_jwt_for_profile(&state, &profile).await?;
    Ok(Json(api::AuthResp { token }))
}

async fn api_auth_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(AppError::unauthorized)?;
    let claims = jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes())
        .map_err(|_| AppError::unauthorized())?;
    state
        .store
        .delete_session(&claims.jti)
        .await
        .map_err(AppError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}

// Profiles

#[derive(Deserialize)]
struct FamilyItemPath {
    family_id: String,
    id: String,
}

async fn api_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::ProfileDto>, AppError> {
    let profile = state
        .store
        .find_profile(&auth.claims.sub)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found("profile not found"))?;
    Ok(Json(profile_to_dto(profile)?))
}

async fn api_list_profiles(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(family_id): Path<String>,
) -> Result<Json<Vec<api::ProfileDto>>, AppError> {
    // ACL enforced by middleware
    let rows = state
        .store
        .list_family_profiles(&family_id)
        .await
        .map_err(AppError::internal)?;
    let items = rows
        .into_iter()
        .map(profile_to_dto)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(items))
}

async fn api_create_child(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(family_id): Path<String>,
    Json(body): Json<api::CreateChildReq>,
) -> Result<Json<api::ProfileDto>, AppError> {
    let login = body.login.trim().to_lowercase();
    validate_login(&login)?;
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    validate_password(&body.password).map_err(AppError::bad_request)?;

    let password_hash =
        bcrypt::hash(&body.password, bcrypt::DEFAULT_COST).map_err(AppError::internal)?;
    let args = ProfileArgs {
        id: Uuid::new_v4().to_string(),
        email: Some(format!("{login}@{CHILD_EMAIL_DOMAIN}")),
        login: Some(login),
        name,
        password_hash,
        role: Role::Child.as_str().to_string(),
        family_id: Some(family_id),
        // Legacy column: records which admin created the account.
        parent_id: Some(auth.claims.sub.clone()),
    };
    let profile = state
        .store
        .insert_profile(args)
        .await
        .map_err(|e| map_insert_err(e, "login already taken"))?;
    Ok(Json(profile_to_dto(profile)?))
}

async fn api_create_admin(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(family_id): Path<String>,
    Json(body): Json<api::CreateAdminReq>,
) -> Result<Json<api::ProfileDto>, AppError> {
    let email = body.email.trim().to_string();
    if !email.contains('@') {
        return Err(AppError::bad_request("invalid email address"));
    }
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    validate_password(&body.password).map_err(AppError::bad_request)?;

    let password_hash =
        bcrypt::hash(&body.password, bcrypt::DEFAULT_COST).map_err(AppError::internal)?;
    let args = ProfileArgs {
        id: Uuid::new_v4().to_string(),
        email: Some(email),
        login: None,
        name,
        password_hash,
        role: Role::Admin.as_str().to_string(),
        family_id: Some(family_id.clone()),
        parent_id: None,
    };
    let profile = state
        .store
        .insert_profile(args)
        .await
        .map_err(|e| map_insert_err(e, "email already registered"))?;
    // No-op for established families; only seeds when the family has
    // no templates yet.
    state
        .store
        .seed_default_event_types(&profile.id, &family_id)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(profile_to_dto(profile)?))
}

async fn api_update_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(p): Path<FamilyItemPath>,
    Json(body): Json<api::UpdateProfileReq>,
) -> Result<Json<api::ProfileDto>, AppError> {
    let target = find_family_profile(&state, &p.family_id, &p.id).await?;
    if target.role == Role::Owner.as_str() && target.id != auth.claims.sub {
        return Err(AppError::forbidden());
    }
    let name = match body.name {
        Some(n) => {
            let n = n.trim().to_string();
            if n.is_empty() {
                return Err(AppError::bad_request("name cannot be empty"));
            }
            Some(n)
        }
        None => None,
    };
    let login = match body.login {
        Some(l) => {
            let l = l.trim().to_lowercase();
            validate_login(&l)?;
            Some(l)
        }
        None => None,
    };
    let updated = state
        .store
        .update_profile(&target.id, name, login)
        .await
        .map_err(|e| map_insert_err(e, "login already taken"))?
        .ok_or_else(|| AppError::not_found("profile not found"))?;
    Ok(Json(profile_to_dto(updated)?))
}

async fn api_delete_profile(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(p): Path<FamilyItemPath>,
) -> Result<StatusCode, AppError> {
    let target = find_family_profile(&state, &p.family_id, &p.id).await?;
    if target.role == Role::Owner.as_str() {
        return Err(AppError::forbidden());
    }
    if target.role == Role::Admin.as_str() && auth.claims.role != Role::Owner {
        return Err(AppError::forbidden());
    }
    state
        .store
        .delete_profile(&target.id)
        .await
        .map_err(AppError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}

// Event types

async fn api_list_event_types(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(family_id): Path<String>,
) -> Result<Json<Vec<api::EventTypeDto>>, AppError> {
    let rows = state
        .store
        .list_event_types(&family_id)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(rows.into_iter().map(event_type_to_dto).collect()))
}

async fn api_create_event_type(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(family_id): Path<String>,
    Json(body): Json<api::CreateEventTypeReq>,
) -> Result<Json<api::EventTypeDto>, AppError> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    let row = state
        .store
        .create_event_type(
            &auth.claims.sub,
            &family_id,
            &name,
            body.default_points,
            body.is_deduction,
            body.icon,
            body.sort_order,
        )
        .await
        .map_err(AppError::internal)?;
    Ok(Json(event_type_to_dto(row)))
}

async fn api_update_event_type(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<FamilyItemPath>,
    Json(body): Json<api::UpdateEventTypeReq>,
) -> Result<Json<api::EventTypeDto>, AppError> {
    if let Some(name) = &body.name
        && name.trim().is_empty()
    {
        return Err(AppError::bad_request("name cannot be empty"));
    }
    let changes = models::EventTypeChanges {
        name: body.name.map(|n| n.trim().to_string()),
        default_points: body.default_points,
        is_deduction: body.is_deduction,
        icon: body.icon,
        sort_order: body.sort_order,
    };
    let updated = state
        .store
        .update_event_type(&p.id, &p.family_id, changes)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("event type not found: {}", p.id)))?;
    Ok(Json(event_type_to_dto(updated)))
}

async fn api_delete_event_type(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<FamilyItemPath>,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .store
        .delete_event_type(&p.id, &p.family_id)
        .await
        .map_err(AppError::internal)?;
    if !deleted {
        return Err(AppError::not_found(format!(
            "event type not found: {}",
            p.id
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn api_reorder_event_types(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(family_id): Path<String>,
    Json(body): Json<Vec<api::EventTypeOrderDto>>,
) -> Result<StatusCode, AppError> {
    let orders: Vec<(String, i32)> = body.into_iter().map(|o| (o.id, o.sort_order)).collect();
    state
        .store
        .reorder_event_types(&family_id, orders)
        .await
        .map_err(AppError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}

// Events

async fn api_list_child_events(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<FamilyItemPath>,
    Query(query): Query<api::EventListQuery>,
) -> Result<Json<Vec<api::EventDto>>, AppError> {
    let child = find_family_child(&state, &p.family_id, &p.id).await?;
    let from = query.from.as_deref().map(parse_date).transpose()?;
    let to = query.to.as_deref().map(parse_date).transpose()?;
    let status = query.status.map(|s| s.as_str().to_string());
    let rows = state
        .store
        .list_child_events(&child.id, from, to, status)
        .await
        .map_err(AppError::internal)?;
    let items = rows
        .into_iter()
        .map(event_to_dto)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(items))
}

async fn api_create_event(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(p): Path<FamilyItemPath>,
    Json(body): Json<api::CreateEventReq>,
) -> Result<Json<api::EventDto>, AppError> {
    let child = find_family_child(&state, &p.family_id, &p.id).await?;

    // Exactly one of template reference / free-form name.
    match (&body.event_type_id, &body.custom_name) {
        (None, None) => {
            return Err(AppError::bad_request("event_type_id or custom_name required"));
        }
        (Some(_), Some(_)) => {
            return Err(AppError::bad_request(
                "event_type_id and custom_name are mutually exclusive",
            ));
        }
        _ => {}
    }
    if let Some(type_id) = &body.event_type_id {
        let event_type = state
            .store
            .get_event_type(type_id)
            .await
            .map_err(AppError::internal)?;
        match event_type {
            Some(t) if t.family_id.as_deref() == Some(p.family_id.as_str()) => {}
            _ => {
                return Err(AppError::bad_request(format!(
                    "unknown event_type_id: {type_id}"
                )));
            }
        }
    }
    if let Some(name) = &body.custom_name
        && name.trim().is_empty()
    {
        return Err(AppError::bad_request("custom_name cannot be empty"));
    }
    let date = parse_date(&body.date)?;

    // Admin entries are live immediately; child submissions wait for
    // approval.
    let status = if auth.claims.role.is_admin() {
        EventStatus::Approved
    } else {
        EventStatus::Pending
    };

    let record = state
        .store
        .insert_event(EventArgs {
            child_id: child.id.clone(),
            event_type_id: body.event_type_id,
            custom_name: body.custom_name,
            points: body.points,
            note: body.note,
            date,
            created_by: Some(auth.claims.sub.clone()),
            status: status.as_str().to_string(),
        })
        .await
        .map_err(AppError::internal)?;

    state.notify_event_change(&p.family_id, &child.id).await;
    state.dispatch_push(EventChange {
        kind: ChangeKind::Insert,
        record: record.clone(),
        old_status: None,
    });
    Ok(Json(event_to_dto(record)?))
}

async fn api_update_event(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<FamilyItemPath>,
    Json(body): Json<api::UpdateEventReq>,
) -> Result<Json<api::EventDto>, AppError> {
    let existing = find_family_event(&state, &p.family_id, &p.id).await?;
    let date = body.date.as_deref().map(parse_date).transpose()?;
    let changes = models::EventChanges {
        points: body.points,
        note: body.note,
        date,
        custom_name: body.custom_name,
    };
    let updated = state
        .store
        .update_event(&existing.id, changes)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("event not found: {}", p.id)))?;
    state
        .notify_event_change(&p.family_id, &updated.child_id)
        .await;
    Ok(Json(event_to_dto(updated)?))
}

async fn api_approve_event(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<FamilyItemPath>,
) -> Result<StatusCode, AppError> {
    transition_event(&state, &p, EventStatus::Approved).await
}

async fn api_reject_event(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<FamilyItemPath>,
) -> Result<StatusCode, AppError> {
    transition_event(&state, &p, EventStatus::Rejected).await
}

/// Pending → approved/rejected. Missing or already-settled events are
/// treated as success so repeated taps stay idempotent.
async fn transition_event(
    state: &AppState,
    p: &FamilyItemPath,
    to: EventStatus,
) -> Result<StatusCode, AppError> {
    let Some(existing) = state
        .store
        .get_event(&p.id)
        .await
        .map_err(AppError::internal)?
    else {
        return Ok(StatusCode::NO_CONTENT);
    };
    // 404 instead of a silent no-op when the event belongs elsewhere.
    let _child = find_family_child(state, &p.family_id, &existing.child_id)
        .await
        .map_err(|_| AppError::not_found(format!("event not found: {}", p.id)))?;

    let updated = state
        .store
        .set_event_status(&p.id, EventStatus::Pending.as_str(), to.as_str())
        .await
        .map_err(AppError::internal)?;

    if let Some(record) = updated {
        state
            .notify_event_change(&p.family_id, &record.child_id)
            .await;
        state.dispatch_push(EventChange {
            kind: ChangeKind::Update,
            record,
            old_status: Some(EventStatus::Pending),
        });
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn api_delete_event(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<FamilyItemPath>,
) -> Result<StatusCode, AppError> {
    let existing = find_family_event(&state, &p.family_id, &p.id).await?;
    let deleted = state
        .store
        .delete_event(&existing.id)
        .await
        .map_err(AppError::internal)?;
    if let Some(record) = deleted {
        state
            .notify_event_change(&p.family_id, &record.child_id)
            .await;
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn api_child_balance(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(p): Path<FamilyItemPath>,
) -> Result<Json<api::BalanceDto>, AppError> {
    let child = find_family_child(&state, &p.family_id, &p.id).await?;
    let balance = state
        .store
        .compute_balance(&child.id)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(api::BalanceDto {
        child_id: child.id,
        balance,
    }))
}

async fn api_list_pending(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(family_id): Path<String>,
) -> Result<Json<Vec<api::EventDto>>, AppError> {
    let rows = state
        .store
        .list_pending_events(&family_id)
        .await
        .map_err(AppError::internal)?;
    let items = rows
        .into_iter()
        .map(event_to_dto)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(items))
}

async fn api_pending_count(
    State(state): State<AppState>,
    Extension(_auth): Extension<AuthCtx>,
    Path(family_id): Path<String>,
) -> Result<Json<api::PendingCountDto>, AppError> {
    let count = state
        .store
        .pending_count(&family_id)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(api::PendingCountDto { count }))
}

// Push subscriptions & notification settings

async fn api_push_subscribe(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(_family_id): Path<String>,
    Json(body): Json<api::PushSubscribeReq>,
) -> Result<Json<api::PushSubscribeResp>, AppError> {
    if body.endpoint.trim().is_empty() {
        return Err(AppError::bad_request("endpoint is required"));
    }
    state
        .store
        .upsert_push_subscription(
            &auth.claims.sub,
            &body.endpoint,
            &body.keys.p256dh,
            &body.keys.auth,
        )
        .await
        .map_err(AppError::internal)?;
    Ok(Json(api::PushSubscribeResp { subscribed: true }))
}

async fn api_push_unsubscribe(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(_family_id): Path<String>,
    Json(body): Json<api::PushUnsubscribeReq>,
) -> Result<StatusCode, AppError> {
    state
        .store
        .delete_push_subscription(&auth.claims.sub, &body.endpoint)
        .await
        .map_err(AppError::internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn api_get_notification_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(_family_id): Path<String>,
) -> Result<Json<api::NotificationSettingsDto>, AppError> {
    let row = state
        .store
        .get_notification_settings(&auth.claims.sub)
        .await
        .map_err(AppError::internal)?;
    Ok(Json(
        row.map(settings_to_dto)
            .unwrap_or_default(),
    ))
}

async fn api_put_notification_settings(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(_family_id): Path<String>,
    Json(body): Json<api::NotificationSettingsDto>,
) -> Result<Json<api::NotificationSettingsDto>, AppError> {
    let row = state
        .store
        .upsert_notification_settings(
            &auth.claims.sub,
            body.child_requests,
            body.request_results,
            body.direct_changes,
            body.sound,
            body.vibration,
        )
        .await
        .map_err(AppError::internal)?;
    Ok(Json(settings_to_dto(row)))
}

// Helpers

async fn find_family_profile(
    state: &AppState,
    family_id: &str,
    profile_id: &str,
) -> Result<models::Profile, AppError> {
    let profile = state
        .store
        .find_profile(profile_id)
        .await
        .map_err(AppError::internal)?;
    match profile {
        Some(p) if p.family_id.as_deref() == Some(family_id) => Ok(p),
        _ => Err(AppError::not_found(format!(
            "profile not found: {profile_id}"
        ))),
    }
}

async fn find_family_child(
    state: &AppState,
    family_id: &str,
    child_id: &str,
) -> Result<models::Profile, AppError> {
    let profile = find_family_profile(state, family_id, child_id)
        .await
        .map_err(|_| AppError::not_found(format!("child not found: {child_id}")))?;
    if profile.role != Role::Child.as_str() {
        return Err(AppError::not_found(format!("child not found: {child_id}")));
    }
    Ok(profile)
}

async fn find_family_event(
    state: &AppState,
    family_id: &str,
    event_id: &str,
) -> Result<models::Event, AppError> {
    let event = state
        .store
        .get_event(event_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("event not found: {event_id}")))?;
    find_family_child(state, family_id, &event.child_id)
        .await
        .map_err(|_| AppError::not_found(format!("event not found: {event_id}")))?;
    Ok(event)
}

fn validate_login(login: &str) -> Result<(), AppError> {
    if login.chars().count() < MIN_LOGIN_LENGTH {
        return Err(AppError::bad_request("login must be at least 3 characters"));
    }
    if login.contains('@') || login.contains(char::is_whitespace) {
        return Err(AppError::bad_request(
            "login may not contain '@' or whitespace",
        ));
    }
    Ok(())
}

fn parse_date(s: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| AppError::bad_request(format!("invalid date: {s}")))
}

fn to_rfc3339(naive: chrono::NaiveDateTime) -> String {
    chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(naive, chrono::Utc).to_rfc3339()
}

fn profile_to_dto(p: models::Profile) -> Result<api::ProfileDto, AppError> {
    let role = p.role.parse::<Role>().map_err(AppError::internal)?;
    Ok(api::ProfileDto {
        id: p.id,
        email: p.email,
        login: p.login,
        name: p.name,
        role,
        family_id: p.family_id,
        created_at: to_rfc3339(p.created_at),
    })
}

fn event_to_dto(e: models::Event) -> Result<api::EventDto, AppError> {
    let status = e.status.parse::<EventStatus>().map_err(AppError::internal)?;
    Ok(api::EventDto {
        id: e.id,
        child_id: e.child_id,
        event_type_id: e.event_type_id,
        custom_name: e.custom_name,
        points: e.points,
        note: e.note,
        date: e.date.format("%Y-%m-%d").to_string(),
        created_by: e.created_by,
        status,
        created_at: to_rfc3339(e.created_at),
    })
}

fn event_type_to_dto(t: models::EventType) -> api::EventTypeDto {
    api::EventTypeDto {
        id: t.id,
        name: t.name,
        default_points: t.default_points,
        is_deduction: t.is_deduction,
        icon: t.icon,
        sort_order: t.sort_order,
    }
}

fn settings_to_dto(s: models::NotificationSettings) -> api::NotificationSettingsDto {
    api::NotificationSettingsDto {
        child_requests: s.child_requests,
        request_results: s.request_results,
        direct_changes: s.direct_changes,
        sound: s.sound,
        vibration: s.vibration,
    }
}

fn map_insert_err(e: StorageError, conflict_msg: &str) -> AppError {
    if e.is_unique_violation() {
        AppError::conflict(conflict_msg)
    } else {
        AppError::internal(e)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn conflict<T: Into<String>>(msg: T) -> Self {
        Self::Conflict(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, detail) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".into(), "forbidden", None),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None),
            AppError::Conflict(m) => (StatusCode::CONFLICT, m, "conflict", None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                Some(m),
            ),
        };
        // Log any error responses at ERROR level to file for troubleshooting
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::error!(status = %status, kind = kind, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg });
        (status, body).into_response()
    }
}
