//! Minimal REST client helpers for consumers (clients).

use super::endpoints as ep;
use super::*;
use once_cell::sync::Lazy;
use std::time::Duration;

pub use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("http: {0}")]
    Http(String),
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("serde: {0}")]
    Serde(String),
}

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        // Keep TCP connections alive at kernel level
        .tcp_keepalive(Some(Duration::from_secs(180)))
        // Enable and tune the connection pool
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(180))
        // Bound request duration
        .timeout(Duration::from_secs(180))
        .build()
        .expect("failed to build HTTP client")
});

async fn handle_json<T: for<'de> serde::Deserialize<'de>>(
    res: reqwest::Response,
) -> Result<T, RestError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(RestError::Status {
            status: status.as_u16(),
            body,
        });
    }
    res.json::<T>()
        .await
        .map_err(|e| RestError::Serde(e.to_string()))
}

async fn handle_empty(res: reqwest::Response) -> Result<(), RestError> {
    let status = res.status();
    if status.is_success() {
        Ok(())
    } else {
        let body = res.text().await.unwrap_or_default();
        Err(RestError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

async fn get_json<T: for<'de> serde::Deserialize<'de>>(
    url: String,
    bearer: &str,
) -> Result<T, RestError> {
    let res = HTTP_CLIENT
        .get(url)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

async fn send_json<B: serde::Serialize>(
    method: reqwest::Method,
    url: String,
    bearer: Option<&str>,
    body: Option<&B>,
) -> Result<reqwest::Response, RestError> {
    let mut req = HTTP_CLIENT.request(method, url);
    if let Some(t) = bearer {
        req = req.bearer_auth(t);
    }
    if let Some(b) = body {
        req = req.json(b);
    }
    req.send().await.map_err(|e| RestError::Http(e.to_string()))
}

pub async fn signup(base: &str, req: &SignupReq) -> Result<AuthResp, RestError> {
    let res = send_json(reqwest::Method::POST, ep::auth_signup(base), None, Some(req)).await?;
    handle_json(res).await
}

pub async fn login(base: &str, req: &AuthReq) -> Result<AuthResp, RestError> {
    let res = send_json(reqwest::Method::POST, ep::auth_login(base), None, Some(req)).await?;
    handle_json(res).await
}

pub async fn me(base: &str, family_id: &str, bearer: &str) -> Result<ProfileDto, RestError> {
    get_json(ep::me(base, family_id), bearer).await
}

pub async fn list_profiles(
    base: &str,
    family_id: &str,
    bearer: &str,
) -> Result<Vec<ProfileDto>, RestError> {
    get_json(ep::profiles(base, family_id), bearer).await
}

pub async fn create_child(
    base: &str,
    family_id: &str,
    bearer: &str,
    req: &CreateChildReq,
) -> Result<ProfileDto, RestError> {
    let res = send_json(
        reqwest::Method::POST,
        ep::children(base, family_id),
        Some(bearer),
        Some(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn create_admin(
    base: &str,
    family_id: &str,
    bearer: &str,
    req: &CreateAdminReq,
) -> Result<ProfileDto, RestError> {
    let res = send_json(
        reqwest::Method::POST,
        ep::admins(base, family_id),
        Some(bearer),
        Some(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn update_profile(
    base: &str,
    family_id: &str,
    profile_id: &str,
    bearer: &str,
    req: &UpdateProfileReq,
) -> Result<ProfileDto, RestError> {
    let res = send_json(
        reqwest::Method::PATCH,
        ep::profile(base, family_id, profile_id),
        Some(bearer),
        Some(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn delete_profile(
    base: &str,
    family_id: &str,
    profile_id: &str,
    bearer: &str,
) -> Result<(), RestError> {
    let res = send_json::<()>(
        reqwest::Method::DELETE,
        ep::profile(base, family_id, profile_id),
        Some(bearer),
        None,
    )
    .await?;
    handle_empty(res).await
}

pub async fn list_event_types(
    base: &str,
    family_id: &str,
    bearer: &str,
) -> Result<Vec<EventTypeDto>, RestError> {
    get_json(ep::event_types(base, family_id), bearer).await
}

pub async fn create_event_type(
    base: &str,
    family_id: &str,
    bearer: &str,
    req: &CreateEventTypeReq,
) -> Result<EventTypeDto, RestError> {
    let res = send_json(
        reqwest::Method::POST,
        ep::event_types(base, family_id),
        Some(bearer),
        Some(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn update_event_type(
    base: &str,
    family_id: &str,
    type_id: &str,
    bearer: &str,
    req: &UpdateEventTypeReq,
) -> Result<EventTypeDto, RestError> {
    let res = send_json(
        reqwest::Method::PATCH,
        ep::event_type(base, family_id, type_id),
        Some(bearer),
        Some(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn delete_event_type(
    base: &str,
    family_id: &str,
    type_id: &str,
    bearer: &str,
) -> Result<(), RestError> {
    let res = send_json::<()>(
        reqwest::Method::DELETE,
        ep::event_type(base, family_id, type_id),
        Some(bearer),
        None,
    )
    .await?;
    handle_empty(res).await
}

pub async fn reorder_event_types(
    base: &str,
    family_id: &str,
    bearer: &str,
    req: &[EventTypeOrderDto],
) -> Result<(), RestError> {
    let res = send_json(
        reqwest::Method::POST,
        ep::event_types_reorder(base, family_id),
        Some(bearer),
        Some(&req),
    )
    .await?;
    handle_empty(res).await
}

pub async fn list_child_events(
    base: &str,
    family_id: &str,
    child_id: &str,
    bearer: &str,
    query: &EventListQuery,
) -> Result<Vec<EventDto>, RestError> {
    let res = HTTP_CLIENT
        .get(ep::child_events(base, family_id, child_id))
        .query(query)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn create_event(
    base: &str,
    family_id: &str,
    child_id: &str,
    bearer: &str,
    req: &CreateEventReq,
) -> Result<EventDto, RestError> {
    let res = send_json(
        reqwest::Method::POST,
        ep::child_events(base, family_id, child_id),
        Some(bearer),
        Some(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn update_event(
    base: &str,
    family_id: &str,
    event_id: &str,
    bearer: &str,
    req: &UpdateEventReq,
) -> Result<EventDto, RestError> {
    let res = send_json(
        reqwest::Method::PATCH,
        ep::event(base, family_id, event_id),
        Some(bearer),
        Some(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn approve_event(
    base: &str,
    family_id: &str,
    event_id: &str,
    bearer: &str,
) -> Result<(), RestError> {
    let res = send_json::<()>(
        reqwest::Method::POST,
        ep::event_approve(base, family_id, event_id),
        Some(bearer),
        None,
    )
    .await?;
    handle_empty(res).await
}

pub async fn reject_event(
    base: &str,
    family_id: &str,
    event_id: &str,
    bearer: &str,
) -> Result<(), RestError> {
    let res = send_json::<()>(
        reqwest::Method::POST,
        ep::event_reject(base, family_id, event_id),
        Some(bearer),
        None,
    )
    .await?;
    handle_empty(res).await
}

pub async fn delete_event(
    base: &str,
    family_id: &str,
    event_id: &str,
    bearer: &str,
) -> Result<(), RestError> {
    let res = send_json::<()>(
        reqwest::Method::DELETE,
        ep::event(base, family_id, event_id),
        Some(bearer),
        None,
    )
    .await?;
    handle_empty(res).await
}

pub async fn child_balance(
    base: &str,
    family_id: &str,
    child_id: &str,
    bearer: &str,
) -> Result<BalanceDto, RestError> {
    get_json(ep::child_balance(base, family_id, child_id), bearer).await
}

pub async fn pending_events(
    base: &str,
    family_id: &str,
    bearer: &str,
) -> Result<Vec<EventDto>, RestError> {
    get_json(ep::pending_events(base, family_id), bearer).await
}

pub async fn pending_count(
    base: &str,
    family_id: &str,
    bearer: &str,
) -> Result<PendingCountDto, RestError> {
    get_json(ep::pending_count(base, family_id), bearer).await
}

pub async fn push_subscribe(
    base: &str,
    family_id: &str,
    bearer: &str,
    req: &PushSubscribeReq,
) -> Result<PushSubscribeResp, RestError> {
    let res = send_json(
        reqwest::Method::POST,
        ep::push_subscribe(base, family_id),
        Some(bearer),
        Some(req),
    )
    .await?;
    handle_json(res).await
}

pub async fn push_unsubscribe(
    base: &str,
    family_id: &str,
    bearer: &str,
    req: &PushUnsubscribeReq,
) -> Result<(), RestError> {
    let res = send_json(
        reqwest::Method::POST,
        ep::push_unsubscribe(base, family_id),
        Some(bearer),
        Some(req),
    )
    .await?;
    handle_empty(res).await
}

pub async fn get_notification_settings(
    base: &str,
    family_id: &str,
    bearer: &str,
) -> Result<NotificationSettingsDto, RestError> {
    get_json(ep::notification_settings(base, family_id), bearer).await
}

pub async fn put_notification_settings(
    base: &str,
    family_id: &str,
    bearer: &str,
    req: &NotificationSettingsDto,
) -> Result<NotificationSettingsDto, RestError> {
    let res = send_json(
        reqwest::Method::PUT,
        ep::notification_settings(base, family_id),
        Some(bearer),
        Some(req),
    )
    .await?;
    handle_json(res).await
}
