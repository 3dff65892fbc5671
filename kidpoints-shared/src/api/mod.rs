use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::domain::EventStatus;

pub mod endpoints;
#[cfg(feature = "rest-client")]
pub mod rest;

pub const API_V1_PREFIX: &str = "/api/v1";

/// All family-scoped routes live under this prefix; the ACL layer
/// matches the path family against the token family.
pub fn family_scope(family_id: &str) -> String {
    format!("{}/family/{}", API_V1_PREFIX, family_id)
}

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct SignupReq {
    pub email: String,
    pub password: String,
    pub name: String,
    pub family_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthReq {
    /// Email address, or the bare login of a child account.
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
}

// Family members
#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileDto {
    pub id: String,
    pub email: Option<String>,
    pub login: Option<String>,
    pub name: String,
    pub role: Role,
    pub family_id: Option<String>,
    pub created_at: String, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChildReq {
    pub login: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAdminReq {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateProfileReq {
    pub name: Option<String>,
    pub login: Option<String>,
}

// Event types (quick-add templates)
#[derive(Debug, Serialize, Deserialize)]
pub struct EventTypeDto {
    pub id: String,
    pub name: String,
    pub default_points: i32,
    pub is_deduction: bool,
    pub icon: Option<String>,
    pub sort_order: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateEventTypeReq {
    pub name: String,
    pub default_points: i32,
    pub is_deduction: bool,
    pub icon: Option<String>,
    /// Appended after the current maximum when omitted.
    pub sort_order: Option<i32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateEventTypeReq {
    pub name: Option<String>,
    pub default_points: Option<i32>,
    pub is_deduction: Option<bool>,
    pub icon: Option<String>,
    pub sort_order: Option<i32>,
}

/// One entry of a drag-reorder batch.
#[derive(Debug, Serialize, Deserialize)]
pub struct EventTypeOrderDto {
    pub id: String,
    pub sort_order: i32,
}

// Events
#[derive(Debug, Serialize, Deserialize)]
pub struct EventDto {
    pub id: String,
    pub child_id: String,
    pub event_type_id: Option<String>,
    pub custom_name: Option<String>,
    pub points: i32,
    pub note: String,
    pub date: String, // YYYY-MM-DD
    pub created_by: Option<String>,
    pub status: EventStatus,
    pub created_at: String, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateEventReq {
    pub event_type_id: Option<String>,
    pub custom_name: Option<String>,
    pub points: i32,
    #[serde(default)]
    pub note: String,
    pub date: String, // YYYY-MM-DD
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateEventReq {
    pub points: Option<i32>,
    pub note: Option<String>,
    pub date: Option<String>,
    pub custom_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventListQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub status: Option<EventStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceDto {
    pub child_id: String,
    pub balance: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PendingCountDto {
    pub count: i64,
}

// Web Push
#[derive(Debug, Serialize, Deserialize)]
pub struct PushKeysDto {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PushSubscribeReq {
    pub endpoint: String,
    pub keys: PushKeysDto,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PushSubscribeResp {
    pub subscribed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PushUnsubscribeReq {
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettingsDto {
    pub child_requests: bool,
    pub request_results: bool,
    pub direct_changes: bool,
    pub sound: bool,
    pub vibration: bool,
}

impl Default for NotificationSettingsDto {
    /// Missing settings mean everything is enabled.
    fn default() -> Self {
        Self {
            child_requests: true,
            request_results: true,
            direct_changes: true,
            sound: true,
            vibration: true,
        }
    }
}

/// Realtime message pushed over the SSE stream, scoped to one family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Number of pending child requests changed; clients refresh the badge.
    PendingCount { count: i64 },
    /// An event row for this child was inserted/updated/deleted.
    EventChanged { child_id: String },
}
