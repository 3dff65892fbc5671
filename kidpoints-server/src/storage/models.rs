use crate::storage::schema::{
    event_types, events, families, notification_settings, profiles, push_subscriptions, sessions,
};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = families)]
pub struct Family {
    pub id: String,
    pub name: String,
    pub created_by: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = families)]
pub struct NewFamily<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub created_by: Option<&'a str>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = profiles)]
pub struct Profile {
    pub id: String,
    pub email: Option<String>,
    pub login: Option<String>,
    pub name: String,
    pub password_hash: String,
    /// Stored as text; parsed through `Role::from_str` at the API boundary.
    pub role: String,
    pub family_id: Option<String>,
    pub parent_id: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = profiles)]
pub struct NewProfile<'a> {
    pub id: &'a str,
    pub email: Option<&'a str>,
    pub login: Option<&'a str>,
    pub name: &'a str,
    pub password_hash: &'a str,
    pub role: &'a str,
    pub family_id: Option<&'a str>,
    pub parent_id: Option<&'a str>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = event_types)]
#[diesel(belongs_to(Family, foreign_key = family_id))]
pub struct EventType {
    pub id: String,
    pub admin_id: String,
    pub family_id: Option<String>,
    pub name: String,
    pub default_points: i32,
    pub is_deduction: bool,
    pub icon: Option<String>,
    pub sort_order: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = event_types)]
pub struct NewEventType<'a> {
    pub id: &'a str,
    pub admin_id: &'a str,
    pub family_id: Option<&'a str>,
    pub name: &'a str,
    pub default_points: i32,
    pub is_deduction: bool,
    pub icon: Option<&'a str>,
    pub sort_order: i32,
}

/// Partial update for an event type; `None` fields are left untouched.
#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = event_types)]
pub struct EventTypeChanges {
    pub name: Option<String>,
    pub default_points: Option<i32>,
    pub is_deduction: Option<bool>,
    pub icon: Option<String>,
    pub sort_order: Option<i32>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = events)]
#[diesel(belongs_to(EventType, foreign_key = event_type_id))]
pub struct Event {
    pub id: String,
    pub child_id: String,
    pub event_type_id: Option<String>,
    pub custom_name: Option<String>,
    pub points: i32,
    pub note: String,
    pub date: NaiveDate,
    pub created_by: Option<String>,
    /// Stored as text; one of `approved`/`pending`/`rejected`.
    pub status: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = events)]
pub struct NewEvent<'a> {
    pub id: &'a str,
    pub child_id: &'a str,
    pub event_type_id: Option<&'a str>,
    pub custom_name: Option<&'a str>,
    pub points: i32,
    pub note: &'a str,
    pub date: NaiveDate,
    pub created_by: Option<&'a str>,
    pub status: &'a str,
}

#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = events)]
pub struct EventChanges {
    pub points: Option<i32>,
    pub note: Option<String>,
    pub date: Option<NaiveDate>,
    pub custom_name: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = push_subscriptions)]
pub struct PushSubscription {
    pub id: i32,
    pub user_id: String,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub last_success_at: Option<NaiveDateTime>,
    pub last_error: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = push_subscriptions)]
pub struct NewPushSubscription<'a> {
    pub user_id: &'a str,
    pub endpoint: &'a str,
    pub p256dh: &'a str,
    pub auth: &'a str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = notification_settings)]
#[diesel(primary_key(user_id))]
pub struct NotificationSettings {
    pub user_id: String,
    pub child_requests: bool,
    pub request_results: bool,
    pub direct_changes: bool,
    pub sound: bool,
    pub vibration: bool,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = notification_settings)]
pub struct NewNotificationSettings<'a> {
    pub user_id: &'a str,
    pub child_requests: bool,
    pub request_results: bool,
    pub direct_changes: bool,
    pub sound: bool,
    pub vibration: bool,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub jti: &'a str,
    pub user_id: &'a str,
}
