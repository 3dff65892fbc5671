use std::{collections::HashMap, sync::Arc};

use kidpoints_shared::domain::{EventStatus, NotificationCategory, format_points};
use serde::Serialize;
use tracing::{info, warn};
use web_push::{
    ContentEncoding, HyperWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushMessageBuilder,
};

use crate::storage::{
    Store,
    models::{Event, NotificationSettings, PushSubscription},
};

use super::config::AppConfig;

const NOTIFICATION_ICON: &str = "/pwa-192x192.png";
const VIBRATION_PATTERN: [u32; 3] = [200, 100, 200];

/// Row-change descriptor handed to the dispatcher after every write to
/// the events table: `{kind, record, old_status}`.
#[derive(Debug, Clone)]
pub struct EventChange {
    pub kind: ChangeKind,
    pub record: Event,
    pub old_status: Option<EventStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
}

/// Who a notification goes to; resolved to profile ids against storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// All owner/admin profiles of the child's family.
    FamilyAdmins,
    /// The child the event belongs to.
    Child,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub category: NotificationCategory,
    pub audience: Audience,
}

/// Decides whether a row change warrants a notification and which one.
/// Mirrors the four cases of the event lifecycle: a child submitting a
/// request, an admin approving it, rejecting it, or recording an event
/// directly.
pub(crate) fn classify_change(
    change: &EventChange,
    child_name: &str,
    event_name: &str,
) -> Option<Notification> {
    let record = &change.record;
    let status = record.status.parse::<EventStatus>().ok()?;
    let is_deduction = record.points < 0;
    let signed = format_points(record.points);
    let note = if record.note.is_empty() {
        String::new()
    } else {
        format!(": {}", record.note)
    };

    // Child creates a pending request.
    if change.kind == ChangeKind::Insert && status == EventStatus::Pending {
        return Some(Notification {
            title: child_name.to_string(),
            body: format!("{signed} points {event_name}{note}"),
            category: NotificationCategory::ChildRequests,
            audience: Audience::FamilyAdmins,
        });
    }

    // Admin approves a pending request.
    if change.kind == ChangeKind::Update
        && change.old_status == Some(EventStatus::Pending)
        && status == EventStatus::Approved
    {
        let body = if is_deduction {
            format!("{signed} points {event_name}{note}")
        } else {
            format!("{signed} points for {event_name}{note}")
        };
        return Some(Notification {
            title: "Request approved".to_string(),
            body,
            category: NotificationCategory::RequestResults,
            audience: Audience::Child,
        });
    }

    // Admin rejects a pending request.
    if change.kind == ChangeKind::Update
        && change.old_status == Some(EventStatus::Pending)
        && status == EventStatus::Rejected
    {
        return Some(Notification {
            title: "Request rejected".to_string(),
            body: format!("{event_name}{note}"),
            category: NotificationCategory::RequestResults,
            audience: Audience::Child,
        });
    }

    // Admin directly records an approved event for the child.
    if change.kind == ChangeKind::Insert
        && status == EventStatus::Approved
        && record.created_by.as_deref() != Some(record.child_id.as_str())
    {
        let (title, body) = if is_deduction {
            (
                "Points deducted".to_string(),
                format!("{signed} {event_name}{note}"),
            )
        } else {
            (
                "Points awarded".to_string(),
                format!("{signed} for {event_name}{note}"),
            )
        };
        return Some(Notification {
            title,
            body,
            category: NotificationCategory::DirectChanges,
            audience: Audience::Child,
        });
    }

    None
}

fn category_enabled(settings: Option<&NotificationSettings>, category: NotificationCategory) -> bool {
    // No settings row means every category is enabled.
    let Some(s) = settings else { return true };
    match category {
        NotificationCategory::ChildRequests => s.child_requests,
        NotificationCategory::RequestResults => s.request_results,
        NotificationCategory::DirectChanges => s.direct_changes,
    }
}

#[derive(Serialize)]
struct PushPayload<'a> {
    title: &'a str,
    body: &'a str,
    icon: &'a str,
    badge: &'a str,
    silent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    vibrate: Option<[u32; 3]>,
    data: PushData<'a>,
}

#[derive(Serialize)]
struct PushData<'a> {
    url: &'a str,
}

#[derive(Clone)]
pub struct PushService {
    inner: Arc<PushServiceInner>,
}

struct PushServiceInner {
    client: HyperWebPushClient,
    vapid_private: String,
    contact: Option<String>,
}

impl PushService {
    pub fn from_config(cfg: &AppConfig) -> Option<Self> {
        let push_cfg = cfg.push.as_ref()?;
        if !push_cfg.enabled {
            return None;
        }
        let vapid_private = push_cfg.vapid_private.clone()?;
        if push_cfg
            .vapid_public
            .as_deref()
            .map(|s| s.trim().is_empty())
            .unwrap_or(true)
            || vapid_private.trim().is_empty()
        {
            warn!("push: missing VAPID key(s); disabling push service");
            return None;
        }

        Some(Self {
            inner: Arc::new(PushServiceInner {
                client: HyperWebPushClient::new(),
                vapid_private,
                contact: push_cfg.contact_email.clone(),
            }),
        })
    }

    /// One spawned task per row change; delivery failures never fail
    /// the request that caused the change.
    pub fn dispatch_change(&self, store: Store, change: EventChange) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(err) = inner.handle_change(store, change).await {
                warn!(error = %err, "push: failed to handle event change");
            }
        });
    }
}

impl PushServiceInner {
    async fn handle_change(self: Arc<Self>, store: Store, change: EventChange) -> Result<(), String> {
        let Some(child) = store
            .find_profile(&change.record.child_id)
            .await
            .map_err(|e| e.to_string())?
        else {
            return Ok(());
        };
        let Some(family_id) = child.family_id.clone() else {
            return Ok(());
        };

        let event_name = match &change.record.custom_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => match &change.record.event_type_id {
                Some(type_id) => store
                    .get_event_type(type_id)
                    .await
                    .map_err(|e| e.to_string())?
                    .map(|t| t.name)
                    .unwrap_or_default(),
                None => String::new(),
            },
        };

        let Some(notification) = classify_change(&change, &child.name, &event_name) else {
            return Ok(());
        };

        let recipients = match notification.audience {
            Audience::FamilyAdmins => store
                .family_admin_ids(&family_id)
                .await
                .map_err(|e| e.to_string())?,
            Audience::Child => vec![child.id.clone()],
        };
        if recipients.is_empty() {
            return Ok(());
        }

        let settings: HashMap<String, NotificationSettings> = store
            .notification_settings_for_users(recipients.clone())
            .await
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|s| (s.user_id.clone(), s))
            .collect();

        let eligible: Vec<String> = recipients
            .into_iter()
            .filter(|id| category_enabled(settings.get(id), notification.category))
            .collect();
        if eligible.is_empty() {
            return Ok(());
        }

        let subs = store
            .list_push_subscriptions_for_users(eligible)
            .await
            .map_err(|e| e.to_string())?;

        for sub in subs {
            let user_settings = settings.get(&sub.user_id);
            let silent = user_settings.map(|s| !s.sound).unwrap_or(false);
            let vibrate = user_settings
                .map(|s| s.vibration)
                .unwrap_or(true)
                .then_some(VIBRATION_PATTERN);
            let payload = PushPayload {
                title: &notification.title,
                body: &notification.body,
                icon: NOTIFICATION_ICON,
                badge: NOTIFICATION_ICON,
                silent,
                vibrate,
                data: PushData { url: "/" },
            };
            let bytes = serde_json::to_vec(&payload).map_err(|e| e.to_string())?;

            let store_clone = store.clone();
            let service = self.clone();
            tokio::spawn(async move {
                if let Err(err) = service.send_single(store_clone, sub, bytes).await {
                    warn!(error = %err, "push: send attempt failed");
                }
            });
        }
        Ok(())
    }

    async fn send_single(
        &self,
        store: Store,
        subscription: PushSubscription,
        payload: Vec<u8>,
    ) -> Result<(), String> {
        let endpoint = subscription.endpoint.clone();

        let subscription_info = SubscriptionInfo::new(
            subscription.endpoint.clone(),
            subscription.p256dh.clone(),
            subscription.auth.clone(),
        );

        let mut builder = WebPushMessageBuilder::new(&subscription_info);
        builder.set_payload(ContentEncoding::Aes128Gcm, &payload);

        let mut vapid = VapidSignatureBuilder::from_base64(&self.vapid_private, &subscription_info)
            .map_err(|e| e.to_string())?;
        if let Some(contact) = &self.contact {
            vapid.add_claim("sub", contact.clone());
        }
        let signature = vapid.build().map_err(|e| e.to_string())?;
        builder.set_vapid_signature(signature);

        match self
            .client
            .send(builder.build().map_err(|e| e.to_string())?)
            .await
        {
            Ok(()) => {
                info!(endpoint = %endpoint, "push: delivered");
                if let Err(e) = store
                    .mark_push_delivery_result(subscription.id, true, None)
                    .await
                {
                    warn!(endpoint = %endpoint, error = %e, "push: failed to mark success");
                }
            }
            Err(err) => {
                let err_str = err.to_string();
                warn!(endpoint = %endpoint, error = %err_str, "push: send failed");

                if let Err(e) = store
                    .mark_push_delivery_result(subscription.id, false, Some(&err_str))
                    .await
                {
                    warn!(endpoint = %endpoint, error = %e, "push: failed to mark error");
                }

                // 410/404 from the push service: the subscription is gone.
                if matches!(
                    err,
                    web_push::WebPushError::EndpointNotFound(_)
                        | web_push::WebPushError::EndpointNotValid(_)
                ) {
                    if let Err(e) = store
                        .delete_push_subscription(&subscription.user_id, &endpoint)
                        .await
                    {
                        warn!(
                            endpoint = %endpoint,
                            error = %e,
                            "push: failed to remove stale subscription"
                        );
                    }
                }

                return Err(err_str);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn event(status: &str, points: i32, created_by: Option<&str>, note: &str) -> Event {
        Event {
            id: "ev1".into(),
            child_id: "kid1".into(),
            event_type_id: None,
            custom_name: Some("Dishes".into()),
            points,
            note: note.into(),
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            created_by: created_by.map(|s| s.to_string()),
            status: status.into(),
            created_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn pending_insert_notifies_admins() {
        let change = EventChange {
            kind: ChangeKind::Insert,
            record: event("pending", 10, Some("kid1"), "before dinner"),
            old_status: None,
        };
        let n = classify_change(&change, "Alice", "Dishes").unwrap();
        assert_eq!(n.audience, Audience::FamilyAdmins);
        assert_eq!(n.category, NotificationCategory::ChildRequests);
        assert_eq!(n.title, "Alice");
        assert_eq!(n.body, "+10 points Dishes: before dinner");
    }

    #[test]
    fn approval_notifies_child() {
        let change = EventChange {
            kind: ChangeKind::Update,
            record: event("approved", 10, Some("kid1"), ""),
            old_status: Some(EventStatus::Pending),
        };
        let n = classify_change(&change, "Alice", "Dishes").unwrap();
        assert_eq!(n.audience, Audience::Child);
        assert_eq!(n.category, NotificationCategory::RequestResults);
        assert_eq!(n.title, "Request approved");
        assert_eq!(n.body, "+10 points for Dishes");
    }

    #[test]
    fn rejection_notifies_child_without_points() {
        let change = EventChange {
            kind: ChangeKind::Update,
            record: event("rejected", 10, Some("kid1"), "too late"),
            old_status: Some(EventStatus::Pending),
        };
        let n = classify_change(&change, "Alice", "Dishes").unwrap();
        assert_eq!(n.title, "Request rejected");
        assert_eq!(n.body, "Dishes: too late");
        assert_eq!(n.category, NotificationCategory::RequestResults);
    }

    #[test]
    fn direct_admin_entry_notifies_child() {
        let change = EventChange {
            kind: ChangeKind::Insert,
            record: event("approved", -5, Some("parent1"), ""),
            old_status: None,
        };
        let n = classify_change(&change, "Alice", "Dishes").unwrap();
        assert_eq!(n.title, "Points deducted");
        assert_eq!(n.body, "-5 Dishes");
        assert_eq!(n.category, NotificationCategory::DirectChanges);
        assert_eq!(n.audience, Audience::Child);
    }

    #[test]
    fn self_insert_of_approved_event_is_silent() {
        // An approved insert attributed to the child itself is not a
        // direct admin entry.
        let change = EventChange {
            kind: ChangeKind::Insert,
            record: event("approved", 5, Some("kid1"), ""),
            old_status: None,
        };
        assert!(classify_change(&change, "Alice", "Dishes").is_none());
    }

    #[test]
    fn plain_edit_is_silent() {
        let change = EventChange {
            kind: ChangeKind::Update,
            record: event("approved", 5, Some("parent1"), ""),
            old_status: Some(EventStatus::Approved),
        };
        assert!(classify_change(&change, "Alice", "Dishes").is_none());
    }

    #[test]
    fn missing_settings_row_means_enabled() {
        assert!(category_enabled(None, NotificationCategory::ChildRequests));
    }
}
