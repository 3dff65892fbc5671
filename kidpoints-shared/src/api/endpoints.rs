use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::{API_V1_PREFIX, family_scope};

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

pub fn auth_signup(base: &str) -> String {
    base_join(base, &format!("{}/auth/signup", API_V1_PREFIX))
}
pub fn auth_login(base: &str) -> String {
    base_join(base, &format!("{}/auth/login", API_V1_PREFIX))
}
pub fn sse(base: &str) -> String {
    base_join(base, &format!("{}/sse", API_V1_PREFIX))
}
pub fn me(base: &str, family_id: &str) -> String {
    base_join(base, &format!("{}/me", family_scope(family_id)))
}
pub fn profiles(base: &str, family_id: &str) -> String {
    base_join(base, &format!("{}/profiles", family_scope(family_id)))
}
pub fn profile(base: &str, family_id: &str, profile_id: &str) -> String {
    base_join(
        base,
        &format!("{}/profiles/{}", family_scope(family_id), enc(profile_id)),
    )
}
pub fn children(base: &str, family_id: &str) -> String {
    base_join(base, &format!("{}/children", family_scope(family_id)))
}
pub fn admins(base: &str, family_id: &str) -> String {
    base_join(base, &format!("{}/admins", family_scope(family_id)))
}
pub fn event_types(base: &str, family_id: &str) -> String {
    base_join(base, &format!("{}/event-types", family_scope(family_id)))
}
pub fn event_type(base: &str, family_id: &str, type_id: &str) -> String {
    base_join(
        base,
        &format!("{}/event-types/{}", family_scope(family_id), enc(type_id)),
    )
}
pub fn event_types_reorder(base: &str, family_id: &str) -> String {
    base_join(
        base,
        &format!("{}/event-types/reorder", family_scope(family_id)),
    )
}
pub fn child_events(base: &str, family_id: &str, child_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/children/{}/events",
            family_scope(family_id),
            enc(child_id)
        ),
    )
}
pub fn child_balance(base: &str, family_id: &str, child_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/children/{}/balance",
            family_scope(family_id),
            enc(child_id)
        ),
    )
}
pub fn event(base: &str, family_id: &str, event_id: &str) -> String {
    base_join(
        base,
        &format!("{}/events/{}", family_scope(family_id), enc(event_id)),
    )
}
pub fn event_approve(base: &str, family_id: &str, event_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/events/{}/approve",
            family_scope(family_id),
            enc(event_id)
        ),
    )
}
pub fn event_reject(base: &str, family_id: &str, event_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/events/{}/reject",
            family_scope(family_id),
            enc(event_id)
        ),
    )
}
pub fn pending_events(base: &str, family_id: &str) -> String {
    base_join(base, &format!("{}/events/pending", family_scope(family_id)))
}
pub fn pending_count(base: &str, family_id: &str) -> String {
    base_join(
        base,
        &format!("{}/events/pending/count", family_scope(family_id)),
    )
}
pub fn push_subscribe(base: &str, family_id: &str) -> String {
    base_join(
        base,
        &format!("{}/push/subscriptions", family_scope(family_id)),
    )
}
pub fn push_unsubscribe(base: &str, family_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/push/subscriptions/unsubscribe",
            family_scope(family_id)
        ),
    )
}
pub fn notification_settings(base: &str, family_id: &str) -> String {
    base_join(
        base,
        &format!("{}/notification-settings", family_scope(family_id)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_paths_are_scoped_and_encoded() {
        assert_eq!(
            child_events("http://h/", "fam1", "kid 1"),
            "http://h/api/v1/family/fam1/children/kid%201/events"
        );
        assert_eq!(auth_login("http://h"), "http://h/api/v1/auth/login");
        assert_eq!(
            pending_count("http://h", "fam1"),
            "http://h/api/v1/family/fam1/events/pending/count"
        );
    }
}
