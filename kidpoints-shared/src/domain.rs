use serde::{Deserialize, Serialize};

/// Lifecycle of a recorded point event. Admin entries are approved on
/// creation; child requests start pending and are approved or rejected
/// by an admin. Rejected rows stay in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Approved,
    Pending,
    Rejected,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Approved => "approved",
            EventStatus::Pending => "pending",
            EventStatus::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(EventStatus::Approved),
            "pending" => Ok(EventStatus::Pending),
            "rejected" => Ok(EventStatus::Rejected),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

/// Per-user notification toggles are keyed by these categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    ChildRequests,
    RequestResults,
    DirectChanges,
}

/// Template seeded for every new family.
#[derive(Debug, Clone)]
pub struct DefaultEventType {
    pub name: &'static str,
    pub default_points: i32,
    pub is_deduction: bool,
    pub icon: &'static str,
    pub sort_order: i32,
}

pub const DEFAULT_REWARD_TYPES: &[DefaultEventType] = &[
    DefaultEventType {
        name: "School attendance",
        default_points: 10,
        is_deduction: false,
        icon: "🏫",
        sort_order: 1,
    },
    DefaultEventType {
        name: "Good grade",
        default_points: 15,
        is_deduction: false,
        icon: "⭐",
        sort_order: 2,
    },
    DefaultEventType {
        name: "Homework done",
        default_points: 5,
        is_deduction: false,
        icon: "📝",
        sort_order: 3,
    },
    DefaultEventType {
        name: "Long walk",
        default_points: 10,
        is_deduction: false,
        icon: "🚶",
        sort_order: 4,
    },
    DefaultEventType {
        name: "Sports practice",
        default_points: 15,
        is_deduction: false,
        icon: "⚽",
        sort_order: 5,
    },
    DefaultEventType {
        name: "Bonus",
        default_points: 0,
        is_deduction: false,
        icon: "🎁",
        sort_order: 6,
    },
];

// Deductions sort after rewards so the quick-add list keeps both groups
// stable when new reward types are appended.
pub const DEFAULT_DEDUCTION_TYPES: &[DefaultEventType] = &[
    DefaultEventType {
        name: "Deduction",
        default_points: 0,
        is_deduction: true,
        icon: "➖",
        sort_order: 100,
    },
    DefaultEventType {
        name: "Purchase",
        default_points: 0,
        is_deduction: true,
        icon: "🛒",
        sort_order: 101,
    },
];

pub fn default_event_types() -> Vec<DefaultEventType> {
    DEFAULT_REWARD_TYPES
        .iter()
        .chain(DEFAULT_DEDUCTION_TYPES)
        .cloned()
        .collect()
}

pub const PASSWORD_MIN_LENGTH: usize = 8;

/// Shared password rule for signup and managed accounts: minimum
/// length plus at least one letter and one digit.
pub fn validate_password(password: &str) -> Result<(), &'static str> {
    if password.chars().count() < PASSWORD_MIN_LENGTH {
        return Err("password must be at least 8 characters");
    }
    let has_letter = password.chars().any(|c| c.is_ascii_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err("password must contain at least one letter and one number");
    }
    Ok(())
}

/// Renders a point delta with an explicit sign, e.g. `+10` / `-5`.
pub fn format_points(points: i32) -> String {
    if points >= 0 {
        format!("+{points}")
    } else {
        points.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_seed_shape() {
        let all = default_event_types();
        assert_eq!(all.len(), 8);
        assert_eq!(all.iter().filter(|t| t.is_deduction).count(), 2);
        // Rewards come first and keep their configured order.
        assert!(all[..6].iter().all(|t| !t.is_deduction));
        assert_eq!(all[0].name, "School attendance");
        assert_eq!(all[0].default_points, 10);
        // Deduction templates default to zero points; the admin types
        // the amount at entry time.
        assert!(all[6..].iter().all(|t| t.default_points == 0));
        assert!(all[6..].iter().all(|t| t.sort_order >= 100));
        // sort_order values are unique within the seed.
        let mut orders: Vec<i32> = all.iter().map(|t| t.sort_order).collect();
        orders.sort_unstable();
        orders.dedup();
        assert_eq!(orders.len(), all.len());
    }

    #[test]
    fn password_rule() {
        assert!(validate_password("abc123xy").is_ok());
        assert!(validate_password("short1").is_err());
        assert!(validate_password("lettersonly").is_err());
        assert!(validate_password("12345678").is_err());
    }

    #[test]
    fn points_formatting() {
        assert_eq!(format_points(10), "+10");
        assert_eq!(format_points(0), "+0");
        assert_eq!(format_points(-5), "-5");
    }

    #[test]
    fn status_roundtrip() {
        for s in [
            EventStatus::Approved,
            EventStatus::Pending,
            EventStatus::Rejected,
        ] {
            assert_eq!(s.as_str().parse::<EventStatus>().unwrap(), s);
        }
    }
}
