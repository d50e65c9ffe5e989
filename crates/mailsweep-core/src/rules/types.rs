use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

pub const MIN_DELAY_DAYS: i64 = 1;
pub const MAX_DELAY_DAYS: i64 = 365;

/// What a rule does to an aged email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum RuleAction {
    Archive,
    Trash,
}

impl RuleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAction::Archive => "archive",
            RuleAction::Trash => "trash",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "archive" => Some(Self::Archive),
            "trash" => Some(Self::Trash),
            _ => None,
        }
    }
}

/// The per-category policy. There is at most one per category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ActionRule {
    pub category_id: String,
    pub category_name: String,
    pub action: RuleAction,
    pub delay_days: u32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rule fields as supplied by a caller, before validation. Also used as the
/// hypothetical rule of a preview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDraft {
    pub action: RuleAction,
    pub delay_days: i64,
    pub enabled: bool,
}

impl RuleDraft {
    pub fn new(action: RuleAction, delay_days: i64) -> Self {
        Self {
            action,
            delay_days,
            enabled: true,
        }
    }

    /// Returns the delay as stored, or a message describing why it is out of range.
    pub fn validated_delay(&self) -> Result<u32, String> {
        if (MIN_DELAY_DAYS..=MAX_DELAY_DAYS).contains(&self.delay_days) {
            Ok(self.delay_days as u32)
        } else {
            Err(format!(
                "delay_days must be between {MIN_DELAY_DAYS} and {MAX_DELAY_DAYS}, got {}",
                self.delay_days
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_bounds_are_inclusive() {
        assert_eq!(RuleDraft::new(RuleAction::Trash, 1).validated_delay(), Ok(1));
        assert_eq!(
            RuleDraft::new(RuleAction::Archive, 365).validated_delay(),
            Ok(365)
        );
        assert!(RuleDraft::new(RuleAction::Trash, 0).validated_delay().is_err());
        assert!(RuleDraft::new(RuleAction::Trash, 366).validated_delay().is_err());
        assert!(RuleDraft::new(RuleAction::Trash, -4).validated_delay().is_err());
    }

    #[test]
    fn action_strings_match_storage() {
        for action in [RuleAction::Archive, RuleAction::Trash] {
            assert_eq!(RuleAction::from_str(action.as_str()), Some(action));
        }
        assert_eq!(RuleAction::from_str("delete"), None);
        assert_eq!(
            serde_json::to_string(&RuleAction::Trash).expect("serialize"),
            "\"trash\""
        );
    }
}
