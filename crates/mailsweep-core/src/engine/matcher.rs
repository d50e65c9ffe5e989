//! Pure eligibility decision for a single email under a single rule.

use chrono::{DateTime, Utc};

use crate::rules::{ActionRule, RuleAction};

/// The parts of a rule the matcher looks at. Built from a saved
/// [`ActionRule`] or from a hypothetical one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRule {
    pub category_name: String,
    pub action: RuleAction,
    pub delay_days: u32,
    pub enabled: bool,
}

impl From<&ActionRule> for MatchRule {
    fn from(rule: &ActionRule) -> Self {
        Self {
            category_name: rule.category_name.clone(),
            action: rule.action,
            delay_days: rule.delay_days,
            enabled: rule.enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmailFacts {
    pub received_at: DateTime<Utc>,
    /// A `pending` proposal exists for this email under the same rule.
    pub live_proposal: bool,
    /// A user already approved or rejected a proposal for this email under
    /// the same rule.
    pub decided_proposal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotDueReason {
    RuleDisabled,
    TooRecent { age_days: u32, remaining_days: u32 },
    LiveProposalExists,
    AlreadyDecided,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Due { age_days: u32, reason: String },
    NotDue(NotDueReason),
}

impl Eligibility {
    pub fn is_due(&self) -> bool {
        matches!(self, Eligibility::Due { .. })
    }
}

/// Whole days between `received_at` and `now`, rounded down. Mail from the
/// future is zero days old.
pub fn age_in_days(received_at: DateTime<Utc>, now: DateTime<Utc>) -> u32 {
    let days = (now - received_at).num_days().max(0);
    u32::try_from(days).unwrap_or(u32::MAX)
}

/// Decides whether `rule` should act on an email now. `force` ignores
/// proposal history but never the enabled flag or the delay.
pub fn evaluate(rule: &MatchRule, facts: &EmailFacts, now: DateTime<Utc>, force: bool) -> Eligibility {
    if !rule.enabled {
        return Eligibility::NotDue(NotDueReason::RuleDisabled);
    }

    let age_days = age_in_days(facts.received_at, now);
    if age_days < rule.delay_days {
        return Eligibility::NotDue(NotDueReason::TooRecent {
            age_days,
            remaining_days: rule.delay_days - age_days,
        });
    }

    if !force {
        if facts.live_proposal {
            return Eligibility::NotDue(NotDueReason::LiveProposalExists);
        }
        if facts.decided_proposal {
            return Eligibility::NotDue(NotDueReason::AlreadyDecided);
        }
    }

    Eligibility::Due {
        age_days,
        reason: format!(
            "Older than {} in category \"{}\" ({} old)",
            plural_days(rule.delay_days),
            rule.category_name,
            plural_days(age_days)
        ),
    }
}

fn plural_days(n: u32) -> String {
    if n == 1 {
        "1 day".to_string()
    } else {
        format!("{n} days")
    }
}
