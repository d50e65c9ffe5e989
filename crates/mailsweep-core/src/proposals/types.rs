use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::rules::RuleAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// Something that happens to a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalEvent {
    Approve,
    Reject,
    Expire,
    /// A forced regeneration replaced this proposal with a newer one.
    Supersede,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Expired => "expired",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// The transition table. `None` means the event is not allowed from this
    /// state; only `Pending` has outbound edges.
    pub fn apply(self, event: ProposalEvent) -> Option<ProposalStatus> {
        match (self, event) {
            (ProposalStatus::Pending, ProposalEvent::Approve) => Some(ProposalStatus::Approved),
            (ProposalStatus::Pending, ProposalEvent::Reject) => Some(ProposalStatus::Rejected),
            (ProposalStatus::Pending, ProposalEvent::Expire) => Some(ProposalStatus::Expired),
            (ProposalStatus::Pending, ProposalEvent::Supersede) => Some(ProposalStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != ProposalStatus::Pending
    }
}

/// A recommended action waiting for, or past, human review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProposedAction {
    pub id: String,
    pub email_id: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    /// When the email was received.
    pub date: DateTime<Utc>,
    pub category_id: String,
    pub category_name: String,
    pub action_type: RuleAction,
    pub reason: String,
    pub email_age_days: u32,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewProposal {
    pub email_id: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub email_date: DateTime<Utc>,
    pub category_id: String,
    pub category_name: String,
    pub action_type: RuleAction,
    pub reason: String,
    pub email_age_days: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalFilter {
    pub status: Option<ProposalStatus>,
    pub action_type: Option<RuleAction>,
    pub category_id: Option<String>,
}

/// What the proposal store already says about one email under one rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProposalHistory {
    pub live: bool,
    pub decided: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StatusCounts {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub expired: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ActionTypeCounts {
    pub archive: usize,
    pub trash: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProposalStats {
    pub total_proposals: usize,
    pub by_status: StatusCounts,
    pub by_action_type: ActionTypeCounts,
}
