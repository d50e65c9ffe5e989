use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::proposals::ProposedAction;
use crate::rules::RuleAction;

/// Input shared by the dry-run and execute pipelines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RunRequest {
    /// Restrict the run to these categories. All categories with an enabled
    /// rule when absent.
    #[serde(default)]
    pub category_ids: Option<Vec<String>>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    #[ts(type = "number | null")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RealizeRequest {
    #[serde(default)]
    #[ts(type = "number | null")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DryRunSummary {
    pub proposals_created: usize,
    pub emails_processed: usize,
    pub categories_processed: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ExecuteSummary {
    pub operations_created: usize,
    pub emails_processed: usize,
    pub failed_count: usize,
    pub categories_processed: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RealizeSummary {
    pub operations_created: usize,
    pub proposals_processed: usize,
    pub failed_count: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CleanupSummary {
    pub expired_proposals_removed: usize,
}

/// Why one item of a bulk request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum BulkFailureKind {
    Conflict,
    NotFound,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FailedAction {
    pub action_id: String,
    pub error: BulkFailureKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BulkApproveResult {
    pub approved_count: usize,
    pub failed_count: usize,
    pub failed_actions: Vec<FailedAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BulkRejectResult {
    pub rejected_count: usize,
    pub failed_count: usize,
    pub failed_actions: Vec<FailedAction>,
}

/// The rule a preview was computed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PreviewRule {
    pub action: RuleAction,
    pub delay_days: u32,
    pub enabled: bool,
    /// True when the caller supplied the rule instead of the saved one.
    pub hypothetical: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PreviewEmail {
    pub id: String,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub received_at: DateTime<Utc>,
    pub age_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PreviewResponse {
    pub category_id: String,
    pub category_name: String,
    pub rule: PreviewRule,
    pub affected_email_count: usize,
    pub affected_emails: Vec<PreviewEmail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ProposalPage {
    pub items: Vec<ProposedAction>,
    pub total: usize,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
}

impl ProposalPage {
    pub fn new(items: Vec<ProposedAction>, total: usize, page: u32, page_size: u32) -> Self {
        Self {
            has_more: (page as usize) * (page_size as usize) < total,
            items,
            total,
            page,
            page_size,
        }
    }
}
