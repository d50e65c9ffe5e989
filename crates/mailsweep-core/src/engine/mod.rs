//! The action engine: rule-driven proposals, approval, execution and upkeep.

pub mod approval;
pub mod batch;
pub mod dry_run;
pub mod execute;
pub mod matcher;
pub mod preview;
pub mod rules;
pub mod stats;
pub mod sweeper;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::categories::{CategoryError, CategoryRepository};
use crate::config::EngineConfig;
use crate::db::Database;
use crate::emails::{EmailError, EmailRepository};
use crate::operations::{OperationError, OperationRepository};
use crate::proposals::{ProposalError, ProposalRepository, ProposalStatus};
use crate::provider::MailProvider;
use crate::rules::{ActionRule, ActionRuleRepository, RuleError};

pub use batch::{BatchScope, BatchTally, RetryPolicy, retry_with_backoff, run_isolated};
pub use matcher::{EmailFacts, Eligibility, MatchRule, NotDueReason, age_in_days, evaluate};
pub use types::{
    BulkApproveResult, BulkFailureKind, BulkRejectResult, CleanupSummary, DryRunSummary,
    ExecuteSummary, FailedAction, PreviewEmail, PreviewResponse, PreviewRule, ProposalPage,
    RealizeRequest, RealizeSummary, RunRequest,
};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const MAX_PREVIEW_SAMPLE: usize = 50;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("proposed action {id} is already {}", .current.as_str())]
    Conflict { id: String, current: ProposalStatus },
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RuleError> for EngineError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::NotFound(id) => EngineError::NotFound(format!("no action rule for category {id}")),
            RuleError::CategoryNotFound(id) => EngineError::NotFound(format!("category {id}")),
            RuleError::Invalid(msg) => EngineError::Validation(msg),
            other => EngineError::Storage(other.to_string()),
        }
    }
}

impl From<ProposalError> for EngineError {
    fn from(err: ProposalError) -> Self {
        match err {
            ProposalError::NotFound(id) => EngineError::NotFound(format!("proposed action {id}")),
            ProposalError::Conflict { id, current } => EngineError::Conflict { id, current },
            other => EngineError::Storage(other.to_string()),
        }
    }
}

impl From<CategoryError> for EngineError {
    fn from(err: CategoryError) -> Self {
        match err {
            CategoryError::NotFound(id) => EngineError::NotFound(format!("category {id}")),
            other => EngineError::Storage(other.to_string()),
        }
    }
}

impl From<EmailError> for EngineError {
    fn from(err: EmailError) -> Self {
        match err {
            EmailError::NotFound(id) => EngineError::NotFound(format!("email {id}")),
            other => EngineError::Storage(other.to_string()),
        }
    }
}

impl From<OperationError> for EngineError {
    fn from(err: OperationError) -> Self {
        EngineError::Storage(err.to_string())
    }
}

/// Entry point for every engine operation. Cheap to clone.
#[derive(Clone)]
pub struct ActionEngine {
    rules: ActionRuleRepository,
    categories: CategoryRepository,
    emails: EmailRepository,
    proposals: ProposalRepository,
    operations: OperationRepository,
    provider: Arc<dyn MailProvider>,
    config: EngineConfig,
}

impl ActionEngine {
    pub fn new(db: Database, provider: Arc<dyn MailProvider>, config: EngineConfig) -> Self {
        Self {
            rules: ActionRuleRepository::new(db.clone()),
            categories: CategoryRepository::new(db.clone()),
            emails: EmailRepository::new(db.clone()),
            proposals: ProposalRepository::new(db.clone()),
            operations: OperationRepository::new(db),
            provider,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.provider_max_attempts,
            base_delay: Duration::from_millis(self.config.retry_base_delay_ms),
        }
    }

    fn concurrency(&self) -> usize {
        self.config.max_concurrency.max(1)
    }

    /// Rules a pipeline run covers: all enabled rules, or the enabled rules
    /// among the named categories. Unknown and disabled categories are skipped.
    async fn select_rules(
        &self,
        category_ids: Option<&[String]>,
    ) -> Result<Vec<ActionRule>, EngineError> {
        let Some(ids) = category_ids else {
            return Ok(self.rules.list_enabled().await?);
        };

        let mut selected: Vec<ActionRule> = Vec::new();
        for id in ids {
            if selected.iter().any(|rule| &rule.category_id == id) {
                continue;
            }
            match self.rules.get(id).await? {
                Some(rule) if rule.enabled => selected.push(rule),
                Some(_) => tracing::debug!(category_id = %id, "skipping disabled rule"),
                None => tracing::debug!(category_id = %id, "skipping category without rule"),
            }
        }
        Ok(selected)
    }
}
