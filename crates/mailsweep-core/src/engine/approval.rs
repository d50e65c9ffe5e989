use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::proposals::{ProposalEvent, ProposalFilter, ProposedAction};

use super::batch::{BatchTally, run_isolated};
use super::types::{BulkApproveResult, BulkFailureKind, BulkRejectResult, FailedAction, ProposalPage};
use super::{ActionEngine, DEFAULT_PAGE_SIZE, EngineError, MAX_PAGE_SIZE};

impl ActionEngine {
    pub async fn get_proposal(&self, id: &str) -> Result<ProposedAction, EngineError> {
        Ok(self.proposals.get(id).await?)
    }

    /// Proposals matching `filter`, newest first. `page` is 1-based.
    pub async fn list_proposals(
        &self,
        filter: &ProposalFilter,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<ProposalPage, EngineError> {
        let page = page.unwrap_or(1);
        if page == 0 {
            return Err(EngineError::Validation("page starts at 1".to_string()));
        }
        let page_size = page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1).saturating_mul(page_size);

        let (items, total) = self.proposals.list(filter, page_size, offset).await?;
        Ok(ProposalPage::new(items, total, page, page_size))
    }

    pub async fn approve(&self, id: &str) -> Result<ProposedAction, EngineError> {
        self.decide(id, ProposalEvent::Approve).await
    }

    pub async fn reject(&self, id: &str) -> Result<ProposedAction, EngineError> {
        self.decide(id, ProposalEvent::Reject).await
    }

    pub async fn bulk_approve(&self, ids: Vec<String>) -> BulkApproveResult {
        let tally = self.decide_many(ids, ProposalEvent::Approve).await;
        info!(
            approved = tally.succeeded,
            failed = tally.failed(),
            "bulk approve finished"
        );
        BulkApproveResult {
            approved_count: tally.succeeded,
            failed_count: tally.failed(),
            failed_actions: tally.failures,
        }
    }

    pub async fn bulk_reject(&self, ids: Vec<String>) -> BulkRejectResult {
        let tally = self.decide_many(ids, ProposalEvent::Reject).await;
        info!(
            rejected = tally.succeeded,
            failed = tally.failed(),
            "bulk reject finished"
        );
        BulkRejectResult {
            rejected_count: tally.succeeded,
            failed_count: tally.failed(),
            failed_actions: tally.failures,
        }
    }

    async fn decide(&self, id: &str, event: ProposalEvent) -> Result<ProposedAction, EngineError> {
        let proposal = self.proposals.transition(id, event, Utc::now()).await?;
        info!(
            proposal_id = %proposal.id,
            status = proposal.status.as_str(),
            "proposal decided"
        );
        Ok(proposal)
    }

    // Bulk requests are never cancelled part way, so every id is attempted.
    async fn decide_many(&self, ids: Vec<String>, event: ProposalEvent) -> BatchTally<FailedAction> {
        let never = CancellationToken::new();
        run_isolated(ids, self.concurrency(), &never, |id: String| async move {
            match self.proposals.transition(&id, event, Utc::now()).await {
                Ok(_) => Ok(()),
                Err(err) => {
                    let err = EngineError::from(err);
                    let kind = match &err {
                        EngineError::Conflict { .. } => BulkFailureKind::Conflict,
                        EngineError::NotFound(_) => BulkFailureKind::NotFound,
                        _ => {
                            warn!(proposal_id = %id, error = %err, "bulk decision failed");
                            BulkFailureKind::Internal
                        }
                    };
                    Err(FailedAction {
                        action_id: id,
                        error: kind,
                    })
                }
            }
        })
        .await
    }
}
