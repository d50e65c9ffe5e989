use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::proposals::{ProposalError, ProposalEvent};

use super::types::CleanupSummary;
use super::{ActionEngine, EngineError};

impl ActionEngine {
    /// Expires `pending` proposals older than the configured TTL.
    pub async fn cleanup_expired_proposals(&self) -> Result<CleanupSummary, EngineError> {
        self.cleanup_expired_proposals_at(Utc::now()).await
    }

    pub async fn cleanup_expired_proposals_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<CleanupSummary, EngineError> {
        let cutoff = now - Duration::days(i64::from(self.config.proposal_ttl_days));
        let stale = self.proposals.list_stale_pending(cutoff).await?;
        self.expire_all(stale, now).await
    }

    /// Applies `Expire` to each id. Ids decided or deleted since they were
    /// listed are skipped.
    async fn expire_all(
        &self,
        ids: Vec<String>,
        now: DateTime<Utc>,
    ) -> Result<CleanupSummary, EngineError> {
        let mut summary = CleanupSummary::default();
        for id in ids {
            match self.proposals.transition(&id, ProposalEvent::Expire, now).await {
                Ok(_) => summary.expired_proposals_removed += 1,
                Err(ProposalError::Conflict { id, current }) => {
                    debug!(proposal_id = %id, status = current.as_str(), "proposal decided before expiry");
                }
                Err(ProposalError::NotFound(id)) => {
                    debug!(proposal_id = %id, "proposal vanished before expiry");
                }
                Err(err) => return Err(err.into()),
            }
        }

        if summary.expired_proposals_removed > 0 {
            info!(
                expired = summary.expired_proposals_removed,
                "expired stale proposals"
            );
        }
        Ok(summary)
    }
}
