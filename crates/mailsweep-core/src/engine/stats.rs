use crate::proposals::ProposalStats;

use super::{ActionEngine, EngineError};

impl ActionEngine {
    pub async fn stats(&self) -> Result<ProposalStats, EngineError> {
        Ok(self.proposals.stats().await?)
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use crate::engine::test_support::Harness;
    use crate::engine::types::RunRequest;
    use crate::proposals::{ProposalFilter, ProposalStats};
    use crate::rules::RuleAction;

    #[tokio::test]
    async fn empty_store_has_zero_counts() {
        let h = Harness::new().await;
        assert_eq!(h.engine.stats().await.expect("stats"), ProposalStats::default());
    }

    #[tokio::test]
    async fn counts_by_status_and_action_type() {
        let h = Harness::new().await;
        h.category("promo", "Promotions").await;
        h.category("news", "Newsletters").await;
        h.rule("promo", RuleAction::Trash, 1, true).await;
        h.rule("news", RuleAction::Archive, 1, true).await;
        h.email("p1", "promo", 3).await;
        h.email("p2", "promo", 3).await;
        h.email("n1", "news", 3).await;

        h.engine
            .process_dry_run(RunRequest::default(), &CancellationToken::new())
            .await
            .expect("dry run");
        let ids: Vec<String> = h
            .engine
            .list_proposals(&ProposalFilter::default(), None, None)
            .await
            .expect("list")
            .items
            .into_iter()
            .map(|p| p.id)
            .collect();
        h.engine.approve(&ids[0]).await.expect("approve");
        h.engine.reject(&ids[1]).await.expect("reject");

        let stats = h.engine.stats().await.expect("stats");
        assert_eq!(stats.total_proposals, 3);
        assert_eq!(stats.by_status.pending, 1);
        assert_eq!(stats.by_status.approved, 1);
        assert_eq!(stats.by_status.rejected, 1);
        assert_eq!(stats.by_status.expired, 0);
        assert_eq!(stats.by_action_type.trash, 2);
        assert_eq!(stats.by_action_type.archive, 1);
        assert_eq!(
            stats.by_status.pending
                + stats.by_status.approved
                + stats.by_status.rejected
                + stats.by_status.expired,
            stats.total_proposals
        );
    }

    #[tokio::test]
    async fn breakdowns_agree_while_proposals_are_created() {
        let h = Harness::new().await;
        h.category("promo", "Promotions").await;
        h.category("news", "Newsletters").await;
        h.rule("promo", RuleAction::Trash, 1, true).await;
        h.rule("news", RuleAction::Archive, 1, true).await;
        for i in 0..10 {
            h.email(&format!("p{i}"), "promo", 3).await;
            h.email(&format!("n{i}"), "news", 3).await;
        }

        let cancel = CancellationToken::new();
        let dry_run = h.engine.process_dry_run(RunRequest::default(), &cancel);
        let sample = async {
            let mut seen = Vec::new();
            for _ in 0..20 {
                seen.push(h.engine.stats().await.expect("stats"));
                tokio::task::yield_now().await;
            }
            seen
        };
        let (summary, seen) = tokio::join!(dry_run, sample);
        assert_eq!(summary.expect("dry run").proposals_created, 20);

        for stats in seen.into_iter().chain([h.engine.stats().await.expect("stats")]) {
            assert_eq!(
                stats.by_action_type.archive + stats.by_action_type.trash,
                stats.total_proposals
            );
            assert_eq!(stats.by_status.pending, stats.total_proposals);
        }
    }
}
