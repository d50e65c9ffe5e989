use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};

use crate::emails::Email;
use crate::proposals::{NewProposal, ProposalError, ProposalEvent};
use crate::rules::ActionRule;

use super::batch::BatchScope;
use super::matcher::{EmailFacts, Eligibility, MatchRule, evaluate};
use super::types::{DryRunSummary, RunRequest};
use super::{ActionEngine, EngineError};

impl ActionEngine {
    /// Materializes a `pending` proposal for every due email of the selected
    /// rules. Nothing is sent to the mail provider.
    pub async fn process_dry_run(
        &self,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<DryRunSummary, EngineError> {
        self.process_dry_run_at(request, Utc::now(), cancel).await
    }

    pub async fn process_dry_run_at(
        &self,
        request: RunRequest,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<DryRunSummary, EngineError> {
        let span = info_span!("dry_run", force = request.force);
        self.dry_run_inner(request, now, cancel).instrument(span).await
    }

    async fn dry_run_inner(
        &self,
        request: RunRequest,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<DryRunSummary, EngineError> {
        let scope = BatchScope::new(cancel, request.timeout_secs);
        let rules = self.select_rules(request.category_ids.as_deref()).await?;
        let mut summary = DryRunSummary::default();

        'rules: for rule in &rules {
            if scope.token.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            summary.categories_processed += 1;

            let matcher_rule = MatchRule::from(rule);
            let history = self
                .proposals
                .history_for_rule(&rule.category_id, rule.action)
                .await?;

            for email in self.emails.list_inbox_by_category(&rule.category_id).await? {
                if scope.token.is_cancelled() {
                    summary.cancelled = true;
                    break 'rules;
                }
                summary.emails_processed += 1;

                let past = history.get(&email.id).copied().unwrap_or_default();
                let facts = EmailFacts {
                    received_at: email.received_at,
                    live_proposal: past.live,
                    decided_proposal: past.decided,
                };

                match evaluate(&matcher_rule, &facts, now, request.force) {
                    Eligibility::Due { age_days, reason } => {
                        if facts.live_proposal {
                            self.supersede_live(rule, &email, now).await?;
                        }
                        if self
                            .propose(rule, email, age_days, reason, now)
                            .await?
                        {
                            summary.proposals_created += 1;
                        }
                    }
                    Eligibility::NotDue(why) => {
                        debug!(email_id = %email.id, reason = ?why, "email not due");
                    }
                }
            }
        }

        info!(
            proposals_created = summary.proposals_created,
            emails_processed = summary.emails_processed,
            categories_processed = summary.categories_processed,
            cancelled = summary.cancelled,
            "dry run finished"
        );
        Ok(summary)
    }

    /// Expires the current live proposal so a forced regeneration replaces it.
    async fn supersede_live(
        &self,
        rule: &ActionRule,
        email: &Email,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let Some(live) = self
            .proposals
            .find_pending(&email.id, &rule.category_id, rule.action)
            .await?
        else {
            return Ok(());
        };

        match self
            .proposals
            .transition(&live.id, ProposalEvent::Supersede, now)
            .await
        {
            Ok(_) => {
                debug!(proposal_id = %live.id, email_id = %email.id, "superseded live proposal");
                Ok(())
            }
            Err(ProposalError::Conflict { id, current }) => {
                debug!(proposal_id = %id, status = current.as_str(), "live proposal resolved concurrently");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Returns false when a concurrent generator already holds the live slot.
    async fn propose(
        &self,
        rule: &ActionRule,
        email: Email,
        age_days: u32,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let email_id = email.id.clone();
        let created = self
            .proposals
            .create(
                NewProposal {
                    email_id: email.id,
                    subject: email.subject,
                    sender: email.sender,
                    email_date: email.received_at,
                    category_id: rule.category_id.clone(),
                    category_name: rule.category_name.clone(),
                    action_type: rule.action,
                    reason,
                    email_age_days: age_days,
                },
                now,
            )
            .await?;

        match created {
            Some(proposal) => {
                debug!(proposal_id = %proposal.id, email_id = %email_id, "created proposal");
                Ok(true)
            }
            None => {
                debug!(email_id = %email_id, "live proposal already exists; skipping");
                Ok(false)
            }
        }
    }
}
