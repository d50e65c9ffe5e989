use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::emails::{Email, EmailError};
use crate::operations::{NewOperation, OperationError, OperationResult};
use crate::provider::{ProviderError, action_in_effect, location_after};
use crate::rules::RuleAction;

use super::batch::{BatchScope, retry_with_backoff, run_isolated};
use super::matcher::{EmailFacts, Eligibility, MatchRule, evaluate};
use super::types::{ExecuteSummary, RealizeRequest, RealizeSummary, RunRequest};
use super::{ActionEngine, EngineError};

/// One email to act on, with the provenance its operation records.
#[derive(Debug, Clone)]
struct ExecutionTarget {
    email: Email,
    action: RuleAction,
    category_id: Option<String>,
    proposal_id: Option<String>,
}

/// Why one email in a batch did not end in a successful operation. These
/// are tallied into `failed_count` and never returned to the caller.
#[derive(Debug, Error)]
enum ItemFailure {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("failed to record operation: {0}")]
    Record(#[from] OperationError),
}

impl ActionEngine {
    /// Applies every selected rule straight to the mailbox, skipping the
    /// proposal step.
    pub async fn process_execute(
        &self,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecuteSummary, EngineError> {
        self.process_execute_at(request, Utc::now(), cancel).await
    }

    pub async fn process_execute_at(
        &self,
        request: RunRequest,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ExecuteSummary, EngineError> {
        let span = info_span!("execute", force = request.force);
        self.execute_inner(request, now, cancel).instrument(span).await
    }

    async fn execute_inner(
        &self,
        request: RunRequest,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ExecuteSummary, EngineError> {
        let scope = BatchScope::new(cancel, request.timeout_secs);
        let rules = self.select_rules(request.category_ids.as_deref()).await?;
        let mut summary = ExecuteSummary::default();

        let mut targets = Vec::new();
        for rule in &rules {
            if scope.token.is_cancelled() {
                break;
            }
            summary.categories_processed += 1;

            let matcher_rule = MatchRule::from(rule);
            let history = self
                .proposals
                .history_for_rule(&rule.category_id, rule.action)
                .await?;
            for email in self.emails.list_inbox_by_category(&rule.category_id).await? {
                let past = history.get(&email.id).copied().unwrap_or_default();
                let facts = EmailFacts {
                    received_at: email.received_at,
                    live_proposal: past.live,
                    decided_proposal: past.decided,
                };
                if let Eligibility::Due { .. } = evaluate(&matcher_rule, &facts, now, request.force) {
                    targets.push(ExecutionTarget {
                        email,
                        action: rule.action,
                        category_id: Some(rule.category_id.clone()),
                        proposal_id: None,
                    });
                }
            }
        }

        let token = scope.token.clone();
        let tally = run_isolated(targets, self.concurrency(), &scope.token, |target| {
            let token = token.clone();
            async move { self.apply_to_email(target, &token).await }
        })
        .await;

        summary.operations_created = tally.succeeded;
        summary.failed_count = tally.failed();
        summary.emails_processed = tally.processed();
        summary.cancelled = scope.token.is_cancelled() || tally.cancelled();

        info!(
            operations_created = summary.operations_created,
            failed = summary.failed_count,
            emails_processed = summary.emails_processed,
            categories_processed = summary.categories_processed,
            cancelled = summary.cancelled,
            "execute finished"
        );
        Ok(summary)
    }

    /// Carries out approved proposals that have not been applied yet.
    pub async fn execute_approved(
        &self,
        request: RealizeRequest,
        cancel: &CancellationToken,
    ) -> Result<RealizeSummary, EngineError> {
        let span = info_span!("execute_approved");
        self.execute_approved_inner(request, cancel)
            .instrument(span)
            .await
    }

    async fn execute_approved_inner(
        &self,
        request: RealizeRequest,
        cancel: &CancellationToken,
    ) -> Result<RealizeSummary, EngineError> {
        let scope = BatchScope::new(cancel, request.timeout_secs);
        let approved = self
            .proposals
            .list_unrealized_approved(self.config.max_realization_attempts)
            .await?;

        let mut targets = Vec::with_capacity(approved.len());
        for proposal in approved {
            let email = match self.emails.get(&proposal.email_id).await {
                Ok(email) => email,
                Err(EmailError::NotFound(_)) => {
                    warn!(
                        proposal_id = %proposal.id,
                        email_id = %proposal.email_id,
                        "approved proposal has no stored email; skipping"
                    );
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            targets.push(ExecutionTarget {
                email,
                action: proposal.action_type,
                category_id: Some(proposal.category_id),
                proposal_id: Some(proposal.id),
            });
        }

        let token = scope.token.clone();
        let tally = run_isolated(targets, self.concurrency(), &scope.token, |target| {
            let token = token.clone();
            async move { self.apply_to_email(target, &token).await }
        })
        .await;

        let summary = RealizeSummary {
            operations_created: tally.succeeded,
            proposals_processed: tally.processed(),
            failed_count: tally.failed(),
            cancelled: scope.token.is_cancelled() || tally.cancelled(),
        };
        info!(
            operations_created = summary.operations_created,
            failed = summary.failed_count,
            proposals_processed = summary.proposals_processed,
            cancelled = summary.cancelled,
            "approved proposals executed"
        );
        Ok(summary)
    }

    /// Asks the provider where the message is, mutates it only when the
    /// action is not already in effect, records the operation and moves the
    /// stored email. An `Err` means the recorded operation is a failure.
    async fn apply_to_email(
        &self,
        target: ExecutionTarget,
        cancel: &CancellationToken,
    ) -> Result<(), ItemFailure> {
        let policy = self.retry_policy();
        let message_id = target.email.provider_message_id.as_str();

        let (location, mut attempts) = retry_with_backoff(&policy, cancel, "message_location", || {
            self.provider.message_location(message_id)
        })
        .await;

        let outcome = match location {
            Ok(current) if action_in_effect(target.action, current) => {
                debug!(email_id = %target.email.id, location = current.as_str(), "action already in effect");
                Ok((current, true))
            }
            Ok(_) => {
                let (applied, calls) = retry_with_backoff(&policy, cancel, target.action.as_str(), || {
                    self.provider.apply(target.action, message_id)
                })
                .await;
                attempts += calls;
                applied.map(|()| (location_after(target.action), false))
            }
            Err(err) => Err(err),
        };

        let (result, error, already_applied) = match &outcome {
            Ok((_, already)) => (OperationResult::Success, None, *already),
            Err(err) => (OperationResult::Failure, Some(err.to_string()), false),
        };

        let recorded = self
            .operations
            .record(
                NewOperation {
                    email_id: target.email.id.clone(),
                    proposal_id: target.proposal_id.clone(),
                    category_id: target.category_id.clone(),
                    action_type: target.action,
                    result,
                    error,
                    attempts,
                    already_applied,
                },
                Utc::now(),
            )
            .await;
        if let Err(err) = recorded {
            error!(email_id = %target.email.id, error = %err, "failed to record operation");
            return Err(err.into());
        }

        match outcome {
            Ok((new_location, _)) => {
                // The provider already holds the new state and the operation
                // is recorded as a success; a stale local location is only logged.
                if new_location != target.email.location {
                    if let Err(err) = self.emails.set_location(&target.email.id, new_location).await {
                        error!(email_id = %target.email.id, error = %err, "failed to update email location");
                    }
                }
                Ok(())
            }
            Err(err) => {
                warn!(
                    email_id = %target.email.id,
                    proposal_id = target.proposal_id.as_deref().unwrap_or(""),
                    action = target.action.as_str(),
                    attempts,
                    error = %err,
                    "provider action failed"
                );
                Err(err.into())
            }
        }
    }
}
