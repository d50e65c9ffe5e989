use chrono::{DateTime, Utc};

use crate::rules::RuleDraft;

use super::matcher::{EmailFacts, Eligibility, MatchRule, evaluate};
use super::types::{PreviewEmail, PreviewResponse, PreviewRule};
use super::{ActionEngine, EngineError, MAX_PREVIEW_SAMPLE};

impl ActionEngine {
    /// Which inbox emails of a category a rule would act on right now.
    /// Read-only.
    pub async fn preview(
        &self,
        category_id: &str,
        hypothetical: Option<RuleDraft>,
        sample_size: Option<usize>,
    ) -> Result<PreviewResponse, EngineError> {
        self.preview_at(category_id, hypothetical, sample_size, Utc::now())
            .await
    }

    pub async fn preview_at(
        &self,
        category_id: &str,
        hypothetical: Option<RuleDraft>,
        sample_size: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<PreviewResponse, EngineError> {
        let category = self.categories.get(category_id).await?;

        let rule = match hypothetical {
            Some(draft) => {
                let delay_days = draft.validated_delay().map_err(EngineError::Validation)?;
                PreviewRule {
                    action: draft.action,
                    delay_days,
                    enabled: draft.enabled,
                    hypothetical: true,
                }
            }
            None => {
                let saved = self.get_rule(category_id).await?;
                PreviewRule {
                    action: saved.action,
                    delay_days: saved.delay_days,
                    enabled: saved.enabled,
                    hypothetical: false,
                }
            }
        };

        // Proposal history is ignored: the preview answers "what would this
        // rule touch", not "what would the next dry run propose".
        let matcher_rule = MatchRule {
            category_name: category.name.clone(),
            action: rule.action,
            delay_days: rule.delay_days,
            enabled: rule.enabled,
        };

        let sample_size = sample_size
            .unwrap_or(self.config.preview_sample_size)
            .clamp(1, MAX_PREVIEW_SAMPLE);

        let mut affected_email_count = 0;
        let mut affected_emails = Vec::new();
        for email in self.emails.list_inbox_by_category(category_id).await? {
            let facts = EmailFacts {
                received_at: email.received_at,
                live_proposal: false,
                decided_proposal: false,
            };
            if let Eligibility::Due { age_days, .. } = evaluate(&matcher_rule, &facts, now, false) {
                affected_email_count += 1;
                if affected_emails.len() < sample_size {
                    affected_emails.push(PreviewEmail {
                        id: email.id,
                        subject: email.subject,
                        sender: email.sender,
                        received_at: email.received_at,
                        age_days,
                    });
                }
            }
        }

        Ok(PreviewResponse {
            category_id: category.id,
            category_name: category.name,
            rule,
            affected_email_count,
            affected_emails,
        })
    }
}
