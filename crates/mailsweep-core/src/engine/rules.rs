use tracing::info;

use crate::rules::{ActionRule, RuleDraft};

use super::{ActionEngine, EngineError};

impl ActionEngine {
    pub async fn get_rule(&self, category_id: &str) -> Result<ActionRule, EngineError> {
        self.rules
            .get(category_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("no action rule for category {category_id}")))
    }

    pub async fn save_rule(
        &self,
        category_id: &str,
        draft: RuleDraft,
    ) -> Result<ActionRule, EngineError> {
        let rule = self.rules.save(category_id, draft).await?;
        info!(
            category_id,
            action = rule.action.as_str(),
            delay_days = rule.delay_days,
            enabled = rule.enabled,
            "saved action rule"
        );
        Ok(rule)
    }

    pub async fn delete_rule(&self, category_id: &str) -> Result<(), EngineError> {
        self.rules.delete(category_id).await?;
        info!(category_id, "deleted action rule");
        Ok(())
    }

    pub async fn set_rule_enabled(
        &self,
        category_id: &str,
        enabled: bool,
    ) -> Result<ActionRule, EngineError> {
        Ok(self.rules.set_enabled(category_id, enabled).await?)
    }

    pub async fn list_rules(&self) -> Result<Vec<ActionRule>, EngineError> {
        Ok(self.rules.list().await?)
    }
}
