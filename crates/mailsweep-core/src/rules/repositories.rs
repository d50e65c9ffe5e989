use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use libsql::{Row, params};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::db::{Database, DbError, now_rfc3339, parse_rfc3339};

use super::types::{ActionRule, RuleAction, RuleDraft};

const RULE_COLUMNS: &str = "r.category_id, c.name, r.action, r.delay_days, r.enabled, r.created_at, r.updated_at";

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("no action rule for category {0}")]
    NotFound(String),
    #[error("category not found: {0}")]
    CategoryNotFound(String),
    #[error("invalid rule: {0}")]
    Invalid(String),
}

/// The rule's own columns. The category name is read on every lookup so a
/// renamed category never shows up under its old name.
#[derive(Debug, Clone)]
struct CachedRule {
    action: RuleAction,
    delay_days: u32,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CachedRule {
    fn into_rule(self, category_id: &str, category_name: String) -> ActionRule {
        ActionRule {
            category_id: category_id.to_string(),
            category_name,
            action: self.action,
            delay_days: self.delay_days,
            enabled: self.enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Default)]
struct RuleCache {
    entries: HashMap<String, Option<CachedRule>>,
    /// Bumped by every invalidation. A fill started under an older
    /// generation is discarded.
    generation: u64,
}

/// Storage for per-category action rules.
///
/// Single-rule reads go through an in-process cache of rule columns keyed by
/// category. Every write made through this repository drops the affected
/// entry; anything writing `action_rules` elsewhere must call
/// [`ActionRuleRepository::invalidate`] or [`ActionRuleRepository::invalidate_all`].
#[derive(Clone)]
pub struct ActionRuleRepository {
    db: Database,
    cache: Arc<RwLock<RuleCache>>,
}

impl ActionRuleRepository {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cache: Arc::new(RwLock::new(RuleCache::default())),
        }
    }

    pub async fn get(&self, category_id: &str) -> Result<Option<ActionRule>, RuleError> {
        let (cached, generation) = {
            let cache = self.cache.read().await;
            (cache.entries.get(category_id).cloned(), cache.generation)
        };

        let fields = match cached {
            Some(fields) => fields,
            None => {
                let fields = self.fetch(category_id).await?;
                self.fill(category_id, generation, fields.clone()).await;
                fields
            }
        };

        let Some(fields) = fields else {
            return Ok(None);
        };
        let Some(category_name) = self.category_name(category_id).await? else {
            return Ok(None);
        };
        Ok(Some(fields.into_rule(category_id, category_name)))
    }

    async fn fill(&self, category_id: &str, generation: u64, fields: Option<CachedRule>) {
        let mut cache = self.cache.write().await;
        if cache.generation == generation {
            cache.entries.insert(category_id.to_string(), fields);
        }
    }

    async fn fetch(&self, category_id: &str) -> Result<Option<CachedRule>, RuleError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "SELECT action, delay_days, enabled, created_at, updated_at
                 FROM action_rules WHERE category_id = ?1",
                params![category_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_cached(row)?)),
            None => Ok(None),
        }
    }

    async fn category_name(&self, category_id: &str) -> Result<Option<String>, RuleError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "SELECT name FROM categories WHERE id = ?1",
                params![category_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Create or replace the rule for a category.
    pub async fn save(&self, category_id: &str, draft: RuleDraft) -> Result<ActionRule, RuleError> {
        let delay_days = draft.validated_delay().map_err(RuleError::Invalid)?;

        let conn = self.db.connection().await?;
        let mut rows = conn
            .query("SELECT 1 FROM categories WHERE id = ?1", params![category_id])
            .await?;
        if rows.next().await?.is_none() {
            return Err(RuleError::CategoryNotFound(category_id.to_string()));
        }

        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO action_rules (category_id, action, delay_days, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(category_id) DO UPDATE SET
                action = excluded.action,
                delay_days = excluded.delay_days,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at",
            params![
                category_id,
                draft.action.as_str(),
                delay_days as i64,
                draft.enabled as i64,
                now
            ],
        )
        .await?;

        self.invalidate(category_id).await;
        self.get(category_id)
            .await?
            .ok_or_else(|| RuleError::NotFound(category_id.to_string()))
    }

    /// Removes the rule. Removing a missing rule succeeds. Proposals made
    /// under the rule are left alone.
    pub async fn delete(&self, category_id: &str) -> Result<(), RuleError> {
        let conn = self.db.connection().await?;
        conn.execute(
            "DELETE FROM action_rules WHERE category_id = ?1",
            params![category_id],
        )
        .await?;
        self.invalidate(category_id).await;
        Ok(())
    }

    pub async fn set_enabled(&self, category_id: &str, enabled: bool) -> Result<ActionRule, RuleError> {
        let conn = self.db.connection().await?;
        let updated = conn
            .execute(
                "UPDATE action_rules SET enabled = ?2, updated_at = ?3 WHERE category_id = ?1",
                params![category_id, enabled as i64, now_rfc3339()],
            )
            .await?;
        self.invalidate(category_id).await;

        if updated == 0 {
            return Err(RuleError::NotFound(category_id.to_string()));
        }
        self.get(category_id)
            .await?
            .ok_or_else(|| RuleError::NotFound(category_id.to_string()))
    }

    /// All rules, ordered by category name.
    pub async fn list(&self) -> Result<Vec<ActionRule>, RuleError> {
        self.list_where("1 = 1").await
    }

    pub async fn list_enabled(&self) -> Result<Vec<ActionRule>, RuleError> {
        self.list_where("r.enabled = 1").await
    }

    async fn list_where(&self, predicate: &str) -> Result<Vec<ActionRule>, RuleError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RULE_COLUMNS} FROM action_rules r
                     JOIN categories c ON c.id = r.category_id
                     WHERE {predicate}
                     ORDER BY c.name, r.category_id"
                ),
                (),
            )
            .await?;

        let mut rules = Vec::new();
        while let Some(row) = rows.next().await? {
            rules.push(row_to_rule(row)?);
        }
        Ok(rules)
    }

    pub async fn invalidate(&self, category_id: &str) {
        let mut cache = self.cache.write().await;
        cache.generation += 1;
        cache.entries.remove(category_id);
    }

    pub async fn invalidate_all(&self) {
        let mut cache = self.cache.write().await;
        cache.generation += 1;
        cache.entries.clear();
    }
}

fn row_to_rule(row: Row) -> Result<ActionRule, RuleError> {
    let action: String = row.get(2)?;
    let delay_days: i64 = row.get(3)?;
    let enabled: i64 = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    Ok(ActionRule {
        category_id: row.get(0)?,
        category_name: row.get(1)?,
        action: parse_action(&action)?,
        delay_days: parse_delay(delay_days)?,
        enabled: enabled != 0,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
    })
}

fn row_to_cached(row: Row) -> Result<CachedRule, RuleError> {
    let action: String = row.get(0)?;
    let delay_days: i64 = row.get(1)?;
    let enabled: i64 = row.get(2)?;
    let created_at: String = row.get(3)?;
    let updated_at: String = row.get(4)?;

    Ok(CachedRule {
        action: parse_action(&action)?,
        delay_days: parse_delay(delay_days)?,
        enabled: enabled != 0,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
    })
}

fn parse_action(value: &str) -> Result<RuleAction, RuleError> {
    RuleAction::from_str(value).ok_or_else(|| RuleError::Invalid(format!("unknown action {value}")))
}

fn parse_delay(value: i64) -> Result<u32, RuleError> {
    u32::try_from(value).map_err(|_| RuleError::Invalid(format!("stored delay_days {value}")))
}
