use std::collections::HashMap;

use chrono::{DateTime, Utc};
use libsql::{Row, params};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{Database, DbError, parse_optional_rfc3339, parse_rfc3339, to_rfc3339};
use crate::rules::RuleAction;

use super::types::{
    NewProposal, ProposalEvent, ProposalFilter, ProposalHistory, ProposalStats, ProposalStatus,
    ProposedAction,
};

const PROPOSAL_COLUMNS: &str = "id, email_id, subject, sender, email_date, category_id, category_name, action_type, reason, email_age_days, status, created_at, updated_at, resolved_at";

#[derive(Debug, Error)]
pub enum ProposalError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("proposed action not found: {0}")]
    NotFound(String),
    #[error("proposed action {id} is already {}", .current.as_str())]
    Conflict { id: String, current: ProposalStatus },
    #[error("invalid status value {0}")]
    InvalidStatus(String),
    #[error("invalid action type {0}")]
    InvalidActionType(String),
}

#[derive(Clone)]
pub struct ProposalRepository {
    db: Database,
}

impl ProposalRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a `pending` proposal. Returns `None` when another pending
    /// proposal for the same email, category and action already exists.
    pub async fn create(
        &self,
        new_proposal: NewProposal,
        now: DateTime<Utc>,
    ) -> Result<Option<ProposedAction>, ProposalError> {
        let NewProposal {
            email_id,
            subject,
            sender,
            email_date,
            category_id,
            category_name,
            action_type,
            reason,
            email_age_days,
        } = new_proposal;

        let id = Uuid::new_v4().to_string();
        let now = to_rfc3339(now);
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO proposed_actions (
                        id, email_id, subject, sender, email_date, category_id, category_name,
                        action_type, reason, email_age_days, status, created_at, updated_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11, ?11)
                    ON CONFLICT DO NOTHING
                    RETURNING {PROPOSAL_COLUMNS}"
                ),
                params![
                    id,
                    email_id,
                    subject,
                    sender,
                    to_rfc3339(email_date),
                    category_id,
                    category_name,
                    action_type.as_str(),
                    reason,
                    email_age_days as i64,
                    now
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_proposal(row)?)),
            None => Ok(None),
        }
    }

    pub async fn get(&self, id: &str) -> Result<ProposedAction, ProposalError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {PROPOSAL_COLUMNS} FROM proposed_actions WHERE id = ?1"),
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_proposal(row),
            None => Err(ProposalError::NotFound(id.to_string())),
        }
    }

    /// One page of proposals, newest first, plus the total matching count.
    pub async fn list(
        &self,
        filter: &ProposalFilter,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<ProposedAction>, usize), ProposalError> {
        let mut conditions = Vec::new();
        let mut params_vec: Vec<libsql::Value> = Vec::new();

        if let Some(status) = filter.status {
            params_vec.push(status.as_str().into());
            conditions.push(format!("status = ?{}", params_vec.len()));
        }
        if let Some(action_type) = filter.action_type {
            params_vec.push(action_type.as_str().into());
            conditions.push(format!("action_type = ?{}", params_vec.len()));
        }
        if let Some(category_id) = &filter.category_id {
            params_vec.push(category_id.clone().into());
            conditions.push(format!("category_id = ?{}", params_vec.len()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let conn = self.db.connection().await?;
        let mut count_rows = conn
            .query(
                &format!("SELECT COUNT(*) FROM proposed_actions {where_clause}"),
                params_vec.clone(),
            )
            .await?;
        let total: i64 = match count_rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };

        let limit_idx = params_vec.len() + 1;
        let offset_idx = params_vec.len() + 2;
        params_vec.push((limit as i64).into());
        params_vec.push((offset as i64).into());

        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PROPOSAL_COLUMNS} FROM proposed_actions
                     {where_clause}
                     ORDER BY created_at DESC, id ASC
                     LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
                ),
                params_vec,
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(row_to_proposal(row)?);
        }
        Ok((items, total as usize))
    }

    /// Applies `event` with compare-and-swap on the `pending` status. A lost
    /// race reports the status the row actually has.
    pub async fn transition(
        &self,
        id: &str,
        event: ProposalEvent,
        now: DateTime<Utc>,
    ) -> Result<ProposedAction, ProposalError> {
        let from = ProposalStatus::Pending;
        let Some(to) = from.apply(event) else {
            return Err(ProposalError::InvalidStatus(format!("{event:?}")));
        };

        let now = to_rfc3339(now);
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "UPDATE proposed_actions
                     SET status = ?1, updated_at = ?2, resolved_at = ?2
                     WHERE id = ?3 AND status = ?4
                     RETURNING {PROPOSAL_COLUMNS}"
                ),
                params![to.as_str(), now, id, from.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_proposal(row),
            None => {
                let latest = self.get(id).await?;
                Err(ProposalError::Conflict {
                    id: id.to_string(),
                    current: latest.status,
                })
            }
        }
    }

    /// The live proposal for an email under a rule, if any.
    pub async fn find_pending(
        &self,
        email_id: &str,
        category_id: &str,
        action_type: RuleAction,
    ) -> Result<Option<ProposedAction>, ProposalError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PROPOSAL_COLUMNS} FROM proposed_actions
                     WHERE email_id = ?1 AND category_id = ?2 AND action_type = ?3 AND status = 'pending'"
                ),
                params![email_id, category_id, action_type.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_proposal(row)?)),
            None => Ok(None),
        }
    }

    /// Per-email summary of the proposals made under one rule.
    pub async fn history_for_rule(
        &self,
        category_id: &str,
        action_type: RuleAction,
    ) -> Result<HashMap<String, ProposalHistory>, ProposalError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "SELECT email_id,
                        MAX(status = 'pending'),
                        MAX(status IN ('approved', 'rejected'))
                 FROM proposed_actions
                 WHERE category_id = ?1 AND action_type = ?2
                 GROUP BY email_id",
                params![category_id, action_type.as_str()],
            )
            .await?;

        let mut history = HashMap::new();
        while let Some(row) = rows.next().await? {
            let email_id: String = row.get(0)?;
            let live: i64 = row.get(1)?;
            let decided: i64 = row.get(2)?;
            history.insert(
                email_id,
                ProposalHistory {
                    live: live != 0,
                    decided: decided != 0,
                },
            );
        }
        Ok(history)
    }

    /// Ids of `pending` proposals created before `cutoff`, oldest first.
    pub async fn list_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>, ProposalError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                "SELECT id FROM proposed_actions
                 WHERE status = 'pending' AND created_at < ?1
                 ORDER BY created_at ASC, id ASC",
                params![to_rfc3339(cutoff)],
            )
            .await?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get::<String>(0)?);
        }
        Ok(ids)
    }

    /// Approved proposals with no successful operation and fewer than
    /// `max_failures` failed ones.
    pub async fn list_unrealized_approved(
        &self,
        max_failures: u32,
    ) -> Result<Vec<ProposedAction>, ProposalError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PROPOSAL_COLUMNS} FROM proposed_actions
                     WHERE status = 'approved'
                       AND NOT EXISTS (
                           SELECT 1 FROM operations o
                           WHERE o.proposal_id = proposed_actions.id AND o.result = 'success'
                       )
                       AND (
                           SELECT COUNT(*) FROM operations o
                           WHERE o.proposal_id = proposed_actions.id AND o.result = 'failure'
                       ) < ?1
                     ORDER BY resolved_at ASC, id ASC"
                ),
                params![max_failures as i64],
            )
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(row_to_proposal(row)?);
        }
        Ok(items)
    }

    /// Counts by status and by action type from one grouped query, so both
    /// breakdowns describe the same snapshot.
    pub async fn stats(&self) -> Result<ProposalStats, ProposalError> {
        let conn = self.db.connection().await?;
        let mut stats = ProposalStats::default();

        let mut rows = conn
            .query(
                "SELECT status, action_type, COUNT(*) FROM proposed_actions
                 GROUP BY status, action_type",
                (),
            )
            .await?;
        while let Some(row) = rows.next().await? {
            let status: String = row.get(0)?;
            let action_type: String = row.get(1)?;
            let count = row.get::<i64>(2)? as usize;

            let by_status = match ProposalStatus::from_str(&status) {
                Some(ProposalStatus::Pending) => &mut stats.by_status.pending,
                Some(ProposalStatus::Approved) => &mut stats.by_status.approved,
                Some(ProposalStatus::Rejected) => &mut stats.by_status.rejected,
                Some(ProposalStatus::Expired) => &mut stats.by_status.expired,
                None => return Err(ProposalError::InvalidStatus(status)),
            };
            *by_status += count;

            let by_action = match RuleAction::from_str(&action_type) {
                Some(RuleAction::Archive) => &mut stats.by_action_type.archive,
                Some(RuleAction::Trash) => &mut stats.by_action_type.trash,
                None => return Err(ProposalError::InvalidActionType(action_type)),
            };
            *by_action += count;

            stats.total_proposals += count;
        }

        Ok(stats)
    }
}

fn row_to_proposal(row: Row) -> Result<ProposedAction, ProposalError> {
    let email_date: String = row.get(4)?;
    let action_type: String = row.get(7)?;
    let email_age_days: i64 = row.get(9)?;
    let status: String = row.get(10)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;
    let resolved_at: Option<String> = row.get(13)?;

    Ok(ProposedAction {
        id: row.get(0)?,
        email_id: row.get(1)?,
        subject: row.get(2)?,
        sender: row.get(3)?,
        date: parse_rfc3339(&email_date)?,
        category_id: row.get(5)?,
        category_name: row.get(6)?,
        action_type: RuleAction::from_str(&action_type)
            .ok_or(ProposalError::InvalidActionType(action_type))?,
        reason: row.get(8)?,
        email_age_days: email_age_days.max(0) as u32,
        status: ProposalStatus::from_str(&status).ok_or(ProposalError::InvalidStatus(status))?,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
        resolved_at: parse_optional_rfc3339(resolved_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::CategoryRepository;
    use crate::emails::{EmailRepository, MailboxLocation, NewEmail};
    use crate::migrations::run_migrations;
    use chrono::Duration;
    use tempfile::TempDir;

    struct Fixture {
        repo: ProposalRepository,
        db: Database,
        email_ids: Vec<String>,
        _dir: TempDir,
    }

    async fn setup(email_count: usize) -> Fixture {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::new(&dir.path().join("db.sqlite"))
            .await
            .expect("create db");
        run_migrations(&db).await.expect("migrations");
        CategoryRepository::new(db.clone())
            .upsert("promo", "Promotions")
            .await
            .expect("category");

        let emails = EmailRepository::new(db.clone());
        let mut email_ids = Vec::new();
        for i in 0..email_count {
            let email = emails
                .upsert(NewEmail {
                    provider_message_id: format!("msg-{i}"),
                    category_id: Some("promo".into()),
                    subject: Some(format!("Sale {i}")),
                    sender: Some("shop@example.com".into()),
                    received_at: Utc::now() - Duration::days(5),
                    location: MailboxLocation::Inbox,
                })
                .await
                .expect("email");
            email_ids.push(email.id);
        }

        Fixture {
            repo: ProposalRepository::new(db.clone()),
            db,
            email_ids,
            _dir: dir,
        }
    }

    fn proposal_for(email_id: &str, action_type: RuleAction) -> NewProposal {
        NewProposal {
            email_id: email_id.to_string(),
            subject: Some("Sale".into()),
            sender: Some("shop@example.com".into()),
            email_date: Utc::now() - Duration::days(5),
            category_id: "promo".into(),
            category_name: "Promotions".into(),
            action_type,
            reason: "Older than 3 days in category \"Promotions\" (5 days old)".into(),
            email_age_days: 5,
        }
    }

    #[tokio::test]
    async fn second_pending_insert_is_skipped() {
        let fx = setup(1).await;
        let email = &fx.email_ids[0];

        let first = fx
            .repo
            .create(proposal_for(email, RuleAction::Trash), Utc::now())
            .await
            .expect("create");
        assert!(first.is_some());

        let second = fx
            .repo
            .create(proposal_for(email, RuleAction::Trash), Utc::now())
            .await
            .expect("create");
        assert!(second.is_none());

        let other_action = fx
            .repo
            .create(proposal_for(email, RuleAction::Archive), Utc::now())
            .await
            .expect("create");
        assert!(other_action.is_some(), "different action is a different rule");
    }

    #[tokio::test]
    async fn transition_is_compare_and_swap() {
        let fx = setup(1).await;
        let created = fx
            .repo
            .create(proposal_for(&fx.email_ids[0], RuleAction::Trash), Utc::now())
            .await
            .expect("create")
            .expect("inserted");

        let approved = fx
            .repo
            .transition(&created.id, ProposalEvent::Approve, Utc::now())
            .await
            .expect("approve");
        assert_eq!(approved.status, ProposalStatus::Approved);
        assert!(approved.resolved_at.is_some());

        let err = fx
            .repo
            .transition(&created.id, ProposalEvent::Reject, Utc::now())
            .await
            .expect_err("already approved");
        match err {
            ProposalError::Conflict { id, current } => {
                assert_eq!(id, created.id);
                assert_eq!(current, ProposalStatus::Approved);
            }
            other => panic!("unexpected error: {other}"),
        }

        let unchanged = fx.repo.get(&created.id).await.expect("get");
        assert_eq!(unchanged.status, ProposalStatus::Approved);
    }

    #[tokio::test]
    async fn transition_of_unknown_id_is_not_found() {
        let fx = setup(0).await;
        let err = fx
            .repo
            .transition("missing", ProposalEvent::Approve, Utc::now())
            .await
            .expect_err("missing");
        assert!(matches!(err, ProposalError::NotFound(_)));
    }

    #[tokio::test]
    async fn history_tracks_live_and_decided_proposals() {
        let fx = setup(3).await;
        let now = Utc::now();
        let live = &fx.email_ids[0];
        let rejected = &fx.email_ids[1];
        let expired = &fx.email_ids[2];

        fx.repo
            .create(proposal_for(live, RuleAction::Trash), now)
            .await
            .expect("create");
        let r = fx
            .repo
            .create(proposal_for(rejected, RuleAction::Trash), now)
            .await
            .expect("create")
            .expect("inserted");
        fx.repo
            .transition(&r.id, ProposalEvent::Reject, now)
            .await
            .expect("reject");
        let e = fx
            .repo
            .create(proposal_for(expired, RuleAction::Trash), now)
            .await
            .expect("create")
            .expect("inserted");
        fx.repo
            .transition(&e.id, ProposalEvent::Expire, now)
            .await
            .expect("expire");

        let history = fx
            .repo
            .history_for_rule("promo", RuleAction::Trash)
            .await
            .expect("history");
        assert_eq!(
            history[live],
            ProposalHistory {
                live: true,
                decided: false
            }
        );
        assert_eq!(
            history[rejected],
            ProposalHistory {
                live: false,
                decided: true
            }
        );
        assert_eq!(history[expired], ProposalHistory::default());

        let archive_history = fx
            .repo
            .history_for_rule("promo", RuleAction::Archive)
            .await
            .expect("history");
        assert!(archive_history.is_empty());
    }

    #[tokio::test]
    async fn list_filters_paginates_and_orders_newest_first() {
        let fx = setup(3).await;
        let base = Utc::now() - Duration::hours(3);
        let mut ids = Vec::new();
        for (i, email) in fx.email_ids.iter().enumerate() {
            let created = fx
                .repo
                .create(
                    proposal_for(email, RuleAction::Trash),
                    base + Duration::hours(i as i64),
                )
                .await
                .expect("create")
                .expect("inserted");
            ids.push(created.id);
        }
        fx.repo
            .transition(&ids[0], ProposalEvent::Reject, Utc::now())
            .await
            .expect("reject");

        let (page, total) = fx
            .repo
            .list(&ProposalFilter::default(), 2, 0)
            .await
            .expect("list");
        assert_eq!(total, 3);
        assert_eq!(
            page.iter().map(|p| p.id.clone()).collect::<Vec<_>>(),
            vec![ids[2].clone(), ids[1].clone()]
        );

        let pending = ProposalFilter {
            status: Some(ProposalStatus::Pending),
            ..Default::default()
        };
        let (items, total) = fx.repo.list(&pending, 20, 0).await.expect("list");
        assert_eq!(total, 2);
        assert!(items.iter().all(|p| p.status == ProposalStatus::Pending));

        let archive_only = ProposalFilter {
            action_type: Some(RuleAction::Archive),
            category_id: Some("promo".into()),
            ..Default::default()
        };
        let (items, total) = fx.repo.list(&archive_only, 20, 0).await.expect("list");
        assert_eq!(total, 0);
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn stale_pending_uses_created_at_cutoff() {
        let fx = setup(2).await;
        let now = Utc::now();
        let old = fx
            .repo
            .create(
                proposal_for(&fx.email_ids[0], RuleAction::Trash),
                now - Duration::days(8),
            )
            .await
            .expect("create")
            .expect("inserted");
        fx.repo
            .create(
                proposal_for(&fx.email_ids[1], RuleAction::Trash),
                now - Duration::days(2),
            )
            .await
            .expect("create");

        let stale = fx
            .repo
            .list_stale_pending(now - Duration::days(7))
            .await
            .expect("stale");
        assert_eq!(stale, vec![old.id]);
    }

    #[tokio::test]
    async fn unrealized_approved_excludes_succeeded_and_exhausted() {
        let fx = setup(3).await;
        let now = Utc::now();
        let mut approved = Vec::new();
        for email in &fx.email_ids {
            let p = fx
                .repo
                .create(proposal_for(email, RuleAction::Archive), now)
                .await
                .expect("create")
                .expect("inserted");
            fx.repo
                .transition(&p.id, ProposalEvent::Approve, now)
                .await
                .expect("approve");
            approved.push(p);
        }

        let conn = fx.db.connection().await.expect("conn");
        let record = |proposal: &ProposedAction, result: &str, n: usize| {
            let mut sql = String::new();
            for i in 0..n {
                sql.push_str(&format!(
                    "INSERT INTO operations (id, email_id, proposal_id, category_id, action_type, result, executed_at)
                     VALUES ('{}-{result}-{i}', '{}', '{}', 'promo', 'archive', '{result}', 'x');",
                    proposal.id, proposal.email_id, proposal.id
                ));
            }
            sql
        };
        conn.execute_batch(&record(&approved[0], "success", 1))
            .await
            .expect("success op");
        conn.execute_batch(&record(&approved[1], "failure", 3))
            .await
            .expect("failure ops");
        conn.execute_batch(&record(&approved[2], "failure", 1))
            .await
            .expect("failure op");

        let pending_work = fx
            .repo
            .list_unrealized_approved(3)
            .await
            .expect("list");
        assert_eq!(
            pending_work.into_iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![approved[2].id.clone()]
        );
    }

    #[tokio::test]
    async fn stats_group_by_status_and_action() {
        let fx = setup(3).await;
        let now = Utc::now();
        let a = fx
            .repo
            .create(proposal_for(&fx.email_ids[0], RuleAction::Trash), now)
            .await
            .expect("create")
            .expect("inserted");
        fx.repo
            .create(proposal_for(&fx.email_ids[1], RuleAction::Trash), now)
            .await
            .expect("create");
        fx.repo
            .create(proposal_for(&fx.email_ids[2], RuleAction::Archive), now)
            .await
            .expect("create");
        fx.repo
            .transition(&a.id, ProposalEvent::Approve, now)
            .await
            .expect("approve");

        let stats = fx.repo.stats().await.expect("stats");
        assert_eq!(stats.total_proposals, 3);
        assert_eq!(stats.by_status.pending, 2);
        assert_eq!(stats.by_status.approved, 1);
        assert_eq!(stats.by_status.rejected, 0);
        assert_eq!(stats.by_action_type.trash, 2);
        assert_eq!(stats.by_action_type.archive, 1);
    }
}
