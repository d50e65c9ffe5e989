use chrono::{DateTime, Utc};
use libsql::{Row, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use crate::db::{Database, DbError, parse_rfc3339, to_rfc3339};
use crate::rules::RuleAction;

const OPERATION_COLUMNS: &str = "id, email_id, proposal_id, category_id, action_type, result, error, attempts, already_applied, executed_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum OperationResult {
    Success,
    Failure,
}

impl OperationResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationResult::Success => "success",
            OperationResult::Failure => "failure",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

/// Record of one attempt to apply an action at the mail provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Operation {
    pub id: String,
    pub email_id: String,
    /// Set when the operation realized an approved proposal.
    pub proposal_id: Option<String>,
    pub category_id: Option<String>,
    pub action_type: RuleAction,
    pub result: OperationResult,
    pub error: Option<String>,
    pub attempts: u32,
    /// The provider already had the message where the action would put it.
    pub already_applied: bool,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewOperation {
    pub email_id: String,
    pub proposal_id: Option<String>,
    pub category_id: Option<String>,
    pub action_type: RuleAction,
    pub result: OperationResult,
    pub error: Option<String>,
    pub attempts: u32,
    pub already_applied: bool,
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("operation not recorded for email {0}")]
    NotRecorded(String),
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
}

#[derive(Clone)]
pub struct OperationRepository {
    db: Database,
}

impl OperationRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn record(
        &self,
        operation: NewOperation,
        executed_at: DateTime<Utc>,
    ) -> Result<Operation, OperationError> {
        let NewOperation {
            email_id,
            proposal_id,
            category_id,
            action_type,
            result,
            error,
            attempts,
            already_applied,
        } = operation;

        let id = Uuid::new_v4().to_string();
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO operations (
                        id, email_id, proposal_id, category_id, action_type, result,
                        error, attempts, already_applied, executed_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    RETURNING {OPERATION_COLUMNS}"
                ),
                params![
                    id,
                    email_id.clone(),
                    proposal_id,
                    category_id,
                    action_type.as_str(),
                    result.as_str(),
                    error,
                    attempts as i64,
                    already_applied as i64,
                    to_rfc3339(executed_at)
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_operation(row),
            None => Err(OperationError::NotRecorded(email_id)),
        }
    }

    pub async fn list_for_email(&self, email_id: &str) -> Result<Vec<Operation>, OperationError> {
        self.list_where("email_id = ?1", email_id).await
    }

    pub async fn list_for_proposal(
        &self,
        proposal_id: &str,
    ) -> Result<Vec<Operation>, OperationError> {
        self.list_where("proposal_id = ?1", proposal_id).await
    }

    async fn list_where(&self, predicate: &str, value: &str) -> Result<Vec<Operation>, OperationError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {OPERATION_COLUMNS} FROM operations
                     WHERE {predicate}
                     ORDER BY executed_at ASC, id ASC"
                ),
                params![value],
            )
            .await?;

        let mut operations = Vec::new();
        while let Some(row) = rows.next().await? {
            operations.push(row_to_operation(row)?);
        }
        Ok(operations)
    }
}

fn row_to_operation(row: Row) -> Result<Operation, OperationError> {
    let action_type: String = row.get(4)?;
    let result: String = row.get(5)?;
    let attempts: i64 = row.get(7)?;
    let already_applied: i64 = row.get(8)?;
    let executed_at: String = row.get(9)?;

    Ok(Operation {
        id: row.get(0)?,
        email_id: row.get(1)?,
        proposal_id: row.get(2)?,
        category_id: row.get(3)?,
        action_type: RuleAction::from_str(&action_type)
            .ok_or(OperationError::InvalidValue(action_type))?,
        result: OperationResult::from_str(&result).ok_or(OperationError::InvalidValue(result))?,
        error: row.get(6)?,
        attempts: attempts.max(0) as u32,
        already_applied: already_applied != 0,
        executed_at: parse_rfc3339(&executed_at)?,
    })
}
