use chrono::{DateTime, Utc};
use libsql::{Row, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

use crate::db::{Database, DbError, now_rfc3339, parse_rfc3339, to_rfc3339};

const EMAIL_COLUMNS: &str =
    "id, provider_message_id, category_id, subject, sender, received_at, location, created_at, updated_at";

/// Where a message currently lives in the provider mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum MailboxLocation {
    Inbox,
    Archived,
    Trashed,
}

impl MailboxLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MailboxLocation::Inbox => "inbox",
            MailboxLocation::Archived => "archived",
            MailboxLocation::Trashed => "trashed",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "inbox" => Some(MailboxLocation::Inbox),
            "archived" => Some(MailboxLocation::Archived),
            "trashed" => Some(MailboxLocation::Trashed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub id: String,
    pub provider_message_id: String,
    pub category_id: Option<String>,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub received_at: DateTime<Utc>,
    pub location: MailboxLocation,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Email facts as delivered by the ingest and classification side.
#[derive(Debug, Clone)]
pub struct NewEmail {
    pub provider_message_id: String,
    pub category_id: Option<String>,
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub received_at: DateTime<Utc>,
    pub location: MailboxLocation,
}

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("email not found: {0}")]
    NotFound(String),
    #[error("invalid mailbox location: {0}")]
    InvalidLocation(String),
}

#[derive(Clone)]
pub struct EmailRepository {
    db: Database,
}

impl EmailRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or refresh an email keyed by its provider message id.
    pub async fn upsert(&self, email: NewEmail) -> Result<Email, EmailError> {
        let NewEmail {
            provider_message_id,
            category_id,
            subject,
            sender,
            received_at,
            location,
        } = email;

        let id = Uuid::new_v4().to_string();
        let now = now_rfc3339();
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO emails (
                        id, provider_message_id, category_id, subject, sender,
                        received_at, location, created_at, updated_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                    ON CONFLICT(provider_message_id) DO UPDATE SET
                        category_id = excluded.category_id,
                        subject = excluded.subject,
                        sender = excluded.sender,
                        received_at = excluded.received_at,
                        location = excluded.location,
                        updated_at = excluded.updated_at
                    RETURNING {EMAIL_COLUMNS}"
                ),
                params![
                    id,
                    provider_message_id.clone(),
                    category_id,
                    subject,
                    sender,
                    to_rfc3339(received_at),
                    location.as_str(),
                    now
                ],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_email(row),
            None => Err(EmailError::NotFound(provider_message_id)),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Email, EmailError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?1"),
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_email(row),
            None => Err(EmailError::NotFound(id.to_string())),
        }
    }

    /// Inbox emails of a category, oldest first. These are the only emails a
    /// rule can act on.
    pub async fn list_inbox_by_category(&self, category_id: &str) -> Result<Vec<Email>, EmailError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM emails
                     WHERE category_id = ?1 AND location = 'inbox'
                     ORDER BY received_at ASC, id ASC"
                ),
                params![category_id],
            )
            .await?;

        let mut emails = Vec::new();
        while let Some(row) = rows.next().await? {
            emails.push(row_to_email(row)?);
        }
        Ok(emails)
    }

    pub async fn set_location(
        &self,
        id: &str,
        location: MailboxLocation,
    ) -> Result<Email, EmailError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "UPDATE emails SET location = ?2, updated_at = ?3
                     WHERE id = ?1
                     RETURNING {EMAIL_COLUMNS}"
                ),
                params![id, location.as_str(), now_rfc3339()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_email(row),
            None => Err(EmailError::NotFound(id.to_string())),
        }
    }
}

fn row_to_email(row: Row) -> Result<Email, EmailError> {
    let received_at: String = row.get(5)?;
    let location: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let updated_at: String = row.get(8)?;
    Ok(Email {
        id: row.get(0)?,
        provider_message_id: row.get(1)?,
        category_id: row.get(2)?,
        subject: row.get(3)?,
        sender: row.get(4)?,
        received_at: parse_rfc3339(&received_at)?,
        location: MailboxLocation::from_str(&location)
            .ok_or(EmailError::InvalidLocation(location))?,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
    })
}
