use std::{env, path::Path, sync::Arc};

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use thiserror::Error;

/// Milliseconds a local connection waits on a locked database file before
/// failing with SQLITE_BUSY. Dry runs, approvals and the sweeper write from
/// separate connections.
pub const BUSY_TIMEOUT_MS: u32 = 5_000;

const AUTH_TOKEN_VAR: &str = "LIBSQL_AUTH_TOKEN";

#[derive(Clone)]
pub struct Database {
    inner: Arc<LibSqlDatabase>,
    target: Target,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Target {
    Local,
    Remote,
}

impl Target {
    fn of(location: &str) -> Self {
        const REMOTE_SCHEMES: [&str; 3] = ["libsql://", "http://", "https://"];
        if REMOTE_SCHEMES.iter().any(|scheme| location.starts_with(scheme)) {
            Target::Remote
        } else {
            Target::Local
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("failed to open database: {0}")]
    Build(libsql::Error),
    #[error("failed to connect to database: {0}")]
    Connect(libsql::Error),
    #[error("database statement failed: {0}")]
    Statement(libsql::Error),
    #[error("remote database requires LIBSQL_AUTH_TOKEN")]
    MissingAuthToken,
}

impl Database {
    /// Opens the store at `location`: a file path, or a `libsql://` / `http(s)://`
    /// URL for a remote database authenticated with `LIBSQL_AUTH_TOKEN`.
    pub async fn new(location: &Path) -> Result<Self, DbError> {
        let location = location.to_string_lossy().into_owned();
        let target = Target::of(&location);

        let inner = match target {
            Target::Remote => {
                let token = env::var(AUTH_TOKEN_VAR)
                    .ok()
                    .filter(|token| !token.is_empty())
                    .ok_or(DbError::MissingAuthToken)?;
                Builder::new_remote(location, token).build().await
            }
            Target::Local => Builder::new_local(location).build().await,
        }
        .map_err(DbError::Build)?;

        Ok(Self {
            inner: Arc::new(inner),
            target,
        })
    }

    /// Opens a connection with foreign keys enforced. Local connections also
    /// get a busy timeout so concurrent writers queue instead of failing.
    pub async fn connection(&self) -> Result<Connection, DbError> {
        let conn = self.inner.connect().map_err(DbError::Connect)?;
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(DbError::Statement)?;

        if self.target == Target::Local {
            // busy_timeout echoes the new value back as a row.
            let mut rows = conn
                .query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ())
                .await
                .map_err(DbError::Statement)?;
            rows.next().await.map_err(DbError::Statement)?;
        }
        Ok(conn)
    }

    pub async fn health_check(&self) -> Result<(), DbError> {
        let conn = self.connection().await?;
        let mut rows = conn
            .query("SELECT 1", ())
            .await
            .map_err(DbError::Statement)?;
        rows.next().await.map_err(DbError::Statement)?;
        Ok(())
    }
}

/// Timestamps are stored as millisecond RFC 3339 strings in UTC so that
/// lexical order matches chronological order.
pub(crate) fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}

pub(crate) fn parse_rfc3339(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

pub(crate) fn parse_optional_rfc3339(
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    value.as_deref().map(parse_rfc3339).transpose()
}
