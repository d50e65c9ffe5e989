use chrono::{DateTime, Utc};
use libsql::{Row, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::db::{Database, DbError, now_rfc3339, parse_rfc3339};

const CATEGORY_COLUMNS: &str = "id, name, created_at, updated_at";

/// A mail category assigned by the classification system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum CategoryError {
    #[error("database error: {0}")]
    Database(#[from] DbError),
    #[error("sql error: {0}")]
    Sql(#[from] libsql::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("category not found: {0}")]
    NotFound(String),
}

#[derive(Clone)]
pub struct CategoryRepository {
    db: Database,
}

impl CategoryRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a category or rename an existing one.
    pub async fn upsert(&self, id: &str, name: &str) -> Result<Category, CategoryError> {
        let now = now_rfc3339();
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!(
                    "INSERT INTO categories (id, name, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?3)
                     ON CONFLICT(id) DO UPDATE SET
                        name = excluded.name,
                        updated_at = excluded.updated_at
                     RETURNING {CATEGORY_COLUMNS}"
                ),
                params![id, name, now],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_category(row),
            None => Err(CategoryError::NotFound(id.to_string())),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Category, CategoryError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = ?1"),
                params![id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => row_to_category(row),
            None => Err(CategoryError::NotFound(id.to_string())),
        }
    }

    pub async fn list(&self) -> Result<Vec<Category>, CategoryError> {
        let conn = self.db.connection().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {CATEGORY_COLUMNS} FROM categories ORDER BY name, id"),
                (),
            )
            .await?;

        let mut categories = Vec::new();
        while let Some(row) = rows.next().await? {
            categories.push(row_to_category(row)?);
        }
        Ok(categories)
    }
}

fn row_to_category(row: Row) -> Result<Category, CategoryError> {
    let created_at: String = row.get(2)?;
    let updated_at: String = row.get(3)?;
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::run_migrations;
    use tempfile::TempDir;

    async fn setup_repo() -> (CategoryRepository, TempDir) {
        let dir = TempDir::new().expect("temp dir");
        let db = Database::new(&dir.path().join("db.sqlite"))
            .await
            .expect("create db");
        run_migrations(&db).await.expect("migrations");
        (CategoryRepository::new(db), dir)
    }

    #[tokio::test]
    async fn upsert_renames_without_duplicating() {
        let (repo, _dir) = setup_repo().await;

        let first = repo.upsert("promo", "Promos").await.expect("insert");
        let renamed = repo.upsert("promo", "Promotions").await.expect("rename");

        assert_eq!(renamed.name, "Promotions");
        assert_eq!(renamed.created_at, first.created_at);
        assert_eq!(repo.list().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn list_orders_by_name() {
        let (repo, _dir) = setup_repo().await;
        repo.upsert("c2", "Updates").await.expect("insert");
        repo.upsert("c1", "Newsletters").await.expect("insert");

        let names: Vec<String> = repo
            .list()
            .await
            .expect("list")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Newsletters", "Updates"]);
    }

    #[tokio::test]
    async fn get_missing_category_is_not_found() {
        let (repo, _dir) = setup_repo().await;
        let err = repo.get("nope").await.expect_err("missing");
        assert!(matches!(err, CategoryError::NotFound(id) if id == "nope"));
    }
}
