//! HTTP API for the action engine.
//!
//! - `/categories/{id}/action-rule`, `/action-rules`, `/categories/{id}/action-preview`
//! - `/proposed-actions/...` for review, pipelines, cleanup and stats
//! - `/scheduler` for the periodic runner

pub mod proposals;
pub mod rules;
pub mod scheduler;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use mailsweep_core::{EngineError, SchedulerError};

use crate::AppState;

/// Create the main API router with all endpoints mounted.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(rules::router())
        .nest("/proposed-actions", proposals::router())
        .nest("/scheduler", scheduler::router())
}

/// Error response for API errors.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => Self::validation(msg),
            EngineError::NotFound(msg) => Self::not_found(msg),
            EngineError::Conflict { .. } => {
                Self::new(StatusCode::CONFLICT, "conflict", err.to_string())
            }
            EngineError::Storage(msg) => {
                tracing::error!(error = %msg, "storage failure while handling request");
                Self::internal(msg)
            }
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        Self::validation(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use mailsweep_core::migrations::run_migrations;
    use mailsweep_core::{
        ActionEngine, CategoryRepository, Database, EmailRepository, EngineConfig,
        MailboxLocation, MockMailProvider, NewEmail,
    };
    use chrono::{Duration, Utc};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use crate::AppState;

    pub struct TestApp {
        pub state: AppState,
        pub provider: MockMailProvider,
        _dir: TempDir,
    }

    impl TestApp {
        pub async fn new() -> Self {
            let dir = TempDir::new().expect("temp dir");
            let db_path = dir.path().join("test.sqlite");
            let db = Database::new(&db_path).await.expect("create db");
            run_migrations(&db).await.expect("migrations");

            let provider = MockMailProvider::new();
            let engine = ActionEngine::new(
                db.clone(),
                Arc::new(provider.clone()),
                EngineConfig {
                    retry_base_delay_ms: 1,
                    ..EngineConfig::default()
                },
            );
            let state = AppState {
                engine,
                scheduler: None,
                db,
                shutdown: CancellationToken::new(),
            };
            Self {
                state,
                provider,
                _dir: dir,
            }
        }

        pub async fn category(&self, id: &str, name: &str) {
            CategoryRepository::new(self.state.db.clone())
                .upsert(id, name)
                .await
                .expect("category");
        }

        pub async fn email(&self, provider_id: &str, category_id: &str, days_old: i64) -> String {
            EmailRepository::new(self.state.db.clone())
                .upsert(NewEmail {
                    provider_message_id: provider_id.to_string(),
                    category_id: Some(category_id.to_string()),
                    subject: Some(format!("Subject {provider_id}")),
                    sender: Some("sender@example.com".to_string()),
                    received_at: Utc::now() - Duration::days(days_old) - Duration::minutes(1),
                    location: MailboxLocation::Inbox,
                })
                .await
                .expect("email")
                .id
        }
    }

    pub async fn read_json(response: impl IntoResponse) -> (StatusCode, serde_json::Value) {
        let response: Response = response.into_response();
        let status = response.status();
        let body_bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        if body_bytes.is_empty() {
            return (status, serde_json::Value::Null);
        }
        let body = serde_json::from_slice(&body_bytes).expect("json body");
        (status, body)
    }
}
