//! Action rule endpoints.
//!
//! - GET/POST/DELETE /api/categories/{id}/action-rule
//! - POST /api/categories/{id}/action-rule/enabled
//! - GET /api/action-rules
//! - GET /api/categories/{id}/action-preview

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;

use mailsweep_core::{ActionRule, PreviewResponse, RuleAction, RuleDraft};

use super::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/action-rules", get(list_rules))
        .route(
            "/categories/{id}/action-rule",
            get(get_rule).post(save_rule).delete(delete_rule),
        )
        .route("/categories/{id}/action-rule/enabled", post(set_enabled))
        .route("/categories/{id}/action-preview", get(preview))
}

fn parse_action(value: &str) -> Result<RuleAction, ApiError> {
    RuleAction::from_str(value.trim())
        .ok_or_else(|| ApiError::validation(format!("unknown action {value:?}; expected archive or trash")))
}

/// Request body for creating or replacing a rule.
#[derive(Debug, Deserialize)]
pub struct SaveRuleRequest {
    pub action: String,
    pub delay_days: i64,
    pub enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

/// Query for a preview. `action` and `delay_days` together describe a
/// hypothetical rule; without them the saved rule is used.
#[derive(Debug, Default, Deserialize)]
pub struct PreviewQuery {
    pub action: Option<String>,
    pub delay_days: Option<i64>,
    pub enabled: Option<bool>,
    pub sample_size: Option<usize>,
}

/// GET /api/action-rules
async fn list_rules(State(state): State<AppState>) -> Result<Json<Vec<ActionRule>>, ApiError> {
    Ok(Json(state.engine.list_rules().await?))
}

/// GET /api/categories/{id}/action-rule
async fn get_rule(
    State(state): State<AppState>,
    Path(category_id): Path<String>,
) -> Result<Json<ActionRule>, ApiError> {
    Ok(Json(state.engine.get_rule(&category_id).await?))
}

/// POST /api/categories/{id}/action-rule
///
/// Creates the category's rule or replaces the existing one.
async fn save_rule(
    State(state): State<AppState>,
    Path(category_id): Path<String>,
    Json(body): Json<SaveRuleRequest>,
) -> Result<Json<ActionRule>, ApiError> {
    let draft = RuleDraft {
        action: parse_action(&body.action)?,
        delay_days: body.delay_days,
        enabled: body.enabled.unwrap_or(true),
    };
    Ok(Json(state.engine.save_rule(&category_id, draft).await?))
}

/// DELETE /api/categories/{id}/action-rule
async fn delete_rule(
    State(state): State<AppState>,
    Path(category_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_rule(&category_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/categories/{id}/action-rule/enabled
async fn set_enabled(
    State(state): State<AppState>,
    Path(category_id): Path<String>,
    Json(body): Json<SetEnabledRequest>,
) -> Result<Json<ActionRule>, ApiError> {
    Ok(Json(
        state
            .engine
            .set_rule_enabled(&category_id, body.enabled)
            .await?,
    ))
}

/// GET /api/categories/{id}/action-preview
async fn preview(
    State(state): State<AppState>,
    Path(category_id): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let hypothetical = match (query.action.as_deref(), query.delay_days) {
        (Some(action), Some(delay_days)) => Some(RuleDraft {
            action: parse_action(action)?,
            delay_days,
            enabled: query.enabled.unwrap_or(true),
        }),
        (None, None) => None,
        _ => {
            return Err(ApiError::validation(
                "action and delay_days must be given together",
            ));
        }
    };

    Ok(Json(
        state
            .engine
            .preview(&category_id, hypothetical, query.sample_size)
            .await?,
    ))
}
