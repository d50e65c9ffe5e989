//! Proposed action endpoints.
//!
//! Provides:
//! - GET /api/proposed-actions - List proposals with filtering and pagination
//! - GET /api/proposed-actions/{id} - One proposal
//! - POST /api/proposed-actions/{id}/approve, /{id}/reject
//! - POST /api/proposed-actions/bulk-approve, /bulk-reject
//! - POST /api/proposed-actions/process-dry-run, /process-execute, /execute-approved
//! - POST /api/proposed-actions/cleanup-expired
//! - GET /api/proposed-actions/stats

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::Deserialize;

use mailsweep_core::{
    BulkApproveResult, BulkRejectResult, CleanupSummary, DryRunSummary, ExecuteSummary,
    ProposalFilter, ProposalPage, ProposalStats, ProposalStatus, ProposedAction, RealizeRequest,
    RealizeSummary, RuleAction, RunRequest,
};

use super::ApiError;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_proposals))
        .route("/stats", get(stats))
        .route("/bulk-approve", post(bulk_approve))
        .route("/bulk-reject", post(bulk_reject))
        .route("/process-dry-run", post(process_dry_run))
        .route("/process-execute", post(process_execute))
        .route("/execute-approved", post(execute_approved))
        .route("/cleanup-expired", post(cleanup_expired))
        .route("/{id}", get(get_proposal))
        .route("/{id}/approve", post(approve))
        .route("/{id}/reject", post(reject))
}

/// Query parameters for listing proposals. Empty strings mean "no filter".
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status_filter: Option<String>,
    pub action_type: Option<String>,
    pub category_id: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct BulkRequest {
    pub action_ids: Vec<String>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_filter(query: &ListQuery) -> Result<ProposalFilter, ApiError> {
    let status = non_empty(query.status_filter.as_deref())
        .map(|s| {
            ProposalStatus::from_str(s)
                .ok_or_else(|| ApiError::validation(format!("unknown status {s:?}")))
        })
        .transpose()?;
    let action_type = non_empty(query.action_type.as_deref())
        .map(|s| {
            RuleAction::from_str(s)
                .ok_or_else(|| ApiError::validation(format!("unknown action type {s:?}")))
        })
        .transpose()?;

    Ok(ProposalFilter {
        status,
        action_type,
        category_id: non_empty(query.category_id.as_deref()).map(str::to_string),
    })
}

/// GET /api/proposed-actions
///
/// Newest first. `page` is 1-based; `page_size` defaults to 20, max 100.
async fn list_proposals(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ProposalPage>, ApiError> {
    let filter = parse_filter(&query)?;
    Ok(Json(
        state
            .engine
            .list_proposals(&filter, query.page, query.page_size)
            .await?,
    ))
}

async fn get_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProposedAction>, ApiError> {
    Ok(Json(state.engine.get_proposal(&id).await?))
}

async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProposedAction>, ApiError> {
    Ok(Json(state.engine.approve(&id).await?))
}

async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProposedAction>, ApiError> {
    Ok(Json(state.engine.reject(&id).await?))
}

async fn bulk_approve(
    State(state): State<AppState>,
    Json(body): Json<BulkRequest>,
) -> Json<BulkApproveResult> {
    Json(state.engine.bulk_approve(body.action_ids).await)
}

async fn bulk_reject(
    State(state): State<AppState>,
    Json(body): Json<BulkRequest>,
) -> Json<BulkRejectResult> {
    Json(state.engine.bulk_reject(body.action_ids).await)
}

/// POST /api/proposed-actions/process-dry-run
///
/// Server shutdown cancels the run; `timeout_secs` bounds it.
async fn process_dry_run(
    State(state): State<AppState>,
    Json(body): Json<RunRequest>,
) -> Result<Json<DryRunSummary>, ApiError> {
    let cancel = state.shutdown.child_token();
    Ok(Json(state.engine.process_dry_run(body, &cancel).await?))
}

async fn process_execute(
    State(state): State<AppState>,
    Json(body): Json<RunRequest>,
) -> Result<Json<ExecuteSummary>, ApiError> {
    let cancel = state.shutdown.child_token();
    Ok(Json(state.engine.process_execute(body, &cancel).await?))
}

async fn execute_approved(
    State(state): State<AppState>,
    Json(body): Json<RealizeRequest>,
) -> Result<Json<RealizeSummary>, ApiError> {
    let cancel = state.shutdown.child_token();
    Ok(Json(state.engine.execute_approved(body, &cancel).await?))
}

async fn cleanup_expired(State(state): State<AppState>) -> Result<Json<CleanupSummary>, ApiError> {
    Ok(Json(state.engine.cleanup_expired_proposals().await?))
}

async fn stats(State(state): State<AppState>) -> Result<Json<ProposalStats>, ApiError> {
    Ok(Json(state.engine.stats().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{TestApp, read_json};
    use axum::http::StatusCode;
    use mailsweep_core::RuleDraft;
    use serde_json::json;

    async fn seeded(emails: usize) -> (TestApp, Vec<String>) {
        let app = TestApp::new().await;
        app.category("promo", "Promotions").await;
        app.state
            .engine
            .save_rule("promo", RuleDraft::new(RuleAction::Trash, 3))
            .await
            .expect("rule");
        for i in 0..emails {
            app.email(&format!("m{i}"), "promo", 4 + i as i64).await;
        }

        let (status, body) = read_json(
            process_dry_run(State(app.state.clone()), Json(RunRequest::default())).await,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "body: {body}");
        assert_eq!(body["proposals_created"], json!(emails));

        let page = app
            .state
            .engine
            .list_proposals(&ProposalFilter::default(), None, Some(100))
            .await
            .expect("list");
        let ids = page.items.into_iter().map(|p| p.id).collect();
        (app, ids)
    }

    #[tokio::test]
    async fn list_filters_and_paginates() {
        let (app, ids) = seeded(3).await;
        app.state.engine.approve(&ids[0]).await.expect("approve");

        let (status, body) = read_json(
            list_proposals(
                State(app.state.clone()),
                Query(ListQuery {
                    status_filter: Some("pending".into()),
                    page: Some(1),
                    page_size: Some(1),
                    ..ListQuery::default()
                }),
            )
            .await,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "body: {body}");
        assert_eq!(body["total"], json!(2));
        assert_eq!(body["page_size"], json!(1));
        assert_eq!(body["has_more"], json!(true));
        assert_eq!(body["items"][0]["status"], json!("pending"));

        let (status, body) = read_json(
            list_proposals(
                State(app.state.clone()),
                Query(ListQuery {
                    status_filter: Some("".into()),
                    action_type: Some("".into()),
                    ..ListQuery::default()
                }),
            )
            .await,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], json!(3));

        let (status, body) = read_json(
            list_proposals(
                State(app.state.clone()),
                Query(ListQuery {
                    status_filter: Some("done".into()),
                    ..ListQuery::default()
                }),
            )
            .await,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("validation_error"));
    }

    #[tokio::test]
    async fn approve_twice_conflicts() {
        let (app, ids) = seeded(1).await;

        let (status, body) =
            read_json(approve(State(app.state.clone()), Path(ids[0].clone())).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("approved"));

        let (status, body) =
            read_json(reject(State(app.state.clone()), Path(ids[0].clone())).await).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], json!("conflict"));

        let (status, _) =
            read_json(approve(State(app.state.clone()), Path("missing".into())).await).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bulk_reject_reports_each_failure() {
        let (app, ids) = seeded(2).await;
        app.state.engine.approve(&ids[0]).await.expect("approve");

        let (status, body) = read_json(
            bulk_reject(
                State(app.state.clone()),
                Json(BulkRequest {
                    action_ids: vec![ids[0].clone(), ids[1].clone(), "missing".into()],
                }),
            )
            .await,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rejected_count"], json!(1));
        assert_eq!(body["failed_count"], json!(2));
        let errors: Vec<&str> = body["failed_actions"]
            .as_array()
            .expect("array")
            .iter()
            .filter_map(|f| f["error"].as_str())
            .collect();
        assert!(errors.contains(&"conflict"));
        assert!(errors.contains(&"not_found"));
    }

    #[tokio::test]
    async fn approved_proposals_execute_and_stats_reflect_them() {
        let (app, ids) = seeded(2).await;
        let (status, body) = read_json(
            bulk_approve(
                State(app.state.clone()),
                Json(BulkRequest {
                    action_ids: vec![ids[0].clone()],
                }),
            )
            .await,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["approved_count"], json!(1));

        let (status, body) = read_json(
            execute_approved(State(app.state.clone()), Json(RealizeRequest::default())).await,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "body: {body}");
        assert_eq!(body["operations_created"], json!(1));
        assert_eq!(app.provider.mutation_count(), 1);

        let (status, body) = read_json(stats(State(app.state.clone())).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_proposals"], json!(2));
        assert_eq!(body["by_status"]["approved"], json!(1));
        assert_eq!(body["by_status"]["pending"], json!(1));
        assert_eq!(body["by_action_type"]["trash"], json!(2));
    }

    #[tokio::test]
    async fn execute_and_cleanup_endpoints() {
        let app = TestApp::new().await;
        app.category("promo", "Promotions").await;
        app.state
            .engine
            .save_rule("promo", RuleDraft::new(RuleAction::Archive, 2))
            .await
            .expect("rule");
        app.email("m1", "promo", 5).await;

        let (status, body) = read_json(
            process_execute(State(app.state.clone()), Json(RunRequest::default())).await,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "body: {body}");
        assert_eq!(body["operations_created"], json!(1));
        assert_eq!(body["failed_count"], json!(0));

        let (status, body) = read_json(cleanup_expired(State(app.state.clone())).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["expired_proposals_removed"], json!(0));
    }

    #[tokio::test]
    async fn shutdown_cancels_pipeline_requests() {
        let (app, _) = seeded(0).await;
        app.email("late", "promo", 10).await;
        app.state.shutdown.cancel();

        let (status, body) = read_json(
            process_dry_run(State(app.state.clone()), Json(RunRequest::default())).await,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cancelled"], json!(true));
        assert_eq!(body["proposals_created"], json!(0));
    }
}
