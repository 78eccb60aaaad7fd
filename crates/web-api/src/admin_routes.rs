use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use application::ReportDetail;
use domain::{ModerationAction, PaginatedResult, Pagination, Report, ReportId, ReportStatus};

use crate::{error::ApiError, state::AppState};

/// 运营后台举报管理路由
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/reports", get(list_reports))
        .route("/reports/{report_id}", get(get_report))
        .route("/reports/{report_id}/action", post(take_action))
}

/// 举报列表查询参数
#[derive(Debug, Deserialize)]
struct ReportQueryParams {
    status: Option<String>, // "pending", "resolved"
    page: Option<u32>,
    page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ActionPayload {
    reviewer: String,
    #[serde(flatten)]
    action: ModerationAction,
}

async fn list_reports(
    State(state): State<AppState>,
    Query(params): Query<ReportQueryParams>,
) -> Result<Json<PaginatedResult<Report>>, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<ReportStatus>)
        .transpose()
        .map_err(|_| ApiError::bad_request("Invalid status. Use: pending, resolved"))?;
    let defaults = Pagination::default();
    let pagination = Pagination::new(
        params.page.unwrap_or(defaults.page),
        params.page_size.unwrap_or(defaults.page_size),
    );

    let page = state.services.admin.list_reports(status, pagination).await?;
    Ok(Json(page))
}

async fn get_report(
    State(state): State<AppState>,
    Path(report_id): Path<Uuid>,
) -> Result<Json<ReportDetail>, ApiError> {
    let detail = state
        .services
        .admin
        .report_detail(ReportId::from(report_id))
        .await?;
    Ok(Json(detail))
}

async fn take_action(
    State(state): State<AppState>,
    Path(report_id): Path<Uuid>,
    Json(payload): Json<ActionPayload>,
) -> Result<Json<Report>, ApiError> {
    let report = state
        .services
        .admin
        .take_action(ReportId::from(report_id), payload.action, &payload.reviewer)
        .await?;
    Ok(Json(report))
}
