use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AdminUser,
    extract::{Json, Query},
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use crimewatch_common::model::{
    Id,
    moderation::{StatusChange, StatusOverride},
    post::{ModeratePost, Post, PostMarker},
    report::{Report, ReportMarker, ReportStatus, ReviewOutcome, ReviewReport},
};
use crimewatch_db::DbClient;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(list_reports)
        .typed_get(get_report)
        .typed_patch(review_report)
        .typed_patch(moderate_post)
        .typed_put(override_post_status)
        .typed_get(status_history)
        .typed_post(recompute_post)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/reports", rejection(ServerError))]
struct ReportsPath();

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
struct ReportsQuery {
    status: Option<ReportStatus>,
}

async fn list_reports(
    ReportsPath(): ReportsPath,
    State(db): State<Arc<DbClient>>,
    _admin: AdminUser,
    Query(query): Query<ReportsQuery>,
) -> Result<Json<Vec<Report>>> {
    let reports = db.list_reports(query.status).await?;

    Ok(Json(reports))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/reports/{id}", rejection(ServerError))]
struct ReportPath {
    id: Id<ReportMarker>,
}

async fn get_report(
    ReportPath { id }: ReportPath,
    State(db): State<Arc<DbClient>>,
    _admin: AdminUser,
) -> Result<Json<Report>> {
    let report = db
        .fetch_report(id)
        .await?
        .ok_or(ServerError::ReportByIdNotFound(id))?;

    Ok(Json(report))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/reports/{id}/review", rejection(ServerError))]
struct ReviewReportPath {
    id: Id<ReportMarker>,
}

async fn review_report(
    ReviewReportPath { id }: ReviewReportPath,
    State(db): State<Arc<DbClient>>,
    admin: AdminUser,
    Json(review): Json<ReviewReport>,
) -> Result<Json<ReviewOutcome>> {
    let outcome = db
        .review_report(id, admin.user_id(), review.action)
        .await?;

    Ok(Json(outcome))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/posts/{id}/moderate", rejection(ServerError))]
struct ModeratePostPath {
    id: Id<PostMarker>,
}

async fn moderate_post(
    ModeratePostPath { id }: ModeratePostPath,
    State(db): State<Arc<DbClient>>,
    admin: AdminUser,
    Json(moderation): Json<ModeratePost>,
) -> Result<Json<Post>> {
    let post = db
        .moderate_post(id, admin.user_id(), moderation.action)
        .await?;

    Ok(Json(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/posts/{id}/status", rejection(ServerError))]
struct PostStatusPath {
    id: Id<PostMarker>,
}

async fn override_post_status(
    PostStatusPath { id }: PostStatusPath,
    State(db): State<Arc<DbClient>>,
    admin: AdminUser,
    Json(status_override): Json<StatusOverride>,
) -> Result<Json<Post>> {
    let post = db
        .override_post_status(id, admin.user_id(), &status_override)
        .await?;

    Ok(Json(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/posts/{id}/history", rejection(ServerError))]
struct StatusHistoryPath {
    id: Id<PostMarker>,
}

async fn status_history(
    StatusHistoryPath { id }: StatusHistoryPath,
    State(db): State<Arc<DbClient>>,
    _admin: AdminUser,
) -> Result<Json<Vec<StatusChange>>> {
    let history = db
        .status_history(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(history))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/posts/{id}/recompute", rejection(ServerError))]
struct RecomputePostPath {
    id: Id<PostMarker>,
}

async fn recompute_post(
    RecomputePostPath { id }: RecomputePostPath,
    State(db): State<Arc<DbClient>>,
    _admin: AdminUser,
) -> Result<Json<Post>> {
    let post = db.recompute_post(id).await?;

    Ok(Json(post))
}
