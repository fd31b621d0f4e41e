use crate::server::{Result, ServerError, ServerRouter, auth::AuthenticatedUser, extract::Json};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use crimewatch_common::model::{
    Id,
    post::PostMarker,
    report::{CreateReport, Report},
};
use crimewatch_db::DbClient;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_post(file_report)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/report", rejection(ServerError))]
struct FileReportPath {
    id: Id<PostMarker>,
}

async fn file_report(
    FileReportPath { id }: FileReportPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(report): Json<CreateReport>,
) -> Result<(StatusCode, Json<Report>)> {
    let report = db.file_report(user.user_id(), id, &report).await?;

    Ok((StatusCode::CREATED, Json(report)))
}
