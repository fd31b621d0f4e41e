use crate::server::{
    MessageResponse, Result, ServerError, ServerRouter, auth::AuthenticatedUser, extract::Json,
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use crimewatch_common::model::{
    Id,
    comment::{Comment, CommentMarker, CreateComment},
    post::PostMarker,
};
use crimewatch_db::DbClient;
use serde::Deserialize;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(get_post_comments)
        .typed_post(create_comment)
        .typed_delete(delete_comment)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/comments", rejection(ServerError))]
struct PostCommentsPath {
    id: Id<PostMarker>,
}

async fn get_post_comments(
    PostCommentsPath { id }: PostCommentsPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Vec<Comment>>> {
    let comments = db
        .fetch_post_comments(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(comments))
}

async fn create_comment(
    PostCommentsPath { id }: PostCommentsPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(comment): Json<CreateComment>,
) -> Result<(StatusCode, Json<Comment>)> {
    let comment = db.create_comment(id, user.user_id(), &comment).await?;

    Ok((StatusCode::CREATED, Json(comment)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/comments/{id}", rejection(ServerError))]
struct CommentPath {
    id: Id<CommentMarker>,
}

async fn delete_comment(
    CommentPath { id }: CommentPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<MessageResponse>> {
    let comment = db
        .fetch_comment(id)
        .await?
        .ok_or(ServerError::CommentByIdNotFound(id))?;
    user.ensure_author_or_admin(comment.author.id)?;

    if !db.delete_comment(id).await? {
        return Err(ServerError::CommentByIdNotFound(id));
    }

    Ok(Json(MessageResponse::new("Comment deleted")))
}
