use crate::server::{
    MessageResponse, Result, ServerError, ServerRouter, auth::AuthenticatedUser, extract::Json,
};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use crimewatch_common::model::{
    Id,
    post::{Post, PostContent, PostMarker},
};
use crimewatch_db::DbClient;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(create_post)
        .typed_get(get_post)
        .typed_delete(delete_post)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts", rejection(ServerError))]
struct CreatePostPath();

async fn create_post(
    CreatePostPath(): CreatePostPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
    Json(content): Json<PostContent>,
) -> Result<(StatusCode, Json<Post>)> {
    let post = db.create_post(user.user_id(), &content).await?;

    Ok((StatusCode::CREATED, Json(post)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct PostPath {
    id: Id<PostMarker>,
}

async fn get_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Post>> {
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(post))
}

async fn delete_post(
    PostPath { id }: PostPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<MessageResponse>> {
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;
    user.ensure_author_or_admin(post.author.id)?;

    if !db.delete_post(id).await? {
        return Err(ServerError::PostByIdNotFound(id));
    }
    info!(post_id = %id, deleted_by = %user.user_id(), "Deleted post");

    Ok(Json(MessageResponse::new("Post deleted")))
}
