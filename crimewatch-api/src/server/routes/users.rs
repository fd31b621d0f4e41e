use crate::server::{Result, ServerError, ServerRouter, extract::Json};
use axum::{extract::State, http::StatusCode};
use axum_extra::routing::{RouterExt, TypedPath};
use crimewatch_common::model::{
    Id,
    post::PartialPost,
    user::{CreateUser, User, UserMarker},
};
use crimewatch_db::DbClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(register_user)
        .typed_get(get_user)
        .typed_get(get_user_posts)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users", rejection(ServerError))]
struct RegisterUserPath();

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct Registration {
    user: User,
    /// Shown exactly once. Only its hash is stored.
    token: String,
}

async fn register_user(
    RegisterUserPath(): RegisterUserPath,
    State(db): State<Arc<DbClient>>,
    Json(user): Json<CreateUser>,
) -> Result<(StatusCode, Json<Registration>)> {
    let (user, token) = db.register_user(&user).await?;
    let registration = Registration {
        user,
        token: token.as_token_str(),
    };

    Ok((StatusCode::CREATED, Json(registration)))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}", rejection(ServerError))]
struct GetUserPath {
    id: Id<UserMarker>,
}

async fn get_user(
    GetUserPath { id }: GetUserPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<User>> {
    let user = db
        .fetch_user(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(user))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}/posts", rejection(ServerError))]
struct GetUserPostsPath {
    id: Id<UserMarker>,
}

async fn get_user_posts(
    GetUserPostsPath { id }: GetUserPostsPath,
    State(db): State<Arc<DbClient>>,
) -> Result<Json<Vec<PartialPost>>> {
    let posts = db
        .fetch_user_posts(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(posts))
}
