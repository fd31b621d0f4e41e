use crate::server::{Result, ServerError, ServerRouter, auth::AuthenticatedUser, extract::Json};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use crimewatch_common::model::{
    Id,
    comment::CommentMarker,
    post::PostMarker,
    vote::{VoteOutcome, VoteTarget, VoteType},
};
use crimewatch_db::DbClient;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    sync::Arc,
};

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(cast_post_vote)
        .typed_delete(retract_post_vote)
        .typed_post(cast_comment_vote)
        .typed_delete(retract_comment_vote)
}

/// The last path segment of the vote endpoints.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
enum Direction {
    Upvote,
    Downvote,
}

impl Direction {
    fn vote_type(self) -> VoteType {
        match self {
            Direction::Upvote => VoteType::Up,
            Direction::Downvote => VoteType::Down,
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upvote => f.write_str("upvote"),
            Direction::Downvote => f.write_str("downvote"),
        }
    }
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/{direction}", rejection(ServerError))]
struct PostVotePath {
    id: Id<PostMarker>,
    direction: Direction,
}

async fn cast_post_vote(
    PostVotePath { id, direction }: PostVotePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<VoteOutcome>> {
    let outcome = db
        .cast_vote(user.user_id(), VoteTarget::Post(id), direction.vote_type())
        .await?;

    Ok(Json(outcome))
}

async fn retract_post_vote(
    PostVotePath { id, direction }: PostVotePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<VoteOutcome>> {
    let outcome = db
        .retract_vote(user.user_id(), VoteTarget::Post(id), direction.vote_type())
        .await?;

    Ok(Json(outcome))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/comments/{id}/{direction}", rejection(ServerError))]
struct CommentVotePath {
    id: Id<CommentMarker>,
    direction: Direction,
}

async fn cast_comment_vote(
    CommentVotePath { id, direction }: CommentVotePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<VoteOutcome>> {
    let outcome = db
        .cast_vote(user.user_id(), VoteTarget::Comment(id), direction.vote_type())
        .await?;

    Ok(Json(outcome))
}

async fn retract_comment_vote(
    CommentVotePath { id, direction }: CommentVotePath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<VoteOutcome>> {
    let outcome = db
        .retract_vote(user.user_id(), VoteTarget::Comment(id), direction.vote_type())
        .await?;

    Ok(Json(outcome))
}
