use crate::{
    model::{Id, post::PostMarker, user::User},
    util::BoundedString,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type CommentBody = BoundedString<1, 2000>;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CommentMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Id<CommentMarker>,
    pub post_id: Id<PostMarker>,
    pub author: User,
    pub body: CommentBody,
    pub upvotes: u32,
    pub downvotes: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct CreateComment {
    pub body: CommentBody,
}
