use crate::{
    model::{
        Id,
        report::ReviewAction,
        user::{User, UserMarker},
    },
    util::BoundedString,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub type PostTitle = BoundedString<1, 200>;
pub type PostDescription = BoundedString<1, 5000>;
/// May be empty.
pub type PostLocation = BoundedString<0, 200>;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

text_enum! {
    /// Moderation state of a post.
    ///
    /// `Approved` and `Rejected` are terminal for reviews and the automatic
    /// policy; only an admin override leaves them.
    pub enum PostStatus {
        Pending => "PENDING",
        Approved => "APPROVED",
        Rejected => "REJECTED",
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
#[error("Post is already {0} and can no longer be moderated")]
pub struct PostNotPendingError(pub PostStatus);

impl PostStatus {
    /// Applies an admin's moderation decision to a post awaiting review.
    pub fn moderate(self, action: ReviewAction) -> Result<PostStatus, PostNotPendingError> {
        match self {
            PostStatus::Pending => Ok(match action {
                ReviewAction::Approve => PostStatus::Approved,
                ReviewAction::Reject => PostStatus::Rejected,
            }),
            status => Err(PostNotPendingError(status)),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct PostContent {
    pub title: PostTitle,
    pub description: PostDescription,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PostLocation>,
}

/// The denormalized moderation fields of a post.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostModeration {
    pub status: PostStatus,
    pub verification_score: i32,
    pub upvotes: u32,
    pub downvotes: u32,
    pub report_count: u32,
    pub approved_report_count: u32,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Id<PostMarker>,
    pub author: User,
    #[serde(flatten)]
    pub content: PostContent,
    #[serde(flatten)]
    pub moderation: PostModeration,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialPost {
    pub id: Id<PostMarker>,
    pub author_id: Id<UserMarker>,
    #[serde(flatten)]
    pub content: PostContent,
    #[serde(flatten)]
    pub moderation: PostModeration,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Body of an admin's decision on a pending post.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct ModeratePost {
    pub action: ReviewAction,
}

#[cfg(test)]
mod tests {
    use crate::model::{
        post::{PostContent, PostNotPendingError, PostStatus},
        report::ReviewAction,
    };

    #[test]
    fn only_pending_posts_can_be_moderated() {
        assert_eq!(
            PostStatus::Pending.moderate(ReviewAction::Approve),
            Ok(PostStatus::Approved)
        );
        assert_eq!(
            PostStatus::Pending.moderate(ReviewAction::Reject),
            Ok(PostStatus::Rejected)
        );
        assert_eq!(
            PostStatus::Rejected.moderate(ReviewAction::Approve),
            Err(PostNotPendingError(PostStatus::Rejected))
        );
        assert!(PostStatus::Approved.moderate(ReviewAction::Reject).is_err());
    }

    #[test]
    fn content_validation_happens_on_deserialize() {
        let content: PostContent =
            serde_json::from_str(r#"{"title": "Stolen bike", "description": "Near the station"}"#)
                .unwrap();
        assert_eq!(content.location, None);

        let empty_title =
            serde_json::from_str::<PostContent>(r#"{"title": "", "description": "x"}"#);
        assert!(empty_title.is_err());

        let blank_location: PostContent = serde_json::from_str(
            r#"{"title": "Stolen bike", "description": "Near the station", "location": ""}"#,
        )
        .unwrap();
        assert_eq!(
            blank_location.location.as_ref().map(|location| location.get()),
            Some("")
        );

        let long_title = format!(r#"{{"title": "{}", "description": "x"}}"#, "a".repeat(201));
        assert!(serde_json::from_str::<PostContent>(&long_title).is_err());
    }
}
