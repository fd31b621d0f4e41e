use crate::{
    model::{Id, post::PostMarker, post::PostStatus, user::UserMarker},
    util::BoundedString,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type OverrideReason = BoundedString<1, 500>;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct StatusChangeMarker;

text_enum! {
    pub enum StatusChangeCause {
        /// The score policy reacted to a ledger change or reconciliation.
        Policy => "POLICY",
        /// An admin moderated a pending post.
        Moderation => "MODERATION",
        /// An admin forced a status regardless of the state machine.
        Override => "OVERRIDE",
    }
}

/// One entry of the post status audit log.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub id: Id<StatusChangeMarker>,
    pub post_id: Id<PostMarker>,
    /// `None` when the policy acted on its own.
    pub actor_id: Option<Id<UserMarker>>,
    pub previous_status: PostStatus,
    pub new_status: PostStatus,
    pub cause: StatusChangeCause,
    pub reason: Option<OverrideReason>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct StatusOverride {
    pub status: PostStatus,
    #[serde(default)]
    pub reason: Option<OverrideReason>,
}

/// A status transition that is about to be recorded.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct PendingStatusChange {
    pub post_id: Id<PostMarker>,
    pub actor_id: Option<Id<UserMarker>>,
    pub previous_status: PostStatus,
    pub new_status: PostStatus,
    pub cause: StatusChangeCause,
    pub reason: Option<OverrideReason>,
}
