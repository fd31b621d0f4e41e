use crate::model::{
    Id,
    comment::CommentMarker,
    post::{PostMarker, PostStatus},
};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct VoteMarker;

text_enum! {
    pub enum VoteType {
        Up => "UP",
        Down => "DOWN",
    }
}

/// What a vote points at. Post and comment votes live in separate ledgers.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum VoteTarget {
    Post(Id<PostMarker>),
    Comment(Id<CommentMarker>),
}

impl Display for VoteTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VoteTarget::Post(id) => write!(f, "post {id}"),
            VoteTarget::Comment(id) => write!(f, "comment {id}"),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum VoteCommand {
    Cast(VoteType),
    Retract(VoteType),
}

/// How a single user's vote row changes in response to a [`VoteCommand`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteChange {
    Inserted,
    /// The existing row flips its type in place.
    Switched,
    Removed,
    Unchanged,
}

impl VoteCommand {
    /// Decides the ledger change for a user whose current vote on the target
    /// is `existing`. Returns the change and the vote left afterwards.
    #[must_use]
    pub fn apply(self, existing: Option<VoteType>) -> (VoteChange, Option<VoteType>) {
        match (self, existing) {
            (VoteCommand::Cast(requested), None) => (VoteChange::Inserted, Some(requested)),
            (VoteCommand::Cast(requested), Some(current)) if requested == current => {
                (VoteChange::Unchanged, existing)
            }
            (VoteCommand::Cast(requested), Some(_)) => (VoteChange::Switched, Some(requested)),
            (VoteCommand::Retract(requested), Some(current)) if requested == current => {
                (VoteChange::Removed, None)
            }
            (VoteCommand::Retract(_), _) => (VoteChange::Unchanged, existing),
        }
    }
}

/// Result of a vote mutation as reported to the voter.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    pub target: VoteTarget,
    pub change: VoteChange,
    pub your_vote: Option<VoteType>,
    pub upvotes: u32,
    pub downvotes: u32,
    /// Only present for post votes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PostStatus>,
}
