use crimewatch_common::{
    model::{
        Id, ModelValidationError,
        auth::Authentication,
        comment::{Comment, CommentBody},
        counter,
        moderation::{OverrideReason, StatusChange},
        post::{
            PartialPost, Post, PostContent, PostDescription, PostLocation, PostModeration,
            PostTitle,
        },
        report::{Report, ReportDescription},
        user::{User, UserHandle},
    },
    score::Tally,
};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_snowflake: i64,
    pub handle: String,
    pub role: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct AuthenticationRecord {
    pub user_snowflake: i64,
    pub token_hash: Vec<u8>,
    pub created_at: OffsetDateTime,
    pub expires_after_seconds: Option<i64>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct ModerationRecord {
    pub status: String,
    pub verification_score: i32,
    pub upvotes: i32,
    pub downvotes: i32,
    pub report_count: i32,
    pub approved_report_count: i32,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct FullPostRecord {
    pub post_snowflake: i64,
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    #[sqlx(flatten)]
    pub moderation: ModerationRecord,
    pub created_at: OffsetDateTime,
    #[sqlx(flatten)]
    pub author: UserRecord,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct PartialPostRecord {
    pub post_snowflake: i64,
    pub user_snowflake: i64,
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    #[sqlx(flatten)]
    pub moderation: ModerationRecord,
    pub created_at: OffsetDateTime,
}

/// A post row read under `FOR UPDATE`.
#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct LockedPostRecord {
    pub post_snowflake: i64,
    #[sqlx(flatten)]
    pub moderation: ModerationRecord,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct TallyRecord {
    pub upvotes: i64,
    pub downvotes: i64,
    pub report_count: i64,
    pub approved_report_count: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct CommentRecord {
    pub comment_snowflake: i64,
    pub post_snowflake: i64,
    pub body: String,
    pub upvotes: i32,
    pub downvotes: i32,
    pub created_at: OffsetDateTime,
    #[sqlx(flatten)]
    pub author: UserRecord,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct ReportRecord {
    pub report_snowflake: i64,
    pub post_snowflake: i64,
    pub user_snowflake: i64,
    pub reason: String,
    pub description: Option<String>,
    pub status: String,
    pub reviewer_snowflake: Option<i64>,
    pub reviewed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct StatusChangeRecord {
    pub status_change_snowflake: i64,
    pub post_snowflake: i64,
    pub actor_snowflake: Option<i64>,
    pub previous_status: String,
    pub new_status: String,
    pub cause: String,
    pub reason: Option<String>,
    pub created_at: OffsetDateTime,
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.user_snowflake),
            handle: UserHandle::new(value.handle)?,
            role: value.role.parse()?,
        })
    }
}

impl TryFrom<AuthenticationRecord> for Authentication {
    type Error = ModelValidationError;

    fn try_from(value: AuthenticationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: Id::from_db(value.user_snowflake),
            token_hash: value.token_hash.try_into()?,
            created_at: value.created_at,
            expires_after: value
                .expires_after_seconds
                .map(|seconds| Duration::seconds(seconds).try_into())
                .transpose()?,
        })
    }
}

impl TryFrom<ModerationRecord> for PostModeration {
    type Error = ModelValidationError;

    fn try_from(value: ModerationRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            status: value.status.parse()?,
            verification_score: value.verification_score,
            upvotes: counter(value.upvotes.into())?,
            downvotes: counter(value.downvotes.into())?,
            report_count: counter(value.report_count.into())?,
            approved_report_count: counter(value.approved_report_count.into())?,
        })
    }
}

impl TryFrom<TallyRecord> for Tally {
    type Error = ModelValidationError;

    fn try_from(value: TallyRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            upvotes: counter(value.upvotes)?,
            downvotes: counter(value.downvotes)?,
            report_count: counter(value.report_count)?,
            approved_report_count: counter(value.approved_report_count)?,
        })
    }
}

fn post_content(
    title: String,
    description: String,
    location: Option<String>,
) -> Result<PostContent, ModelValidationError> {
    Ok(PostContent {
        title: PostTitle::new(title)?,
        description: PostDescription::new(description)?,
        location: location.map(PostLocation::new).transpose()?,
    })
}

impl TryFrom<FullPostRecord> for Post {
    type Error = ModelValidationError;

    fn try_from(value: FullPostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.post_snowflake),
            author: value.author.try_into()?,
            content: post_content(value.title, value.description, value.location)?,
            moderation: value.moderation.try_into()?,
            created_at: value.created_at,
        })
    }
}

impl TryFrom<PartialPostRecord> for PartialPost {
    type Error = ModelValidationError;

    fn try_from(value: PartialPostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.post_snowflake),
            author_id: Id::from_db(value.user_snowflake),
            content: post_content(value.title, value.description, value.location)?,
            moderation: value.moderation.try_into()?,
            created_at: value.created_at,
        })
    }
}

impl TryFrom<CommentRecord> for Comment {
    type Error = ModelValidationError;

    fn try_from(value: CommentRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.comment_snowflake),
            post_id: Id::from_db(value.post_snowflake),
            author: value.author.try_into()?,
            body: CommentBody::new(value.body)?,
            upvotes: counter(value.upvotes.into())?,
            downvotes: counter(value.downvotes.into())?,
            created_at: value.created_at,
        })
    }
}

impl TryFrom<ReportRecord> for Report {
    type Error = ModelValidationError;

    fn try_from(value: ReportRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.report_snowflake),
            post_id: Id::from_db(value.post_snowflake),
            user_id: Id::from_db(value.user_snowflake),
            reason: value.reason.parse()?,
            description: value.description.map(ReportDescription::new).transpose()?,
            status: value.status.parse()?,
            reviewer_id: value.reviewer_snowflake.map(Id::from_db),
            reviewed_at: value.reviewed_at,
            created_at: value.created_at,
        })
    }
}

impl TryFrom<StatusChangeRecord> for StatusChange {
    type Error = ModelValidationError;

    fn try_from(value: StatusChangeRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.status_change_snowflake),
            post_id: Id::from_db(value.post_snowflake),
            actor_id: value.actor_snowflake.map(Id::from_db),
            previous_status: value.previous_status.parse()?,
            new_status: value.new_status.parse()?,
            cause: value.cause.parse()?,
            reason: value.reason.map(OverrideReason::new).transpose()?,
            created_at: value.created_at,
        })
    }
}
