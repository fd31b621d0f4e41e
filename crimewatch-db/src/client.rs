use crate::record::{
    AuthenticationRecord, CommentRecord, FullPostRecord, PartialPostRecord, UserRecord,
};
use crimewatch_common::{
    model::{
        CrimewatchSnowflakeGenerator, Id, ModelValidationError,
        auth::{AUTH_TOKEN_LIFETIME, AuthToken, AuthTokenHash, AuthTokenHashError, Authentication},
        comment::{Comment, CommentMarker, CreateComment},
        post::{PartialPost, Post, PostContent, PostMarker, PostNotPendingError, PostStatus},
        report::{ReportMarker, ReportNotPendingError},
        user::{CreateUser, User, UserMarker, UserRole},
    },
    score::ScorePolicy,
    snowflake::{ProcessId, SnowflakeTimestampError, WorkerId},
};
use sqlx::{
    PgPool, Postgres, Transaction, migrate::MigrateError, postgres::PgPoolOptions, query,
    query_as, query_scalar,
};
use std::{
    future::Future,
    sync::{Mutex, PoisonError},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, warn};

pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Attempts per transaction before a transient failure is given up on.
const MAX_TRANSACTION_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(25);

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("Running migrations failed: {0}")]
    Migrate(#[from] MigrateError),
    #[error("Could not generate an id: {0}")]
    Snowflake(#[from] SnowflakeTimestampError),
    #[error(transparent)]
    TokenHash(#[from] AuthTokenHashError),
    #[error("Post with id {0} was not found.")]
    PostNotFound(Id<PostMarker>),
    #[error("Comment with id {0} was not found.")]
    CommentNotFound(Id<CommentMarker>),
    #[error("Report with id {0} was not found.")]
    ReportNotFound(Id<ReportMarker>),
    #[error("No pending report with id {0}: {1}")]
    ReportNotPending(Id<ReportMarker>, ReportNotPendingError),
    #[error("Post {0} cannot be moderated: {1}")]
    PostNotPending(Id<PostMarker>, PostNotPendingError),
    #[error("User {user} already has an open report on post {post}")]
    DuplicateOpenReport {
        user: Id<UserMarker>,
        post: Id<PostMarker>,
    },
}

/// Coarse classification of database failures, used to pick a response.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum DbErrorKind {
    NotFound,
    Conflict,
    Validation,
    /// Serialization failures and deadlocks. The transaction can be retried.
    Transient,
    Timeout,
    Internal,
}

impl DbError {
    #[must_use]
    pub fn kind(&self) -> DbErrorKind {
        match self {
            DbError::PostNotFound(_)
            | DbError::CommentNotFound(_)
            | DbError::ReportNotFound(_)
            | DbError::ReportNotPending(..) => DbErrorKind::NotFound,
            DbError::PostNotPending(..) | DbError::DuplicateOpenReport { .. } => {
                DbErrorKind::Conflict
            }
            DbError::Sqlx(err) => classify_sqlx(err),
            DbError::Data(_) | DbError::Migrate(_) | DbError::Snowflake(_) | DbError::TokenHash(_) => {
                DbErrorKind::Internal
            }
        }
    }
}

fn classify_sqlx(err: &sqlx::Error) -> DbErrorKind {
    match err {
        sqlx::Error::RowNotFound => DbErrorKind::NotFound,
        sqlx::Error::PoolTimedOut => DbErrorKind::Timeout,
        sqlx::Error::Database(db_err) => classify_sqlstate(db_err.code().as_deref()),
        _ => DbErrorKind::Internal,
    }
}

/// Maps a postgres SQLSTATE to an error kind.
#[must_use]
pub fn classify_sqlstate(code: Option<&str>) -> DbErrorKind {
    match code {
        // unique_violation
        Some("23505") => DbErrorKind::Conflict,
        // foreign_key_violation
        Some("23503") => DbErrorKind::NotFound,
        // not_null_violation, check_violation, string_data_right_truncation,
        // invalid_text_representation, numeric_value_out_of_range
        Some("23502" | "23514" | "22001" | "22P02" | "22003") => DbErrorKind::Validation,
        // serialization_failure, deadlock_detected
        Some("40001" | "40P01") => DbErrorKind::Transient,
        // lock_not_available, query_canceled
        Some("55P03" | "57014") => DbErrorKind::Timeout,
        _ => DbErrorKind::Internal,
    }
}

pub(crate) struct IdGenerator(Mutex<CrimewatchSnowflakeGenerator>);

impl IdGenerator {
    pub(crate) fn next<Marker>(&self) -> Result<Id<Marker>> {
        let snowflake = self
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate()?;

        Ok(snowflake.into())
    }
}

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    Ok(pool)
}

pub struct DbClient {
    pool: PgPool,
    pub(crate) ids: IdGenerator,
    pub(crate) policy: ScorePolicy,
    transaction_timeout: Duration,
}

impl DbClient {
    #[must_use]
    pub fn new(
        pool: PgPool,
        worker_id: WorkerId,
        process_id: ProcessId,
        policy: ScorePolicy,
        transaction_timeout: Duration,
    ) -> Self {
        let ids = IdGenerator(Mutex::new(CrimewatchSnowflakeGenerator::new(
            worker_id, process_id,
        )));

        Self {
            pool,
            ids,
            policy,
            transaction_timeout,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Opens a transaction whose statements and lock waits are bounded by the
    /// configured timeout.
    pub(crate) async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        let timeout_ms = self.transaction_timeout.as_millis().to_string();

        query(
            "
            SELECT
                set_config('statement_timeout', $1, true),
                set_config('lock_timeout', $1, true)
            ",
        )
        .bind(timeout_ms)
        .execute(&mut *tx)
        .await?;

        Ok(tx)
    }

    /// Runs `attempt` until it succeeds, fails permanently, or has failed
    /// transiently [`MAX_TRANSACTION_ATTEMPTS`] times. Every attempt must open
    /// and commit its own transaction.
    pub(crate) async fn transact<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts = 1;
        loop {
            match attempt().await {
                Err(err)
                    if err.kind() == DbErrorKind::Transient
                        && attempts < MAX_TRANSACTION_ATTEMPTS =>
                {
                    warn!(operation, attempts, error = %err, "Retrying transaction");
                    tokio::time::sleep(RETRY_BACKOFF * attempts).await;
                    attempts += 1;
                }
                result => return result,
            }
        }
    }

    pub async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT
                users.user_snowflake,
                users.handle,
                users.role
            FROM
                users.users
            WHERE
                users.user_snowflake = $1
            ",
        )
        .bind(user_id.as_db())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    /// Creates a user and issues their first auth token.
    pub async fn register_user(&self, user: &CreateUser) -> Result<(User, AuthToken)> {
        let user_id: Id<UserMarker> = self.ids.next()?;
        let token = AuthToken::generate_random(user_id);
        let token_hash = token.hash()?;

        let mut tx = self.begin().await?;

        let record = query_as::<_, UserRecord>(
            "
            INSERT INTO users.users (user_snowflake, handle, role)
            VALUES ($1, $2, $3)
            RETURNING user_snowflake, handle, role
            ",
        )
        .bind(user_id.as_db())
        .bind(user.handle.get())
        .bind(UserRole::User.as_str())
        .fetch_one(&mut *tx)
        .await?;

        query(
            "
            INSERT INTO users.auths (token_hash, user_snowflake, expires_after_seconds)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(&token_hash.0[..])
        .bind(user_id.as_db())
        .bind(AUTH_TOKEN_LIFETIME.whole_seconds())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(%user_id, "Registered user");

        Ok((User::try_from(record)?, token))
    }

    pub async fn fetch_auth(&self, token_hash: &AuthTokenHash) -> Result<Option<Authentication>> {
        let record = query_as::<_, AuthenticationRecord>(
            "
            SELECT
                auths.user_snowflake,
                auths.token_hash,
                auths.created_at,
                auths.expires_after_seconds
            FROM
                users.auths
            WHERE
                auths.token_hash = $1
            ",
        )
        .bind(&token_hash.0[..])
        .fetch_optional(&self.pool)
        .await?;

        let authentication = record.map(Authentication::try_from).transpose()?;
        Ok(authentication)
    }

    pub async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = query_as::<_, FullPostRecord>(
            "
            SELECT
                posts.post_snowflake,
                posts.title,
                posts.description,
                posts.location,
                posts.status,
                posts.verification_score,
                posts.upvotes,
                posts.downvotes,
                posts.report_count,
                posts.approved_report_count,
                posts.created_at,
                users.user_snowflake,
                users.handle,
                users.role
            FROM
                posts.posts JOIN users.users USING (user_snowflake)
            WHERE
                posts.post_snowflake = $1 AND NOT posts.is_deleted
            ",
        )
        .bind(post_id.as_db())
        .fetch_optional(&self.pool)
        .await?;

        let post = record.map(Post::try_from).transpose()?;
        Ok(post)
    }

    /// Returns `None` if the user does not exist.
    pub async fn fetch_user_posts(
        &self,
        user_id: Id<UserMarker>,
    ) -> Result<Option<Vec<PartialPost>>> {
        if self.fetch_user(user_id).await?.is_none() {
            return Ok(None);
        }

        let records = query_as::<_, PartialPostRecord>(
            "
            SELECT
                posts.post_snowflake,
                posts.user_snowflake,
                posts.title,
                posts.description,
                posts.location,
                posts.status,
                posts.verification_score,
                posts.upvotes,
                posts.downvotes,
                posts.report_count,
                posts.approved_report_count,
                posts.created_at
            FROM
                posts.posts
            WHERE
                posts.user_snowflake = $1 AND NOT posts.is_deleted
            ORDER BY
                posts.post_snowflake DESC
            ",
        )
        .bind(user_id.as_db())
        .fetch_all(&self.pool)
        .await?;

        let posts = records
            .into_iter()
            .map(PartialPost::try_from)
            .collect::<Result<_, _>>()?;
        Ok(Some(posts))
    }

    pub async fn create_post(&self, author: Id<UserMarker>, content: &PostContent) -> Result<Post> {
        let post_id: Id<PostMarker> = self.ids.next()?;

        query(
            "
            INSERT INTO posts.posts
                (post_snowflake, user_snowflake, title, description, location, status, verification_score)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(post_id.as_db())
        .bind(author.as_db())
        .bind(content.title.get())
        .bind(content.description.get())
        .bind(content.location.as_ref().map(|location| location.get()))
        .bind(PostStatus::Pending.as_str())
        .bind(self.policy.initial_score())
        .execute(&self.pool)
        .await?;

        debug!(%post_id, %author, "Created post");

        self.fetch_post(post_id)
            .await?
            .ok_or(DbError::PostNotFound(post_id))
    }

    /// Soft-deletes a post. Returns whether a visible post was deleted.
    pub async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let result = query(
            "
            UPDATE posts.posts
            SET is_deleted = TRUE
            WHERE post_snowflake = $1 AND NOT is_deleted
            ",
        )
        .bind(post_id.as_db())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn create_comment(
        &self,
        post_id: Id<PostMarker>,
        author: Id<UserMarker>,
        comment: &CreateComment,
    ) -> Result<Comment> {
        let comment_id: Id<CommentMarker> = self.ids.next()?;

        let inserted = query_scalar::<_, i64>(
            "
            INSERT INTO posts.comments (comment_snowflake, post_snowflake, user_snowflake, body)
            SELECT $1, posts.post_snowflake, $3, $4
            FROM posts.posts
            WHERE posts.post_snowflake = $2 AND NOT posts.is_deleted
            RETURNING comment_snowflake
            ",
        )
        .bind(comment_id.as_db())
        .bind(post_id.as_db())
        .bind(author.as_db())
        .bind(comment.body.get())
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_none() {
            return Err(DbError::PostNotFound(post_id));
        }

        self.fetch_comment(comment_id)
            .await?
            .ok_or(DbError::CommentNotFound(comment_id))
    }

    pub async fn fetch_comment(&self, comment_id: Id<CommentMarker>) -> Result<Option<Comment>> {
        let record = query_as::<_, CommentRecord>(
            "
            SELECT
                comments.comment_snowflake,
                comments.post_snowflake,
                comments.body,
                comments.upvotes,
                comments.downvotes,
                comments.created_at,
                users.user_snowflake,
                users.handle,
                users.role
            FROM
                posts.comments
                JOIN users.users ON users.user_snowflake = comments.user_snowflake
                JOIN posts.posts ON posts.post_snowflake = comments.post_snowflake
            WHERE
                comments.comment_snowflake = $1
                AND NOT comments.is_deleted
                AND NOT posts.is_deleted
            ",
        )
        .bind(comment_id.as_db())
        .fetch_optional(&self.pool)
        .await?;

        let comment = record.map(Comment::try_from).transpose()?;
        Ok(comment)
    }

    /// Returns `None` if the post does not exist or was deleted.
    pub async fn fetch_post_comments(
        &self,
        post_id: Id<PostMarker>,
    ) -> Result<Option<Vec<Comment>>> {
        let post_exists = query_scalar::<_, bool>(
            "
            SELECT EXISTS (
                SELECT 1 FROM posts.posts WHERE post_snowflake = $1 AND NOT is_deleted
            )
            ",
        )
        .bind(post_id.as_db())
        .fetch_one(&self.pool)
        .await?;

        if !post_exists {
            return Ok(None);
        }

        let records = query_as::<_, CommentRecord>(
            "
            SELECT
                comments.comment_snowflake,
                comments.post_snowflake,
                comments.body,
                comments.upvotes,
                comments.downvotes,
                comments.created_at,
                users.user_snowflake,
                users.handle,
                users.role
            FROM
                posts.comments
                JOIN users.users ON users.user_snowflake = comments.user_snowflake
            WHERE
                comments.post_snowflake = $1 AND NOT comments.is_deleted
            ORDER BY
                comments.created_at, comments.comment_snowflake
            ",
        )
        .bind(post_id.as_db())
        .fetch_all(&self.pool)
        .await?;

        let comments = records
            .into_iter()
            .map(Comment::try_from)
            .collect::<Result<_, _>>()?;
        Ok(Some(comments))
    }

    /// Soft-deletes a comment. Returns whether a visible comment was deleted.
    pub async fn delete_comment(&self, comment_id: Id<CommentMarker>) -> Result<bool> {
        let result = query(
            "
            UPDATE posts.comments
            SET is_deleted = TRUE
            WHERE comment_snowflake = $1 AND NOT is_deleted
            ",
        )
        .bind(comment_id.as_db())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use crate::client::{DbError, DbErrorKind, classify_sqlstate};
    use crimewatch_common::model::{
        Id,
        report::{ReportNotPendingError, ReportStatus},
    };

    #[test]
    fn sqlstates_map_to_kinds() {
        assert_eq!(classify_sqlstate(Some("23505")), DbErrorKind::Conflict);
        assert_eq!(classify_sqlstate(Some("23503")), DbErrorKind::NotFound);
        assert_eq!(classify_sqlstate(Some("23514")), DbErrorKind::Validation);
        assert_eq!(classify_sqlstate(Some("22P02")), DbErrorKind::Validation);
        assert_eq!(classify_sqlstate(Some("40001")), DbErrorKind::Transient);
        assert_eq!(classify_sqlstate(Some("40P01")), DbErrorKind::Transient);
        assert_eq!(classify_sqlstate(Some("57014")), DbErrorKind::Timeout);
        assert_eq!(classify_sqlstate(Some("XX000")), DbErrorKind::Internal);
        assert_eq!(classify_sqlstate(None), DbErrorKind::Internal);
    }

    #[test]
    fn reviewing_a_closed_report_is_not_found() {
        let err = DbError::ReportNotPending(
            Id::from(5),
            ReportNotPendingError(ReportStatus::Rejected),
        );
        assert_eq!(err.kind(), DbErrorKind::NotFound);
    }

    #[test]
    fn sqlx_errors() {
        assert_eq!(
            DbError::from(sqlx::Error::RowNotFound).kind(),
            DbErrorKind::NotFound
        );
        assert_eq!(
            DbError::from(sqlx::Error::PoolTimedOut).kind(),
            DbErrorKind::Timeout
        );
        assert_eq!(
            DbError::from(sqlx::Error::PoolClosed).kind(),
            DbErrorKind::Internal
        );
    }
}
