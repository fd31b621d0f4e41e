use crate::{
    client::{DbClient, DbError, IdGenerator, Result},
    ledger::{lock_post, settle},
};
use crimewatch_common::{
    model::{
        Id, counter,
        comment::CommentMarker,
        user::UserMarker,
        vote::{VoteChange, VoteCommand, VoteMarker, VoteOutcome, VoteTarget, VoteType},
    },
    score::ScorePolicy,
};
use sqlx::{PgConnection, query, query_as, query_scalar};
use tracing::debug;

/// The two vote tables share a layout and differ only in the target column.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
enum VoteLedger {
    Post,
    Comment,
}

impl VoteLedger {
    fn table(self) -> &'static str {
        match self {
            VoteLedger::Post => "votes.post_votes",
            VoteLedger::Comment => "votes.comment_votes",
        }
    }

    fn target_column(self) -> &'static str {
        match self {
            VoteLedger::Post => "post_snowflake",
            VoteLedger::Comment => "comment_snowflake",
        }
    }
}

async fn fetch_vote(
    conn: &mut PgConnection,
    ledger: VoteLedger,
    user_id: Id<UserMarker>,
    target: i64,
) -> Result<Option<VoteType>> {
    let sql = format!(
        "SELECT vote_type FROM {} WHERE user_snowflake = $1 AND {} = $2",
        ledger.table(),
        ledger.target_column(),
    );

    let vote_type = query_scalar::<_, String>(&sql)
        .bind(user_id.as_db())
        .bind(target)
        .fetch_optional(&mut *conn)
        .await?;

    let vote_type = vote_type
        .map(|vote_type| vote_type.parse::<VoteType>())
        .transpose()
        .map_err(|err| DbError::Data(err.into()))?;
    Ok(vote_type)
}

/// Applies a vote command to the user's row in `ledger`. Switching updates
/// the existing row in place, so a user never holds two votes on one target.
async fn record_vote(
    conn: &mut PgConnection,
    ids: &IdGenerator,
    ledger: VoteLedger,
    user_id: Id<UserMarker>,
    target: i64,
    command: VoteCommand,
) -> Result<(VoteChange, Option<VoteType>)> {
    let before = fetch_vote(conn, ledger, user_id, target).await?;
    let (change, after) = command.apply(before);

    match (change, before, after) {
        (VoteChange::Inserted | VoteChange::Switched, _, Some(vote_type)) => {
            let vote_id: Id<VoteMarker> = ids.next()?;
            let sql = format!(
                "
                INSERT INTO {table} (vote_snowflake, user_snowflake, {column}, vote_type)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (user_snowflake, {column})
                DO UPDATE SET vote_type = EXCLUDED.vote_type, created_at = now()
                ",
                table = ledger.table(),
                column = ledger.target_column(),
            );

            query(&sql)
                .bind(vote_id.as_db())
                .bind(user_id.as_db())
                .bind(target)
                .bind(vote_type.as_str())
                .execute(&mut *conn)
                .await?;
        }
        (VoteChange::Removed, Some(vote_type), _) => {
            let sql = format!(
                "DELETE FROM {} WHERE user_snowflake = $1 AND {} = $2 AND vote_type = $3",
                ledger.table(),
                ledger.target_column(),
            );

            query(&sql)
                .bind(user_id.as_db())
                .bind(target)
                .bind(vote_type.as_str())
                .execute(&mut *conn)
                .await?;
        }
        _ => {}
    }

    debug!(%user_id, ?ledger, target_id = target, ?change, ?after, "Recorded vote");
    Ok((change, after))
}

/// Locks a comment after its post.
async fn lock_comment(conn: &mut PgConnection, comment_id: Id<CommentMarker>) -> Result<()> {
    let post_id = query_scalar::<_, i64>(
        "
        SELECT post_snowflake
        FROM posts.comments
        WHERE comment_snowflake = $1 AND NOT is_deleted
        ",
    )
    .bind(comment_id.as_db())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(DbError::CommentNotFound(comment_id))?;

    lock_post(conn, Id::from_db(post_id))
        .await
        .map_err(|err| match err {
            DbError::PostNotFound(_) => DbError::CommentNotFound(comment_id),
            err => err,
        })?;

    query_scalar::<_, i64>(
        "
        SELECT comment_snowflake
        FROM posts.comments
        WHERE comment_snowflake = $1 AND NOT is_deleted
        FOR UPDATE
        ",
    )
    .bind(comment_id.as_db())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(DbError::CommentNotFound(comment_id))?;

    Ok(())
}

async fn settle_comment(
    conn: &mut PgConnection,
    comment_id: Id<CommentMarker>,
) -> Result<(u32, u32)> {
    let (upvotes, downvotes) = query_as::<_, (i32, i32)>(
        "
        UPDATE posts.comments
        SET
            upvotes = counts.upvotes,
            downvotes = counts.downvotes
        FROM (
            SELECT
                COUNT(*) FILTER (WHERE vote_type = 'UP') AS upvotes,
                COUNT(*) FILTER (WHERE vote_type = 'DOWN') AS downvotes
            FROM votes.comment_votes
            WHERE comment_snowflake = $1
        ) AS counts
        WHERE comment_snowflake = $1
        RETURNING comments.upvotes, comments.downvotes
        ",
    )
    .bind(comment_id.as_db())
    .fetch_one(&mut *conn)
    .await?;

    Ok((counter(upvotes.into())?, counter(downvotes.into())?))
}

/// Applies a vote command inside an open transaction.
async fn apply_vote(
    conn: &mut PgConnection,
    ids: &IdGenerator,
    policy: &ScorePolicy,
    user_id: Id<UserMarker>,
    target: VoteTarget,
    command: VoteCommand,
) -> Result<VoteOutcome> {
    match target {
        VoteTarget::Post(post_id) => {
            let post = lock_post(conn, post_id).await?;
            let (change, your_vote) =
                record_vote(conn, ids, VoteLedger::Post, user_id, post_id.as_db(), command).await?;
            let assessment = settle(conn, ids, policy, &post).await?;

            Ok(VoteOutcome {
                target,
                change,
                your_vote,
                upvotes: assessment.tally.upvotes,
                downvotes: assessment.tally.downvotes,
                verification_score: Some(assessment.score),
                status: Some(assessment.status),
            })
        }
        VoteTarget::Comment(comment_id) => {
            lock_comment(conn, comment_id).await?;
            let (change, your_vote) = record_vote(
                conn,
                ids,
                VoteLedger::Comment,
                user_id,
                comment_id.as_db(),
                command,
            )
            .await?;
            let (upvotes, downvotes) = settle_comment(conn, comment_id).await?;

            Ok(VoteOutcome {
                target,
                change,
                your_vote,
                upvotes,
                downvotes,
                verification_score: None,
                status: None,
            })
        }
    }
}

impl DbClient {
    /// Casts a vote. Casting the vote the user already holds changes nothing,
    /// casting the opposite one switches it.
    pub async fn cast_vote(
        &self,
        user_id: Id<UserMarker>,
        target: VoteTarget,
        vote_type: VoteType,
    ) -> Result<VoteOutcome> {
        self.vote(user_id, target, VoteCommand::Cast(vote_type)).await
    }

    /// Removes the user's vote of the given type, if they hold it.
    pub async fn retract_vote(
        &self,
        user_id: Id<UserMarker>,
        target: VoteTarget,
        vote_type: VoteType,
    ) -> Result<VoteOutcome> {
        self.vote(user_id, target, VoteCommand::Retract(vote_type)).await
    }

    async fn vote(
        &self,
        user_id: Id<UserMarker>,
        target: VoteTarget,
        command: VoteCommand,
    ) -> Result<VoteOutcome> {
        self.transact("vote", move || async move {
            let mut tx = self.begin().await?;
            let outcome =
                apply_vote(&mut *tx, &self.ids, &self.policy, user_id, target, command).await?;
            tx.commit().await?;

            Ok(outcome)
        })
        .await
    }
}
