//! Ledger transactions.
//!
//! Every mutation that can influence a post's moderation state runs in one
//! transaction that first locks the post row, then touches the ledgers and
//! finally settles the post: counters, score and status are recounted from
//! the ledgers and written back together with an audit entry if the status
//! changed. Lock order is always post before comment or report rows.

pub mod moderation;
pub mod reconcile;
pub mod reports;
pub mod votes;

use crate::{
    client::{DbError, IdGenerator, Result},
    record::{LockedPostRecord, TallyRecord},
};
use crimewatch_common::{
    model::{
        Id,
        moderation::{PendingStatusChange, StatusChangeCause, StatusChangeMarker},
        post::{PostMarker, PostModeration},
    },
    score::{Assessment, ScorePolicy, Tally},
};
use sqlx::{PgConnection, query, query_as};
use tracing::{debug, info};

/// A post row held under `FOR UPDATE` for the rest of the transaction.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub(crate) struct LockedPost {
    pub id: Id<PostMarker>,
    pub moderation: PostModeration,
}

/// Locks a non-deleted post.
pub(crate) async fn lock_post(conn: &mut PgConnection, post_id: Id<PostMarker>) -> Result<LockedPost> {
    let record = query_as::<_, LockedPostRecord>(
        "
        SELECT
            post_snowflake,
            status,
            verification_score,
            upvotes,
            downvotes,
            report_count,
            approved_report_count
        FROM
            posts.posts
        WHERE
            post_snowflake = $1 AND NOT is_deleted
        FOR UPDATE
        ",
    )
    .bind(post_id.as_db())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(DbError::PostNotFound(post_id))?;

    Ok(LockedPost {
        id: Id::from_db(record.post_snowflake),
        moderation: record.moderation.try_into()?,
    })
}

/// Counts the vote and report ledgers of a post.
pub(crate) async fn recount(conn: &mut PgConnection, post_id: Id<PostMarker>) -> Result<Tally> {
    let record = query_as::<_, TallyRecord>(
        "
        SELECT
            (SELECT COUNT(*) FROM votes.post_votes
                WHERE post_snowflake = $1 AND vote_type = 'UP') AS upvotes,
            (SELECT COUNT(*) FROM votes.post_votes
                WHERE post_snowflake = $1 AND vote_type = 'DOWN') AS downvotes,
            (SELECT COUNT(*) FROM moderation.reports
                WHERE post_snowflake = $1 AND status <> 'REJECTED') AS report_count,
            (SELECT COUNT(*) FROM moderation.reports
                WHERE post_snowflake = $1 AND status = 'APPROVED') AS approved_report_count
        ",
    )
    .bind(post_id.as_db())
    .fetch_one(&mut *conn)
    .await?;

    Ok(record.try_into()?)
}

pub(crate) async fn write_moderation(
    conn: &mut PgConnection,
    post_id: Id<PostMarker>,
    moderation: &PostModeration,
) -> Result<()> {
    query(
        "
        UPDATE posts.posts
        SET
            status = $2,
            verification_score = $3,
            upvotes = $4,
            downvotes = $5,
            report_count = $6,
            approved_report_count = $7
        WHERE
            post_snowflake = $1
        ",
    )
    .bind(post_id.as_db())
    .bind(moderation.status.as_str())
    .bind(moderation.verification_score)
    .bind(counter_to_db(moderation.upvotes))
    .bind(counter_to_db(moderation.downvotes))
    .bind(counter_to_db(moderation.report_count))
    .bind(counter_to_db(moderation.approved_report_count))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Counters are stored as `INTEGER` and saturate at its maximum.
fn counter_to_db(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

/// Appends to the status audit log and emits a `status_transition` event.
pub(crate) async fn record_status_change(
    conn: &mut PgConnection,
    ids: &IdGenerator,
    change: &PendingStatusChange,
) -> Result<Id<StatusChangeMarker>> {
    let change_id: Id<StatusChangeMarker> = ids.next()?;

    query(
        "
        INSERT INTO moderation.status_changes
            (status_change_snowflake, post_snowflake, actor_snowflake, previous_status, new_status, cause, reason)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ",
    )
    .bind(change_id.as_db())
    .bind(change.post_id.as_db())
    .bind(change.actor_id.map(Id::as_db))
    .bind(change.previous_status.as_str())
    .bind(change.new_status.as_str())
    .bind(change.cause.as_str())
    .bind(change.reason.as_ref().map(|reason| reason.get()))
    .execute(&mut *conn)
    .await?;

    info!(
        target: "status_transition",
        post_id = %change.post_id,
        actor_id = change.actor_id.map(u64::from),
        previous_status = %change.previous_status,
        new_status = %change.new_status,
        cause = %change.cause,
        "Post status changed"
    );

    Ok(change_id)
}

/// Recounts a locked post, applies the score policy and writes the result.
pub(crate) async fn settle(
    conn: &mut PgConnection,
    ids: &IdGenerator,
    policy: &ScorePolicy,
    post: &LockedPost,
) -> Result<Assessment> {
    let tally = recount(conn, post.id).await?;
    let assessment = policy.assess(post.moderation.status, tally);
    let moderation = assessment.moderation();

    if moderation != post.moderation {
        write_moderation(conn, post.id, &moderation).await?;
        debug!(
            post_id = %post.id,
            score = assessment.score,
            upvotes = tally.upvotes,
            downvotes = tally.downvotes,
            report_count = tally.report_count,
            approved_report_count = tally.approved_report_count,
            "Settled post"
        );
    }

    if assessment.transitioned() {
        let change = PendingStatusChange {
            post_id: post.id,
            actor_id: None,
            previous_status: assessment.previous_status,
            new_status: assessment.status,
            cause: StatusChangeCause::Policy,
            reason: None,
        };
        record_status_change(conn, ids, &change).await?;
    }

    Ok(assessment)
}
