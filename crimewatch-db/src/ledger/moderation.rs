use crate::{
    client::{DbClient, DbError, IdGenerator, Result},
    ledger::{LockedPost, lock_post, record_status_change, settle, write_moderation},
    record::StatusChangeRecord,
};
use crimewatch_common::{
    model::{
        Id,
        moderation::{PendingStatusChange, StatusChange, StatusChangeCause, StatusOverride},
        post::{Post, PostMarker, PostModeration},
        report::ReviewAction,
        user::UserMarker,
    },
    score::ScorePolicy,
};
use sqlx::{PgConnection, query_as, query_scalar};
use tracing::debug;

/// Sets the status of a locked post and appends the change to the audit log.
async fn change_status(
    conn: &mut PgConnection,
    ids: &IdGenerator,
    post: &LockedPost,
    change: &PendingStatusChange,
) -> Result<LockedPost> {
    let moderation = PostModeration {
        status: change.new_status,
        ..post.moderation
    };
    write_moderation(conn, post.id, &moderation).await?;
    record_status_change(conn, ids, change).await?;

    Ok(LockedPost {
        id: post.id,
        moderation,
    })
}

async fn moderate_in(
    conn: &mut PgConnection,
    ids: &IdGenerator,
    policy: &ScorePolicy,
    post_id: Id<PostMarker>,
    admin_id: Id<UserMarker>,
    action: ReviewAction,
) -> Result<()> {
    let post = lock_post(conn, post_id).await?;
    let new_status = post
        .moderation
        .status
        .moderate(action)
        .map_err(|err| DbError::PostNotPending(post_id, err))?;

    let change = PendingStatusChange {
        post_id,
        actor_id: Some(admin_id),
        previous_status: post.moderation.status,
        new_status,
        cause: StatusChangeCause::Moderation,
        reason: None,
    };
    let post = change_status(conn, ids, &post, &change).await?;
    settle(conn, ids, policy, &post).await?;

    Ok(())
}

async fn override_in(
    conn: &mut PgConnection,
    ids: &IdGenerator,
    post_id: Id<PostMarker>,
    admin_id: Id<UserMarker>,
    status_override: &StatusOverride,
) -> Result<()> {
    let post = lock_post(conn, post_id).await?;
    if post.moderation.status == status_override.status {
        debug!(%post_id, status = %status_override.status, "Override does not change the status");
        return Ok(());
    }

    let change = PendingStatusChange {
        post_id,
        actor_id: Some(admin_id),
        previous_status: post.moderation.status,
        new_status: status_override.status,
        cause: StatusChangeCause::Override,
        reason: status_override.reason.clone(),
    };
    change_status(conn, ids, &post, &change).await?;

    Ok(())
}

/// Recounts a post from its ledgers. Returns whether anything stored changed.
pub(crate) async fn recompute_in(
    conn: &mut PgConnection,
    ids: &IdGenerator,
    policy: &ScorePolicy,
    post_id: Id<PostMarker>,
) -> Result<bool> {
    let post = lock_post(conn, post_id).await?;
    let assessment = settle(conn, ids, policy, &post).await?;

    Ok(assessment.moderation() != post.moderation)
}

impl DbClient {
    async fn fetch_existing_post(&self, post_id: Id<PostMarker>) -> Result<Post> {
        self.fetch_post(post_id)
            .await?
            .ok_or(DbError::PostNotFound(post_id))
    }

    /// Approves or rejects a pending post.
    pub async fn moderate_post(
        &self,
        post_id: Id<PostMarker>,
        admin_id: Id<UserMarker>,
        action: ReviewAction,
    ) -> Result<Post> {
        self.transact("moderate_post", move || async move {
            let mut tx = self.begin().await?;
            moderate_in(&mut *tx, &self.ids, &self.policy, post_id, admin_id, action).await?;
            tx.commit().await?;

            Ok(())
        })
        .await?;

        self.fetch_existing_post(post_id).await
    }

    /// Forces a post into any status, bypassing the state machine.
    pub async fn override_post_status(
        &self,
        post_id: Id<PostMarker>,
        admin_id: Id<UserMarker>,
        status_override: &StatusOverride,
    ) -> Result<Post> {
        self.transact("override_post_status", move || async move {
            let mut tx = self.begin().await?;
            override_in(&mut *tx, &self.ids, post_id, admin_id, status_override).await?;
            tx.commit().await?;

            Ok(())
        })
        .await?;

        self.fetch_existing_post(post_id).await
    }

    /// Rebuilds a post's counters, score and status from the ledgers.
    pub async fn recompute_post(&self, post_id: Id<PostMarker>) -> Result<Post> {
        self.recompute(post_id).await?;
        self.fetch_existing_post(post_id).await
    }

    pub(crate) async fn recompute(&self, post_id: Id<PostMarker>) -> Result<bool> {
        self.transact("recompute_post", move || async move {
            let mut tx = self.begin().await?;
            let changed = recompute_in(&mut *tx, &self.ids, &self.policy, post_id).await?;
            tx.commit().await?;

            Ok(changed)
        })
        .await
    }

    /// The audit log of a post, oldest first. `None` if the post does not exist.
    pub async fn status_history(
        &self,
        post_id: Id<PostMarker>,
    ) -> Result<Option<Vec<StatusChange>>> {
        let post_exists = query_scalar::<_, bool>(
            "
            SELECT EXISTS (
                SELECT 1 FROM posts.posts WHERE post_snowflake = $1 AND NOT is_deleted
            )
            ",
        )
        .bind(post_id.as_db())
        .fetch_one(self.pool())
        .await?;

        if !post_exists {
            return Ok(None);
        }

        let records = query_as::<_, StatusChangeRecord>(
            "
            SELECT
                status_change_snowflake,
                post_snowflake,
                actor_snowflake,
                previous_status,
                new_status,
                cause,
                reason,
                created_at
            FROM
                moderation.status_changes
            WHERE
                post_snowflake = $1
            ORDER BY
                status_change_snowflake
            ",
        )
        .bind(post_id.as_db())
        .fetch_all(self.pool())
        .await?;

        let history = records
            .into_iter()
            .map(StatusChange::try_from)
            .collect::<Result<_, _>>()?;
        Ok(Some(history))
    }
}
