use crate::client::{DbClient, DbError, Result};
use crimewatch_common::model::{Id, post::PostMarker};
use sqlx::query_scalar;
use tracing::{debug, info};

const RECONCILE_BATCH_SIZE: i64 = 200;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct ReconcileSummary {
    pub examined: u64,
    pub corrected: u64,
}

impl DbClient {
    /// Recomputes every non-deleted post from its ledgers, each in its own
    /// transaction. Posts deleted while the walk is running are skipped.
    pub async fn reconcile_all(&self) -> Result<ReconcileSummary> {
        let mut summary = ReconcileSummary::default();
        let mut after = i64::MIN;

        loop {
            let batch = query_scalar::<_, i64>(
                "
                SELECT post_snowflake
                FROM posts.posts
                WHERE NOT is_deleted AND post_snowflake > $1
                ORDER BY post_snowflake
                LIMIT $2
                ",
            )
            .bind(after)
            .bind(RECONCILE_BATCH_SIZE)
            .fetch_all(self.pool())
            .await?;

            let Some(&last) = batch.last() else {
                break;
            };
            after = last;

            for post_snowflake in batch {
                let post_id: Id<PostMarker> = Id::from_db(post_snowflake);
                match self.recompute(post_id).await {
                    Ok(changed) => {
                        summary.examined += 1;
                        if changed {
                            summary.corrected += 1;
                            info!(%post_id, "Corrected drifted post");
                        }
                    }
                    Err(DbError::PostNotFound(_)) => {
                        debug!(%post_id, "Post vanished during reconciliation");
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        Ok(summary)
    }
}
