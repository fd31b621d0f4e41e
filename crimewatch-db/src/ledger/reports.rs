use crate::{
    client::{DbClient, DbError, IdGenerator, Result},
    ledger::{lock_post, settle},
    record::ReportRecord,
};
use crimewatch_common::{
    model::{
        Id,
        post::PostMarker,
        report::{
            CreateReport, Report, ReportMarker, ReportStatus, ReviewAction, ReviewOutcome,
        },
        user::UserMarker,
    },
    score::ScorePolicy,
};
use sqlx::{PgConnection, query_as, query_scalar};
use tracing::info;

async fn file_report_in(
    conn: &mut PgConnection,
    ids: &IdGenerator,
    policy: &ScorePolicy,
    user_id: Id<UserMarker>,
    post_id: Id<PostMarker>,
    report: &CreateReport,
) -> Result<Report> {
    let post = lock_post(conn, post_id).await?;

    let has_open_report = query_scalar::<_, bool>(
        "
        SELECT EXISTS (
            SELECT 1
            FROM moderation.reports
            WHERE user_snowflake = $1 AND post_snowflake = $2 AND status = 'PENDING'
        )
        ",
    )
    .bind(user_id.as_db())
    .bind(post_id.as_db())
    .fetch_one(&mut *conn)
    .await?;

    if has_open_report {
        return Err(DbError::DuplicateOpenReport {
            user: user_id,
            post: post_id,
        });
    }

    let report_id: Id<ReportMarker> = ids.next()?;
    let record = query_as::<_, ReportRecord>(
        "
        INSERT INTO moderation.reports
            (report_snowflake, post_snowflake, user_snowflake, reason, description, status)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING
            report_snowflake,
            post_snowflake,
            user_snowflake,
            reason,
            description,
            status,
            reviewer_snowflake,
            reviewed_at,
            created_at
        ",
    )
    .bind(report_id.as_db())
    .bind(post_id.as_db())
    .bind(user_id.as_db())
    .bind(report.reason.as_str())
    .bind(report.description.as_ref().map(|description| description.get()))
    .bind(ReportStatus::Pending.as_str())
    .fetch_one(&mut *conn)
    .await?;

    settle(conn, ids, policy, &post).await?;
    info!(%report_id, %post_id, %user_id, reason = %report.reason, "Filed report");

    Ok(record.try_into()?)
}

async fn review_report_in(
    conn: &mut PgConnection,
    ids: &IdGenerator,
    policy: &ScorePolicy,
    report_id: Id<ReportMarker>,
    reviewer_id: Id<UserMarker>,
    action: ReviewAction,
) -> Result<ReviewOutcome> {
    let post_id = query_scalar::<_, i64>(
        "SELECT post_snowflake FROM moderation.reports WHERE report_snowflake = $1",
    )
    .bind(report_id.as_db())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(DbError::ReportNotFound(report_id))?;

    let post = lock_post(conn, Id::from_db(post_id)).await?;

    let status = query_scalar::<_, String>(
        "SELECT status FROM moderation.reports WHERE report_snowflake = $1 FOR UPDATE",
    )
    .bind(report_id.as_db())
    .fetch_one(&mut *conn)
    .await?
    .parse::<ReportStatus>()
    .map_err(|err| DbError::Data(err.into()))?;

    let reviewed = status
        .review(action)
        .map_err(|err| DbError::ReportNotPending(report_id, err))?;

    let record = query_as::<_, ReportRecord>(
        "
        UPDATE moderation.reports
        SET
            status = $2,
            reviewer_snowflake = $3,
            reviewed_at = now()
        WHERE
            report_snowflake = $1
        RETURNING
            report_snowflake,
            post_snowflake,
            user_snowflake,
            reason,
            description,
            status,
            reviewer_snowflake,
            reviewed_at,
            created_at
        ",
    )
    .bind(report_id.as_db())
    .bind(reviewed.as_str())
    .bind(reviewer_id.as_db())
    .fetch_one(&mut *conn)
    .await?;

    let assessment = settle(conn, ids, policy, &post).await?;
    info!(
        %report_id,
        post_id = %post.id,
        %reviewer_id,
        status = %reviewed,
        score = assessment.score,
        "Reviewed report"
    );

    Ok(ReviewOutcome {
        report: record.try_into()?,
        post: assessment.moderation(),
        previous_post_status: assessment.previous_status,
    })
}

impl DbClient {
    /// Files a report against a post. A user may hold only one open report per post.
    pub async fn file_report(
        &self,
        user_id: Id<UserMarker>,
        post_id: Id<PostMarker>,
        report: &CreateReport,
    ) -> Result<Report> {
        self.transact("file_report", move || async move {
            let mut tx = self.begin().await?;
            let report =
                file_report_in(&mut *tx, &self.ids, &self.policy, user_id, post_id, report).await?;
            tx.commit().await?;

            Ok(report)
        })
        .await
    }

    /// Finalizes an open report and lets the policy react to the new tally.
    pub async fn review_report(
        &self,
        report_id: Id<ReportMarker>,
        reviewer_id: Id<UserMarker>,
        action: ReviewAction,
    ) -> Result<ReviewOutcome> {
        self.transact("review_report", move || async move {
            let mut tx = self.begin().await?;
            let outcome = review_report_in(
                &mut *tx,
                &self.ids,
                &self.policy,
                report_id,
                reviewer_id,
                action,
            )
            .await?;
            tx.commit().await?;

            Ok(outcome)
        })
        .await
    }

    pub async fn fetch_report(&self, report_id: Id<ReportMarker>) -> Result<Option<Report>> {
        let record = query_as::<_, ReportRecord>(
            "
            SELECT
                report_snowflake,
                post_snowflake,
                user_snowflake,
                reason,
                description,
                status,
                reviewer_snowflake,
                reviewed_at,
                created_at
            FROM
                moderation.reports
            WHERE
                report_snowflake = $1
            ",
        )
        .bind(report_id.as_db())
        .fetch_optional(self.pool())
        .await?;

        let report = record.map(Report::try_from).transpose()?;
        Ok(report)
    }

    /// Lists reports newest first, optionally only those with `status`.
    pub async fn list_reports(&self, status: Option<ReportStatus>) -> Result<Vec<Report>> {
        let records = query_as::<_, ReportRecord>(
            "
            SELECT
                report_snowflake,
                post_snowflake,
                user_snowflake,
                reason,
                description,
                status,
                reviewer_snowflake,
                reviewed_at,
                created_at
            FROM
                moderation.reports
            WHERE
                $1::TEXT IS NULL OR status = $1
            ORDER BY
                created_at DESC, report_snowflake DESC
            ",
        )
        .bind(status.map(ReportStatus::as_str))
        .fetch_all(self.pool())
        .await?;

        let reports = records
            .into_iter()
            .map(Report::try_from)
            .collect::<Result<_, _>>()?;
        Ok(reports)
    }
}
