use crate::{
    model::{
        Id,
        post::{PostMarker, PostModeration, PostStatus},
        user::UserMarker,
    },
    util::BoundedString,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub type ReportDescription = BoundedString<1, 1000>;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct ReportMarker;

text_enum! {
    pub enum ReportReason {
        Spam => "SPAM",
        FalseInformation => "FALSE_INFORMATION",
        InappropriateContent => "INAPPROPRIATE_CONTENT",
        Harassment => "HARASSMENT",
        Duplicate => "DUPLICATE",
        Other => "OTHER",
    }
}

text_enum! {
    /// Lifecycle of an abuse report. Only `Pending` reports are open.
    pub enum ReportStatus {
        Pending => "PENDING",
        Approved => "APPROVED",
        Rejected => "REJECTED",
    }
}

text_enum! {
    pub enum ReviewAction {
        Approve => "APPROVE",
        Reject => "REJECT",
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
#[error("Report was already reviewed as {0}")]
pub struct ReportNotPendingError(pub ReportStatus);

impl ReportStatus {
    /// Finalizes an open report. A report can be reviewed exactly once, so
    /// the penalty of an approval is never applied twice.
    pub fn review(self, action: ReviewAction) -> Result<ReportStatus, ReportNotPendingError> {
        match self {
            ReportStatus::Pending => Ok(match action {
                ReviewAction::Approve => ReportStatus::Approved,
                ReviewAction::Reject => ReportStatus::Rejected,
            }),
            status => Err(ReportNotPendingError(status)),
        }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: Id<ReportMarker>,
    pub post_id: Id<PostMarker>,
    pub user_id: Id<UserMarker>,
    pub reason: ReportReason,
    pub description: Option<ReportDescription>,
    pub status: ReportStatus,
    pub reviewer_id: Option<Id<UserMarker>>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub reviewed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct CreateReport {
    pub reason: ReportReason,
    #[serde(default)]
    pub description: Option<ReportDescription>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct ReviewReport {
    pub action: ReviewAction,
}

/// The reviewed report together with the post state the review produced.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub report: Report,
    pub post: PostModeration,
    pub previous_post_status: PostStatus,
}

#[cfg(test)]
mod tests {
    use crate::model::report::{
        CreateReport, ReportNotPendingError, ReportReason, ReportStatus, ReviewAction,
    };

    #[test]
    fn review_requires_pending() {
        assert_eq!(
            ReportStatus::Pending.review(ReviewAction::Approve),
            Ok(ReportStatus::Approved)
        );
        assert_eq!(
            ReportStatus::Pending.review(ReviewAction::Reject),
            Ok(ReportStatus::Rejected)
        );
        assert_eq!(
            ReportStatus::Rejected.review(ReviewAction::Reject),
            Err(ReportNotPendingError(ReportStatus::Rejected))
        );
        assert_eq!(
            ReportStatus::Approved.review(ReviewAction::Approve),
            Err(ReportNotPendingError(ReportStatus::Approved))
        );
    }

    #[test]
    fn create_report_body() {
        let report: CreateReport =
            serde_json::from_str(r#"{"reason": "FALSE_INFORMATION"}"#).unwrap();
        assert_eq!(report.reason, ReportReason::FalseInformation);
        assert_eq!(report.description, None);

        assert!(serde_json::from_str::<CreateReport>(r#"{"reason": "boring"}"#).is_err());

        let too_long = format!(
            r#"{{"reason": "OTHER", "description": "{}"}}"#,
            "x".repeat(1001)
        );
        assert!(serde_json::from_str::<CreateReport>(&too_long).is_err());
    }
}
