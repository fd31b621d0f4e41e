//! Verification score aggregation and the automatic status policy.
//!
//! The score is a pure function of a post's ledger [`Tally`]. The database
//! stores it denormalized, but any stored value can be reproduced by counting
//! the ledgers again and calling [`ScorePolicy::assess`].

use crate::model::post::{PostModeration, PostStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ledger counts for one post.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub upvotes: u32,
    pub downvotes: u32,
    /// Reports that were not rejected, open or approved.
    pub report_count: u32,
    pub approved_report_count: u32,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(default)]
pub struct ScorePolicy {
    pub baseline: i32,
    pub weight_up: i32,
    pub weight_down: i32,
    /// Subtracted once per approved report.
    pub report_penalty: i32,
    pub floor: i32,
    pub ceiling: i32,
    /// Posts with at least this many non-rejected reports are rejected. `0` disables the rule.
    pub reject_at_report_count: u32,
    /// Posts scoring below this value are rejected.
    pub reject_below_score: Option<i32>,
    /// Pending posts scoring at least this value are approved.
    pub approve_at_score: Option<i32>,
    /// Whether the rejection rules also apply to approved posts.
    pub auto_reject_approved: bool,
}

impl Default for ScorePolicy {
    fn default() -> Self {
        Self {
            baseline: 50,
            weight_up: 1,
            weight_down: 1,
            report_penalty: 5,
            floor: 0,
            ceiling: 100,
            reject_at_report_count: 10,
            reject_below_score: None,
            approve_at_score: None,
            auto_reject_approved: false,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Error)]
pub enum InvalidScorePolicyError {
    #[error("Score floor {floor} is above the ceiling {ceiling}")]
    FloorAboveCeiling { floor: i32, ceiling: i32 },
    #[error("Baseline {0} lies outside of the score range")]
    BaselineOutOfRange(i32),
    #[error("Weights and the report penalty must not be negative")]
    NegativeWeight,
}

/// A post's recomputed score and the status the policy wants it to have.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct Assessment {
    pub tally: Tally,
    pub score: i32,
    pub previous_status: PostStatus,
    pub status: PostStatus,
}

impl Assessment {
    #[must_use]
    pub fn transitioned(&self) -> bool {
        self.previous_status != self.status
    }

    #[must_use]
    pub fn moderation(&self) -> PostModeration {
        PostModeration {
            status: self.status,
            verification_score: self.score,
            upvotes: self.tally.upvotes,
            downvotes: self.tally.downvotes,
            report_count: self.tally.report_count,
            approved_report_count: self.tally.approved_report_count,
        }
    }
}

impl ScorePolicy {
    pub fn validate(&self) -> Result<(), InvalidScorePolicyError> {
        if self.floor > self.ceiling {
            return Err(InvalidScorePolicyError::FloorAboveCeiling {
                floor: self.floor,
                ceiling: self.ceiling,
            });
        }
        if !(self.floor..=self.ceiling).contains(&self.baseline) {
            return Err(InvalidScorePolicyError::BaselineOutOfRange(self.baseline));
        }
        if self.weight_up < 0 || self.weight_down < 0 || self.report_penalty < 0 {
            return Err(InvalidScorePolicyError::NegativeWeight);
        }

        Ok(())
    }

    /// Score of a post without any votes or reports.
    #[must_use]
    pub fn initial_score(&self) -> i32 {
        self.score(Tally::default())
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn score(&self, tally: Tally) -> i32 {
        let weighted = |weight: i32, count: u32| i64::from(weight).saturating_mul(count.into());
        let raw = i64::from(self.baseline)
            .saturating_add(weighted(self.weight_up, tally.upvotes))
            .saturating_sub(weighted(self.weight_down, tally.downvotes))
            .saturating_sub(weighted(self.report_penalty, tally.approved_report_count));

        // Clamped into i32 bounds, so the cast is lossless.
        raw.clamp(self.floor.into(), self.ceiling.into()) as i32
    }

    fn breached(&self, tally: Tally, score: i32) -> bool {
        let too_many_reports =
            self.reject_at_report_count > 0 && tally.report_count >= self.reject_at_report_count;
        let score_too_low = self.reject_below_score.is_some_and(|limit| score < limit);

        too_many_reports || score_too_low
    }

    /// The status the policy moves a post to, if any.
    #[must_use]
    pub fn next_status(&self, current: PostStatus, tally: Tally, score: i32) -> Option<PostStatus> {
        match current {
            PostStatus::Rejected => None,
            PostStatus::Approved if !self.auto_reject_approved => None,
            _ if self.breached(tally, score) => Some(PostStatus::Rejected),
            PostStatus::Pending if self.approve_at_score.is_some_and(|limit| score >= limit) => {
                Some(PostStatus::Approved)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn assess(&self, current: PostStatus, tally: Tally) -> Assessment {
        let score = self.score(tally);
        let status = self.next_status(current, tally, score).unwrap_or(current);

        Assessment {
            tally,
            score,
            previous_status: current,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        model::post::PostStatus,
        score::{InvalidScorePolicyError, ScorePolicy, Tally},
    };

    #[test]
    fn fresh_post_sits_at_baseline() {
        let policy = ScorePolicy::default();
        assert_eq!(policy.initial_score(), 50);
        assert_eq!(
            policy.assess(PostStatus::Pending, Tally::default()).status,
            PostStatus::Pending
        );
    }

    #[test]
    fn three_approved_reports_cost_fifteen_points() {
        let policy = ScorePolicy::default();
        let mut status = PostStatus::Pending;
        let mut tally = Tally::default();

        for _ in 0..3 {
            tally.report_count += 1;
            tally.approved_report_count += 1;
            let assessment = policy.assess(status, tally);
            status = assessment.status;
        }

        let assessment = policy.assess(status, tally);
        assert_eq!(assessment.score, 35);
        assert_eq!(assessment.status, PostStatus::Pending);
        assert!(!assessment.transitioned());
    }

    #[test]
    fn tenth_report_rejects_the_post() {
        let policy = ScorePolicy::default();
        let mut status = PostStatus::Pending;
        let mut tally = Tally::default();

        for filed in 1..=10 {
            tally.report_count = filed;
            let assessment = policy.assess(status, tally);
            if filed < 10 {
                assert_eq!(assessment.status, PostStatus::Pending, "after {filed} reports");
            } else {
                assert!(assessment.transitioned());
                assert_eq!(assessment.status, PostStatus::Rejected);
            }
            status = assessment.status;
        }

        // Open reports alone never touch the score.
        assert_eq!(policy.score(tally), 50);
    }

    #[test]
    fn recomputing_is_idempotent() {
        let policy = ScorePolicy::default();
        let tally = Tally {
            upvotes: 7,
            downvotes: 2,
            report_count: 4,
            approved_report_count: 3,
        };

        let first = policy.assess(PostStatus::Pending, tally);
        let second = policy.assess(first.status, first.tally);
        assert_eq!(first.score, second.score);
        assert_eq!(first.moderation(), second.moderation());
        assert_eq!(first.score, 50 + 7 - 2 - 15);
    }

    #[test]
    fn score_is_clamped() {
        let policy = ScorePolicy::default();
        let popular = Tally {
            upvotes: 1000,
            ..Tally::default()
        };
        let hated = Tally {
            downvotes: u32::MAX,
            approved_report_count: u32::MAX,
            ..Tally::default()
        };

        assert_eq!(policy.score(popular), 100);
        assert_eq!(policy.score(hated), 0);
    }

    #[test]
    fn extreme_weights_saturate() {
        let policy = ScorePolicy {
            weight_up: i32::MAX,
            weight_down: i32::MAX,
            report_penalty: i32::MAX,
            floor: i32::MIN,
            ceiling: i32::MAX,
            ..ScorePolicy::default()
        };
        assert!(policy.validate().is_ok());

        let hated = Tally {
            downvotes: u32::MAX,
            approved_report_count: u32::MAX,
            ..Tally::default()
        };
        let loved = Tally {
            upvotes: u32::MAX,
            ..Tally::default()
        };

        assert_eq!(policy.score(hated), i32::MIN);
        assert_eq!(policy.score(loved), i32::MAX);
    }

    #[test]
    fn approved_posts_are_terminal_by_default() {
        let tally = Tally {
            report_count: 25,
            ..Tally::default()
        };

        let policy = ScorePolicy::default();
        assert_eq!(policy.next_status(PostStatus::Approved, tally, 50), None);
        assert_eq!(policy.next_status(PostStatus::Rejected, tally, 50), None);

        let strict = ScorePolicy {
            auto_reject_approved: true,
            ..ScorePolicy::default()
        };
        assert_eq!(
            strict.next_status(PostStatus::Approved, tally, 50),
            Some(PostStatus::Rejected)
        );
    }

    #[test]
    fn optional_score_rules() {
        let policy = ScorePolicy {
            reject_below_score: Some(20),
            approve_at_score: Some(70),
            reject_at_report_count: 0,
            ..ScorePolicy::default()
        };

        let downvoted = Tally {
            downvotes: 31,
            report_count: 100,
            ..Tally::default()
        };
        assert_eq!(
            policy.assess(PostStatus::Pending, downvoted).status,
            PostStatus::Rejected
        );

        let upvoted = Tally {
            upvotes: 20,
            ..Tally::default()
        };
        assert_eq!(
            policy.assess(PostStatus::Pending, upvoted).status,
            PostStatus::Approved
        );

        let reported_only = Tally {
            report_count: 100,
            ..Tally::default()
        };
        assert_eq!(
            policy.assess(PostStatus::Pending, reported_only).status,
            PostStatus::Pending
        );
    }

    #[test]
    fn invalid_policies() {
        let inverted = ScorePolicy {
            floor: 10,
            ceiling: 0,
            ..ScorePolicy::default()
        };
        assert_eq!(
            inverted.validate(),
            Err(InvalidScorePolicyError::FloorAboveCeiling {
                floor: 10,
                ceiling: 0
            })
        );

        let negative = ScorePolicy {
            report_penalty: -5,
            ..ScorePolicy::default()
        };
        assert_eq!(
            negative.validate(),
            Err(InvalidScorePolicyError::NegativeWeight)
        );

        assert!(ScorePolicy::default().validate().is_ok());
    }
}
