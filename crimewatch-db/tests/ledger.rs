//! Ledger transactions against a live postgres. Run with
//! `DATABASE_URL=... cargo test -p crimewatch-db -- --ignored`.

use crimewatch_common::{
    model::{
        comment::{CommentBody, CreateComment},
        moderation::{OverrideReason, StatusChangeCause, StatusOverride},
        post::{Post, PostContent, PostDescription, PostStatus, PostTitle},
        report::{CreateReport, ReportReason, ReportStatus, ReviewAction},
        user::{CreateUser, User, UserHandle},
        vote::{VoteChange, VoteTarget, VoteType},
    },
    score::ScorePolicy,
    snowflake::{ProcessId, WorkerId},
};
use crimewatch_db::{DbClient, DbError, DbErrorKind};
use sqlx::PgPool;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinSet;

fn client(pool: PgPool) -> DbClient {
    DbClient::new(
        pool,
        WorkerId::new(1).unwrap(),
        ProcessId::new(1).unwrap(),
        ScorePolicy::default(),
        Duration::from_secs(5),
    )
}

async fn user(db: &DbClient, handle: &str) -> User {
    let create = CreateUser {
        handle: UserHandle::new(handle).unwrap(),
    };
    db.register_user(&create).await.unwrap().0
}

async fn post(db: &DbClient, author: &User) -> Post {
    let content = PostContent {
        title: PostTitle::new("Bike stolen").unwrap(),
        description: PostDescription::new("Outside the station, around noon.").unwrap(),
        location: None,
    };
    db.create_post(author.id, &content).await.unwrap()
}

fn report(reason: ReportReason) -> CreateReport {
    CreateReport {
        reason,
        description: None,
    }
}

async fn vote_rows(db: &DbClient, post: &Post) -> Vec<String> {
    sqlx::query_scalar("SELECT vote_type FROM votes.post_votes WHERE post_snowflake = $1")
        .bind(post.id.as_db())
        .fetch_all(db.pool())
        .await
        .unwrap()
}

#[sqlx::test]
#[ignore = "needs a postgres DATABASE_URL"]
async fn switching_votes_keeps_one_row(pool: PgPool) {
    let db = client(pool);
    let author = user(&db, "author").await;
    let voter = user(&db, "voter").await;
    let post = post(&db, &author).await;
    let target = VoteTarget::Post(post.id);

    let up = db.cast_vote(voter.id, target, VoteType::Up).await.unwrap();
    assert_eq!(up.change, VoteChange::Inserted);
    assert_eq!((up.upvotes, up.downvotes), (1, 0));
    assert_eq!(up.verification_score, Some(51));

    let down = db.cast_vote(voter.id, target, VoteType::Down).await.unwrap();
    assert_eq!(down.change, VoteChange::Switched);
    assert_eq!((down.upvotes, down.downvotes), (0, 1));
    assert_eq!(down.verification_score, Some(49));
    assert_eq!(vote_rows(&db, &post).await, ["DOWN"]);

    let again = db.cast_vote(voter.id, target, VoteType::Down).await.unwrap();
    assert_eq!(again.change, VoteChange::Unchanged);
    assert_eq!(vote_rows(&db, &post).await, ["DOWN"]);
}

#[sqlx::test]
#[ignore = "needs a postgres DATABASE_URL"]
async fn retracting_twice_equals_once(pool: PgPool) {
    let db = client(pool);
    let author = user(&db, "author").await;
    let voter = user(&db, "voter").await;
    let post = post(&db, &author).await;
    let target = VoteTarget::Post(post.id);

    db.cast_vote(voter.id, target, VoteType::Up).await.unwrap();
    let first = db.retract_vote(voter.id, target, VoteType::Up).await.unwrap();
    let second = db.retract_vote(voter.id, target, VoteType::Up).await.unwrap();

    assert_eq!(first.change, VoteChange::Removed);
    assert_eq!(second.change, VoteChange::Unchanged);
    assert_eq!(first.upvotes, second.upvotes);
    assert_eq!(first.verification_score, second.verification_score);
    assert!(vote_rows(&db, &post).await.is_empty());
}

#[sqlx::test]
#[ignore = "needs a postgres DATABASE_URL"]
async fn comment_votes_leave_the_post_alone(pool: PgPool) {
    let db = client(pool);
    let author = user(&db, "author").await;
    let voter = user(&db, "voter").await;
    let post = post(&db, &author).await;
    let comment = db
        .create_comment(
            post.id,
            voter.id,
            &CreateComment {
                body: CommentBody::new("Saw it too").unwrap(),
            },
        )
        .await
        .unwrap();

    let outcome = db
        .cast_vote(author.id, VoteTarget::Comment(comment.id), VoteType::Up)
        .await
        .unwrap();
    assert_eq!((outcome.upvotes, outcome.downvotes), (1, 0));
    assert_eq!(outcome.verification_score, None);

    let post = db.fetch_post(post.id).await.unwrap().unwrap();
    assert_eq!(post.moderation.upvotes, 0);
    assert_eq!(post.moderation.verification_score, 50);

    assert!(db.delete_comment(comment.id).await.unwrap());
    let err = db
        .cast_vote(author.id, VoteTarget::Comment(comment.id), VoteType::Up)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), DbErrorKind::NotFound);
}

#[sqlx::test]
#[ignore = "needs a postgres DATABASE_URL"]
async fn voting_on_deleted_post_is_not_found(pool: PgPool) {
    let db = client(pool);
    let author = user(&db, "author").await;
    let post = post(&db, &author).await;
    assert!(db.delete_post(post.id).await.unwrap());

    let err = db
        .cast_vote(author.id, VoteTarget::Post(post.id), VoteType::Up)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::PostNotFound(id) if id == post.id));
}

#[sqlx::test]
#[ignore = "needs a postgres DATABASE_URL"]
async fn second_open_report_conflicts(pool: PgPool) {
    let db = client(pool);
    let author = user(&db, "author").await;
    let reporter = user(&db, "reporter").await;
    let admin = user(&db, "admin").await;
    let post = post(&db, &author).await;

    let first = db
        .file_report(reporter.id, post.id, &report(ReportReason::Spam))
        .await
        .unwrap();
    let err = db
        .file_report(reporter.id, post.id, &report(ReportReason::Other))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), DbErrorKind::Conflict);

    // Once the open report is closed, the user may report again.
    db.review_report(first.id, admin.id, ReviewAction::Reject)
        .await
        .unwrap();
    db.file_report(reporter.id, post.id, &report(ReportReason::Other))
        .await
        .unwrap();
}

#[sqlx::test]
#[ignore = "needs a postgres DATABASE_URL"]
async fn approved_reports_lower_the_score(pool: PgPool) {
    let db = client(pool);
    let author = user(&db, "author").await;
    let admin = user(&db, "admin").await;
    let post = post(&db, &author).await;

    for n in 0..3 {
        let reporter = user(&db, &format!("reporter{n}")).await;
        let filed = db
            .file_report(reporter.id, post.id, &report(ReportReason::FalseInformation))
            .await
            .unwrap();
        let outcome = db
            .review_report(filed.id, admin.id, ReviewAction::Approve)
            .await
            .unwrap();
        assert_eq!(outcome.report.status, ReportStatus::Approved);
        assert_eq!(outcome.report.reviewer_id, Some(admin.id));
    }

    let post = db.fetch_post(post.id).await.unwrap().unwrap();
    assert_eq!(post.moderation.verification_score, 35);
    assert_eq!(post.moderation.approved_report_count, 3);
    assert_eq!(post.moderation.status, PostStatus::Pending);
}

#[sqlx::test]
#[ignore = "needs a postgres DATABASE_URL"]
async fn tenth_report_rejects(pool: PgPool) {
    let db = client(pool);
    let author = user(&db, "author").await;
    let post = post(&db, &author).await;

    for n in 0..10 {
        let reporter = user(&db, &format!("reporter{n}")).await;
        db.file_report(reporter.id, post.id, &report(ReportReason::Spam))
            .await
            .unwrap();
    }

    let stored = db.fetch_post(post.id).await.unwrap().unwrap();
    assert_eq!(stored.moderation.report_count, 10);
    assert_eq!(stored.moderation.status, PostStatus::Rejected);
    assert_eq!(stored.moderation.verification_score, 50);

    let history = db.status_history(post.id).await.unwrap().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].cause, StatusChangeCause::Policy);
    assert_eq!(history[0].actor_id, None);
    assert_eq!(history[0].new_status, PostStatus::Rejected);
}

#[sqlx::test]
#[ignore = "needs a postgres DATABASE_URL"]
async fn reviewing_twice_is_not_found(pool: PgPool) {
    let db = client(pool);
    let author = user(&db, "author").await;
    let reporter = user(&db, "reporter").await;
    let admin = user(&db, "admin").await;
    let post = post(&db, &author).await;

    let filed = db
        .file_report(reporter.id, post.id, &report(ReportReason::Harassment))
        .await
        .unwrap();
    let outcome = db
        .review_report(filed.id, admin.id, ReviewAction::Reject)
        .await
        .unwrap();
    assert_eq!(outcome.post.report_count, 0);
    assert_eq!(outcome.post.verification_score, 50);

    let err = db
        .review_report(filed.id, admin.id, ReviewAction::Approve)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), DbErrorKind::NotFound);
}

#[sqlx::test]
#[ignore = "needs a postgres DATABASE_URL"]
async fn moderation_and_overrides(pool: PgPool) {
    let db = client(pool);
    let author = user(&db, "author").await;
    let admin = user(&db, "admin").await;
    let post = post(&db, &author).await;

    let rejected = db
        .moderate_post(post.id, admin.id, ReviewAction::Reject)
        .await
        .unwrap();
    assert_eq!(rejected.moderation.status, PostStatus::Rejected);

    let err = db
        .moderate_post(post.id, admin.id, ReviewAction::Approve)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), DbErrorKind::Conflict);

    let status_override = StatusOverride {
        status: PostStatus::Approved,
        reason: Some(OverrideReason::new("Confirmed by police").unwrap()),
    };
    let restored = db
        .override_post_status(post.id, admin.id, &status_override)
        .await
        .unwrap();
    assert_eq!(restored.moderation.status, PostStatus::Approved);

    // Same status again is not logged.
    db.override_post_status(post.id, admin.id, &status_override)
        .await
        .unwrap();

    let history = db.status_history(post.id).await.unwrap().unwrap();
    let causes: Vec<_> = history.iter().map(|change| change.cause).collect();
    assert_eq!(
        causes,
        [StatusChangeCause::Moderation, StatusChangeCause::Override]
    );
    assert_eq!(history[1].previous_status, PostStatus::Rejected);
    assert_eq!(history[1].actor_id, Some(admin.id));
}

#[sqlx::test]
#[ignore = "needs a postgres DATABASE_URL"]
async fn recompute_repairs_drift(pool: PgPool) {
    let db = client(pool);
    let author = user(&db, "author").await;
    let voter = user(&db, "voter").await;
    let post = post(&db, &author).await;
    db.cast_vote(voter.id, VoteTarget::Post(post.id), VoteType::Up)
        .await
        .unwrap();

    sqlx::query("UPDATE posts.posts SET verification_score = 99, upvotes = 7")
        .execute(db.pool())
        .await
        .unwrap();

    let summary = db.reconcile_all().await.unwrap();
    assert_eq!(summary.examined, 1);
    assert_eq!(summary.corrected, 1);

    let first = db.recompute_post(post.id).await.unwrap();
    let second = db.recompute_post(post.id).await.unwrap();
    assert_eq!(first.moderation, second.moderation);
    assert_eq!(first.moderation.verification_score, 51);
    assert_eq!(first.moderation.upvotes, 1);

    let summary = db.reconcile_all().await.unwrap();
    assert_eq!(summary.corrected, 0);
}

#[sqlx::test]
#[ignore = "needs a postgres DATABASE_URL"]
async fn concurrent_votes_are_not_lost(pool: PgPool) {
    const VOTERS: u32 = 20;

    let db = Arc::new(client(pool));
    let author = user(&db, "author").await;
    let post = post(&db, &author).await;
    let target = VoteTarget::Post(post.id);

    let mut voters = Vec::new();
    for n in 0..VOTERS {
        voters.push(user(&db, &format!("voter{n}")).await);
    }

    // Every voter submits the same vote twice at once.
    let mut tasks = JoinSet::new();
    for voter in voters.iter().chain(&voters) {
        let db = Arc::clone(&db);
        let voter_id = voter.id;
        tasks.spawn(async move { db.cast_vote(voter_id, target, VoteType::Up).await });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    let post = db.fetch_post(post.id).await.unwrap().unwrap();
    assert_eq!(post.moderation.upvotes, VOTERS);
    assert_eq!(post.moderation.verification_score, 50 + 20);
    assert_eq!(vote_rows(&db, &post).await.len(), 20);
}

#[sqlx::test]
#[ignore = "needs a postgres DATABASE_URL"]
async fn concurrent_duplicate_reports_conflict(pool: PgPool) {
    let db = Arc::new(client(pool));
    let author = user(&db, "author").await;
    let reporter = user(&db, "reporter").await;
    let post = post(&db, &author).await;

    let mut tasks = JoinSet::new();
    for _ in 0..5 {
        let db = Arc::clone(&db);
        let (reporter_id, post_id) = (reporter.id, post.id);
        tasks.spawn(async move {
            db.file_report(reporter_id, post_id, &report(ReportReason::Spam))
                .await
        });
    }

    let mut filed = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => filed += 1,
            Err(err) => assert_eq!(err.kind(), DbErrorKind::Conflict),
        }
    }
    assert_eq!(filed, 1);

    let post = db.fetch_post(post.id).await.unwrap().unwrap();
    assert_eq!(post.moderation.report_count, 1);
}
