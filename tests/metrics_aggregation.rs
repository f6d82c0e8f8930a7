//! Metrics aggregation verification.
//!
//! Seeds the store directly (no sync involved) and checks the summary,
//! time-series and contributor statistics against their documented
//! semantics: zero defaults on empty data, windowing against a single
//! "now" snapshot, null-handling exclusions and tie-break rules.

use chrono::{TimeZone, Utc};
use gitpulse::services::metrics::{
    self, CONTRIBUTION_PR_WEIGHT, CONTRIBUTION_REVIEW_WEIGHT, UNCATEGORIZED,
};
use tempfile::tempdir;

const HOUR: i64 = 3_600;
const DAY: i64 = 86_400;

async fn test_pool() -> (sqlx::SqlitePool, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let pool = gitpulse::db::initialize(&dir.path().join("metrics.db"))
        .await
        .unwrap();
    (pool, dir)
}

/// Fixed anchor: 2026-03-10 12:00:00 UTC.
fn anchor() -> i64 {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0)
        .unwrap()
        .timestamp()
}

async fn seed_org(pool: &sqlx::SqlitePool) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO organizations (external_id, login, name) VALUES (1, 'acme', 'Acme') RETURNING id",
    )
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn seed_repo(
    pool: &sqlx::SqlitePool,
    org_id: i64,
    external_id: i64,
    full_name: &str,
    tracked: bool,
) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO repositories (external_id, organization_id, name, full_name, is_tracked)
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(external_id)
    .bind(org_id)
    .bind(full_name.split('/').nth(1).unwrap())
    .bind(full_name)
    .bind(tracked)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[allow(clippy::too_many_arguments)]
async fn seed_pr(
    pool: &sqlx::SqlitePool,
    repo_id: i64,
    external_id: i64,
    number: i64,
    state: &str,
    created_at: Option<i64>,
    merged_at: Option<i64>,
    size: (i64, i64),
) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO pull_requests (
            external_id, repository_id, number, title, state,
            created_at, updated_at, closed_at, merged_at, additions, deletions
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(external_id)
    .bind(repo_id)
    .bind(number)
    .bind(format!("PR {}", number))
    .bind(state)
    .bind(created_at)
    .bind(created_at)
    .bind(merged_at)
    .bind(merged_at)
    .bind(size.0)
    .bind(size.1)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn seed_review(
    pool: &sqlx::SqlitePool,
    pr_id: i64,
    external_id: i64,
    reviewer_id: Option<i64>,
    submitted_at: i64,
) {
    sqlx::query(
        "INSERT INTO reviews (external_id, pull_request_id, reviewer_id, state, submitted_at)
         VALUES (?, ?, ?, 'approved', ?)",
    )
    .bind(external_id)
    .bind(pr_id)
    .bind(reviewer_id)
    .bind(submitted_at)
    .execute(pool)
    .await
    .unwrap();
}

async fn seed_user(pool: &sqlx::SqlitePool, id: i64, name: &str) {
    sqlx::query("INSERT INTO users (id, name) VALUES (?, ?)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn empty_organization_returns_zero_defaults() {
    let (pool, _dir) = test_pool().await;
    let org_id = seed_org(&pool).await;

    let summary = metrics::summary_at(&pool, org_id, 30, anchor()).await.unwrap();

    assert_eq!(summary.total_prs, 0);
    assert_eq!(summary.recent_prs, 0);
    assert_eq!(summary.merged_prs, 0);
    assert_eq!(summary.open_pr_count, 0);
    assert_eq!(summary.merge_rate, 0.0);
    assert_eq!(summary.categorization_rate, 0.0);
    assert_eq!(summary.weekly_pr_volume_change, 0.0);
    assert_eq!(summary.avg_cycle_time_hours, 0.0);
    assert_eq!(summary.avg_review_time_hours, 0.0);
    assert_eq!(summary.avg_pr_size, 0);
}

#[tokio::test]
async fn tracking_gates_sync_but_not_metrics() {
    let (pool, _dir) = test_pool().await;
    let now = anchor();
    let org_id = seed_org(&pool).await;
    let repo_a = seed_repo(&pool, org_id, 10, "acme/tracked", true).await;
    let repo_b = seed_repo(&pool, org_id, 11, "acme/untracked", false).await;

    for i in 0..10 {
        seed_pr(
            &pool,
            repo_a,
            100 + i,
            i + 1,
            "merged",
            Some(now - 5 * DAY),
            Some(now - 4 * DAY),
            (10, 5),
        )
        .await;
    }
    for i in 0..5 {
        seed_pr(
            &pool,
            repo_b,
            200 + i,
            i + 1,
            "merged",
            Some(now - 5 * DAY),
            Some(now - 4 * DAY),
            (10, 5),
        )
        .await;
    }

    let summary = metrics::summary_at(&pool, org_id, 30, now).await.unwrap();

    // Tracking gates ingestion, never aggregation
    assert_eq!(summary.total_prs, 15);
    assert_eq!(summary.merged_prs, 15);
    assert_eq!(summary.recent_prs, 15);
    assert_eq!(summary.recent_merged, 15);
    assert_eq!(summary.merge_rate, 100.0);
    assert_eq!(summary.tracked_repositories, 1);
    assert_eq!(summary.avg_pr_size, 15);
}

#[tokio::test]
async fn cycle_and_review_time_follow_first_review_policy() {
    let (pool, _dir) = test_pool().await;
    let now = anchor();
    let org_id = seed_org(&pool).await;
    let repo = seed_repo(&pool, org_id, 10, "acme/widgets", true).await;

    // Created at T, merged at T+5h, first review at T+2h
    let t = now - 2 * DAY;
    let pr = seed_pr(&pool, repo, 100, 1, "merged", Some(t), Some(t + 5 * HOUR), (0, 0)).await;
    // A later review must not displace the earliest one
    seed_review(&pool, pr, 7000, None, t + 2 * HOUR).await;
    seed_review(&pool, pr, 7001, None, t + 4 * HOUR).await;

    let summary = metrics::summary_at(&pool, org_id, 30, now).await.unwrap();
    assert_eq!(summary.avg_cycle_time_hours, 5.0);
    assert_eq!(summary.avg_review_time_hours, 2.0);

    // A merged PR with zero reviews joins the cycle average but is
    // excluded from the review average (not treated as zero)
    seed_pr(&pool, repo, 101, 2, "merged", Some(t), Some(t + 3 * HOUR), (0, 0)).await;

    let summary = metrics::summary_at(&pool, org_id, 30, now).await.unwrap();
    assert_eq!(summary.avg_cycle_time_hours, 4.0);
    assert_eq!(summary.avg_review_time_hours, 2.0);
}

#[tokio::test]
async fn null_created_at_excluded_from_cycle_but_counted_as_merged() {
    let (pool, _dir) = test_pool().await;
    let now = anchor();
    let org_id = seed_org(&pool).await;
    let repo = seed_repo(&pool, org_id, 10, "acme/widgets", true).await;

    let t = now - 2 * DAY;
    seed_pr(&pool, repo, 100, 1, "merged", Some(t), Some(t + 6 * HOUR), (0, 0)).await;
    // Timestamp lost upstream: excluded from the average, still merged
    seed_pr(&pool, repo, 101, 2, "merged", None, Some(t + HOUR), (0, 0)).await;

    let summary = metrics::summary_at(&pool, org_id, 30, now).await.unwrap();
    assert_eq!(summary.merged_prs, 2);
    assert_eq!(summary.avg_cycle_time_hours, 6.0);
}

#[tokio::test]
async fn weekly_volume_change_with_zero_floor() {
    let (pool, _dir) = test_pool().await;
    let now = anchor();
    let org_id = seed_org(&pool).await;
    let repo = seed_repo(&pool, org_id, 10, "acme/widgets", true).await;

    // Three merged this week, two the week before
    for i in 0..3 {
        seed_pr(
            &pool,
            repo,
            100 + i,
            i + 1,
            "merged",
            Some(now - 20 * DAY),
            Some(now - (i + 1) * DAY),
            (0, 0),
        )
        .await;
    }
    for i in 0..2 {
        seed_pr(
            &pool,
            repo,
            200 + i,
            10 + i,
            "merged",
            Some(now - 20 * DAY),
            Some(now - (8 + i) * DAY),
            (0, 0),
        )
        .await;
    }

    let summary = metrics::summary_at(&pool, org_id, 30, now).await.unwrap();
    assert_eq!(summary.this_week_merged, 3);
    assert_eq!(summary.last_week_merged, 2);
    assert_eq!(summary.weekly_pr_volume_change, 50.0);

    // An organization with no merges last week reports 0, not an error
    let org2 = seed_org_with(&pool, 2, "globex").await;
    let repo2 = seed_repo(&pool, org2, 20, "globex/core", true).await;
    seed_pr(
        &pool,
        repo2,
        300,
        1,
        "merged",
        Some(now - 20 * DAY),
        Some(now - DAY),
        (0, 0),
    )
    .await;

    let summary = metrics::summary_at(&pool, org2, 30, now).await.unwrap();
    assert_eq!(summary.this_week_merged, 1);
    assert_eq!(summary.last_week_merged, 0);
    assert_eq!(summary.weekly_pr_volume_change, 0.0);
}

async fn seed_org_with(pool: &sqlx::SqlitePool, external_id: i64, login: &str) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO organizations (external_id, login, name) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(external_id)
    .bind(login)
    .bind(login)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn categorization_rate_over_window_population() {
    let (pool, _dir) = test_pool().await;
    let now = anchor();
    let org_id = seed_org(&pool).await;
    let repo = seed_repo(&pool, org_id, 10, "acme/widgets", true).await;

    let category_id: i64 =
        sqlx::query_scalar("INSERT INTO categories (name, is_default) VALUES ('Feature', 1) RETURNING id")
            .fetch_one(&pool)
            .await
            .unwrap();

    for i in 0..4 {
        let pr = seed_pr(
            &pool,
            repo,
            100 + i,
            i + 1,
            "open",
            Some(now - 3 * DAY),
            None,
            (0, 0),
        )
        .await;
        if i < 3 {
            sqlx::query("UPDATE pull_requests SET category_id = ? WHERE id = ?")
                .bind(category_id)
                .bind(pr)
                .execute(&pool)
                .await
                .unwrap();
        }
    }
    // Outside the window: must not count either way
    seed_pr(&pool, repo, 900, 99, "open", Some(now - 90 * DAY), None, (0, 0)).await;

    let summary = metrics::summary_at(&pool, org_id, 30, now).await.unwrap();
    assert_eq!(summary.recent_prs, 4);
    assert_eq!(summary.categorization_rate, 75.0);
    assert_eq!(summary.open_pr_count, 5);
}

#[tokio::test]
async fn time_series_always_has_contiguous_days() {
    let (pool, _dir) = test_pool().await;
    let now = anchor();
    let org_id = seed_org(&pool).await;
    let repo = seed_repo(&pool, org_id, 10, "acme/widgets", true).await;

    // Activity on two of the seven days only
    seed_pr(&pool, repo, 100, 1, "open", Some(now - 2 * DAY), None, (0, 0)).await;
    seed_pr(&pool, repo, 101, 2, "open", Some(now - 2 * DAY), None, (0, 0)).await;
    seed_pr(&pool, repo, 102, 3, "open", Some(now - 5 * DAY), None, (0, 0)).await;

    let series = metrics::time_series_at(&pool, org_id, 7, None, now).await.unwrap();

    assert_eq!(series.len(), 7);

    // Strictly increasing consecutive dates ending today
    for pair in series.windows(2) {
        let a = pair[0].date.parse::<chrono::NaiveDate>().unwrap();
        let b = pair[1].date.parse::<chrono::NaiveDate>().unwrap();
        assert_eq!(b, a + chrono::Duration::days(1));
    }
    assert_eq!(series.last().unwrap().date, "2026-03-10");

    let totals: Vec<i64> = series.iter().map(|p| p.total).collect();
    assert_eq!(totals, vec![0, 1, 0, 0, 2, 0, 0]);

    // Zero-activity days still carry the full category key set at 0
    let empty_day = &series[0];
    assert!(!empty_day.categories.is_empty());
    assert!(empty_day.categories.values().all(|&count| count == 0));
    assert!(empty_day.categories.contains_key(UNCATEGORIZED));
}

#[tokio::test]
async fn time_series_buckets_by_normalized_category() {
    let (pool, _dir) = test_pool().await;
    let now = anchor();
    let org_id = seed_org(&pool).await;
    let repo = seed_repo(&pool, org_id, 10, "acme/widgets", true).await;

    // Two categories whose display names differ only in spacing
    let cat_a: i64 = sqlx::query_scalar(
        "INSERT INTO categories (name, is_default) VALUES ('Bug Fix', 1) RETURNING id",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    let cat_b: i64 = sqlx::query_scalar(
        "INSERT INTO categories (organization_id, name, is_default) VALUES (?, 'Bug  Fix', 0) RETURNING id",
    )
    .bind(org_id)
    .fetch_one(&pool)
    .await
    .unwrap();

    let pr1 = seed_pr(&pool, repo, 100, 1, "open", Some(now - DAY), None, (0, 0)).await;
    let pr2 = seed_pr(&pool, repo, 101, 2, "open", Some(now - DAY), None, (0, 0)).await;
    seed_pr(&pool, repo, 102, 3, "open", Some(now - DAY), None, (0, 0)).await;

    sqlx::query("UPDATE pull_requests SET category_id = ? WHERE id = ?")
        .bind(cat_a)
        .bind(pr1)
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("UPDATE pull_requests SET category_id = ? WHERE id = ?")
        .bind(cat_b)
        .bind(pr2)
        .execute(&pool)
        .await
        .unwrap();

    let series = metrics::time_series_at(&pool, org_id, 3, None, now).await.unwrap();
    let yesterday = &series[1];

    // Same stable key despite the variable spacing
    assert_eq!(yesterday.categories.get("Bug Fix"), Some(&2));
    assert_eq!(yesterday.categories.get(UNCATEGORIZED), Some(&1));
    assert_eq!(yesterday.total, 3);
}

#[tokio::test]
async fn time_series_repository_filter() {
    let (pool, _dir) = test_pool().await;
    let now = anchor();
    let org_id = seed_org(&pool).await;
    let repo_a = seed_repo(&pool, org_id, 10, "acme/a", true).await;
    let repo_b = seed_repo(&pool, org_id, 11, "acme/b", true).await;

    seed_pr(&pool, repo_a, 100, 1, "open", Some(now - DAY), None, (0, 0)).await;
    seed_pr(&pool, repo_b, 200, 1, "open", Some(now - DAY), None, (0, 0)).await;

    let all = metrics::time_series_at(&pool, org_id, 3, None, now).await.unwrap();
    assert_eq!(all.iter().map(|p| p.total).sum::<i64>(), 2);

    let only_a = metrics::time_series_at(&pool, org_id, 3, Some(repo_a), now)
        .await
        .unwrap();
    assert_eq!(only_a.iter().map(|p| p.total).sum::<i64>(), 1);
}

#[tokio::test]
async fn contributors_ranked_by_weighted_score() {
    let (pool, _dir) = test_pool().await;
    let now = anchor();
    let org_id = seed_org(&pool).await;
    let repo = seed_repo(&pool, org_id, 10, "acme/widgets", true).await;

    seed_user(&pool, 1, "alice").await;
    seed_user(&pool, 2, "bob").await;
    seed_user(&pool, 3, "carol").await;

    let t = now - 5 * DAY;

    // alice: 3 PRs (one merged after 4h), 1 review
    let mut alice_prs = Vec::new();
    for i in 0..3 {
        let merged = i == 0;
        let pr = seed_pr(
            &pool,
            repo,
            100 + i,
            i + 1,
            if merged { "merged" } else { "open" },
            Some(t),
            merged.then_some(t + 4 * HOUR),
            (30, 10),
        )
        .await;
        sqlx::query("UPDATE pull_requests SET author_id = 1 WHERE id = ?")
            .bind(pr)
            .execute(&pool)
            .await
            .unwrap();
        alice_prs.push(pr);
    }
    // bob: 1 PR, 4 reviews
    let bob_pr = seed_pr(&pool, repo, 200, 10, "open", Some(t), None, (100, 20)).await;
    sqlx::query("UPDATE pull_requests SET author_id = 2 WHERE id = ?")
        .bind(bob_pr)
        .execute(&pool)
        .await
        .unwrap();
    for i in 0..4i64 {
        seed_review(&pool, alice_prs[(i % 3) as usize], 7000 + i, Some(2), t + HOUR).await;
    }
    // alice reviews bob once; carol only reviews
    seed_review(&pool, bob_pr, 8000, Some(1), t + 2 * HOUR).await;
    seed_review(&pool, bob_pr, 8001, Some(3), t + 3 * HOUR).await;
    seed_review(&pool, bob_pr, 8002, Some(3), t + 4 * HOUR).await;

    let contributors = metrics::contributor_stats_at(&pool, org_id, 30, 10, now)
        .await
        .unwrap();

    assert_eq!(contributors.len(), 3);
    // alice: 3*10 + 1*4 = 34; bob: 1*10 + 4*4 = 26; carol: 2*4 = 8
    assert_eq!(contributors[0].user_id, 1);
    assert_eq!(
        contributors[0].contribution_score,
        3.0 * CONTRIBUTION_PR_WEIGHT + CONTRIBUTION_REVIEW_WEIGHT
    );
    assert_eq!(contributors[1].user_id, 2);
    assert_eq!(contributors[2].user_id, 3);

    // Review thoroughness: reviews / PRs created
    assert_eq!(contributors[0].review_thoroughness, 33.3);
    assert_eq!(contributors[1].review_thoroughness, 400.0);
    // carol created nothing: zero floor, not a division error
    assert_eq!(contributors[2].review_thoroughness, 0.0);
    assert_eq!(contributors[2].prs_created, 0);
    assert_eq!(contributors[2].reviews_given, 2);

    // alice's cycle time over her single merged PR
    assert_eq!(contributors[0].avg_cycle_time_hours, 4.0);
    assert_eq!(contributors[0].avg_pr_size, 40);

    // Top-N truncation keeps the ranking prefix
    let top_two = metrics::contributor_stats_at(&pool, org_id, 30, 2, now)
        .await
        .unwrap();
    assert_eq!(top_two.len(), 2);
    assert_eq!(top_two[0].user_id, 1);
    assert_eq!(top_two[1].user_id, 2);
}
