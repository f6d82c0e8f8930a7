//! Metrics aggregation engine.
//!
//! Computes engineering-performance statistics for one organization by
//! reading the normalized store; no remote calls. Every aggregation over
//! an empty result set returns the documented zero defaults, never null
//! and never an error. Store failures do propagate: a summary built on a
//! failed read would be misleading.

use crate::db::pool::DbPool;
use crate::error::AppError;
use chrono::{Duration, TimeZone, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Default summary window in days.
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

/// Weight of an authored pull request in the contribution score.
pub const CONTRIBUTION_PR_WEIGHT: f64 = 10.0;

/// Weight of a given review in the contribution score.
pub const CONTRIBUTION_REVIEW_WEIGHT: f64 = 4.0;

const SECS_PER_DAY: i64 = 86_400;
const SECS_PER_HOUR: f64 = 3_600.0;

/// Summary statistics for one organization over one time window.
///
/// Percentages carry one decimal place; hour averages likewise.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    /// Window width in days the recent counters are computed over.
    pub window_days: i64,

    /// Pull requests ever created in the organization's repositories.
    pub total_prs: i64,

    /// Pull requests created within the window.
    pub recent_prs: i64,

    /// Merged pull requests, all time.
    pub merged_prs: i64,

    /// Pull requests created within the window that are merged.
    pub recent_merged: i64,

    /// Merged in [now - 7d, now).
    pub this_week_merged: i64,

    /// Merged in [now - 14d, now - 7d).
    pub last_week_merged: i64,

    /// Week-over-week merge volume change, percent. 0 when last week had
    /// no merges.
    pub weekly_pr_volume_change: f64,

    /// Mean hours from creation to merge, over pull requests merged
    /// within the window with both timestamps present.
    pub avg_cycle_time_hours: f64,

    /// Mean hours from creation to first review, over the same merged
    /// population; pull requests with zero reviews are excluded.
    pub avg_review_time_hours: f64,

    /// Mean of additions + deletions over pull requests created within
    /// the window, rounded to the nearest integer.
    pub avg_pr_size: i64,

    /// Share of window pull requests that carry a category, percent.
    pub categorization_rate: f64,

    /// Currently open pull requests (point-in-time, not windowed).
    pub open_pr_count: i64,

    /// Repositories with tracking enabled.
    pub tracked_repositories: i64,

    /// recent_merged / recent_prs, percent. 0 when the window is empty.
    pub merge_rate: f64,
}

/// One calendar day of the category time series.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesPoint {
    /// Calendar day, `YYYY-MM-DD` (UTC).
    pub date: String,

    /// Pull requests created that day.
    pub total: i64,

    /// Per-category counts; every point carries the full key set.
    pub categories: BTreeMap<String, i64>,
}

/// Per-contributor statistics over one time window.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributorStats {
    /// User id (source identifier space).
    pub user_id: i64,

    /// Display name, when known.
    pub name: Option<String>,

    /// Avatar URL, when known.
    pub avatar_url: Option<String>,

    /// Pull requests created within the window.
    pub prs_created: i64,

    /// Reviews submitted within the window.
    pub reviews_given: i64,

    /// Mean hours from creation to merge over this contributor's merged
    /// pull requests; 0 when none merged.
    pub avg_cycle_time_hours: f64,

    /// Mean of additions + deletions over this contributor's pull
    /// requests, rounded to the nearest integer.
    pub avg_pr_size: i64,

    /// reviews_given / prs_created, percent. 0 when no pull requests
    /// were created.
    pub review_thoroughness: f64,

    /// Ranking score; authored pull requests weigh more than reviews.
    pub contribution_score: f64,
}

/// Round to one decimal place.
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Percentage with a zero floor for an empty denominator.
fn percentage(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    round1(numerator as f64 / denominator as f64 * 100.0)
}

/// Compute the summary for an organization. Uses the current time as the
/// window anchor.
pub async fn summary(
    pool: &DbPool,
    organization_id: i64,
    window_days: i64,
) -> Result<MetricsSummary, AppError> {
    summary_at(pool, organization_id, window_days, Utc::now().timestamp()).await
}

/// Compute the summary against an explicit `now` snapshot (Unix seconds).
///
/// All windowed counters are evaluated against this single snapshot so
/// sub-metrics cannot disagree about what "recent" means.
pub async fn summary_at(
    pool: &DbPool,
    organization_id: i64,
    window_days: i64,
    now: i64,
) -> Result<MetricsSummary, AppError> {
    let window_days = window_days.max(1);
    let window_start = now - window_days * SECS_PER_DAY;
    let week_start = now - 7 * SECS_PER_DAY;
    let two_weeks_start = now - 14 * SECS_PER_DAY;

    // One pass over pull_requests for every counter
    let counts: (i64, i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(*),
            COALESCE(SUM(CASE WHEN pr.created_at >= ? THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN pr.state = 'merged' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN pr.state = 'merged' AND pr.created_at >= ? THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN pr.state = 'merged' AND pr.merged_at >= ? THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN pr.state = 'merged' AND pr.merged_at >= ? AND pr.merged_at < ? THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN pr.state = 'open' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN pr.created_at >= ? AND pr.category_id IS NOT NULL THEN 1 ELSE 0 END), 0)
        FROM pull_requests pr
        JOIN repositories r ON r.id = pr.repository_id
        WHERE r.organization_id = ?
        "#,
    )
    .bind(window_start)
    .bind(window_start)
    .bind(week_start)
    .bind(two_weeks_start)
    .bind(week_start)
    .bind(window_start)
    .bind(organization_id)
    .fetch_one(pool)
    .await?;

    let (
        total_prs,
        recent_prs,
        merged_prs,
        recent_merged,
        this_week_merged,
        last_week_merged,
        open_pr_count,
        categorized_recent,
    ) = counts;

    // Cycle time over pull requests merged within the window; rows with
    // a missing timestamp are excluded, not treated as zero.
    let avg_cycle: (Option<f64>,) = sqlx::query_as(
        r#"
        SELECT AVG((pr.merged_at - pr.created_at) / ?)
        FROM pull_requests pr
        JOIN repositories r ON r.id = pr.repository_id
        WHERE r.organization_id = ?
          AND pr.state = 'merged'
          AND pr.merged_at IS NOT NULL
          AND pr.merged_at >= ?
          AND pr.created_at IS NOT NULL
        "#,
    )
    .bind(SECS_PER_HOUR)
    .bind(organization_id)
    .bind(window_start)
    .fetch_one(pool)
    .await?;

    // First-review latency over the same merged population. "First
    // review" is the earliest submission for the pull request; rows with
    // zero reviews drop out of the average entirely.
    let avg_review: (Option<f64>,) = sqlx::query_as(
        r#"
        SELECT AVG(
            ((SELECT MIN(rv.submitted_at) FROM reviews rv
              WHERE rv.pull_request_id = pr.id AND rv.submitted_at IS NOT NULL)
             - pr.created_at) / ?
        )
        FROM pull_requests pr
        JOIN repositories r ON r.id = pr.repository_id
        WHERE r.organization_id = ?
          AND pr.state = 'merged'
          AND pr.merged_at IS NOT NULL
          AND pr.merged_at >= ?
          AND pr.created_at IS NOT NULL
          AND EXISTS (SELECT 1 FROM reviews rv
                      WHERE rv.pull_request_id = pr.id AND rv.submitted_at IS NOT NULL)
        "#,
    )
    .bind(SECS_PER_HOUR)
    .bind(organization_id)
    .bind(window_start)
    .fetch_one(pool)
    .await?;

    let avg_size: (Option<f64>,) = sqlx::query_as(
        r#"
        SELECT AVG(COALESCE(pr.additions, 0) + COALESCE(pr.deletions, 0))
        FROM pull_requests pr
        JOIN repositories r ON r.id = pr.repository_id
        WHERE r.organization_id = ? AND pr.created_at >= ?
        "#,
    )
    .bind(organization_id)
    .bind(window_start)
    .fetch_one(pool)
    .await?;

    let tracked: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM repositories WHERE organization_id = ? AND is_tracked = 1",
    )
    .bind(organization_id)
    .fetch_one(pool)
    .await?;

    let weekly_pr_volume_change = if last_week_merged == 0 {
        0.0
    } else {
        round1(
            (this_week_merged - last_week_merged) as f64 / last_week_merged as f64 * 100.0,
        )
    };

    Ok(MetricsSummary {
        window_days,
        total_prs,
        recent_prs,
        merged_prs,
        recent_merged,
        this_week_merged,
        last_week_merged,
        weekly_pr_volume_change,
        avg_cycle_time_hours: round1(avg_cycle.0.unwrap_or(0.0)),
        avg_review_time_hours: round1(avg_review.0.unwrap_or(0.0)),
        avg_pr_size: avg_size.0.unwrap_or(0.0).round() as i64,
        categorization_rate: percentage(categorized_recent, recent_prs),
        open_pr_count,
        tracked_repositories: tracked.0,
        merge_rate: percentage(recent_merged, recent_prs),
    })
}

/// Normalize a category display name to a stable series key.
///
/// Collapses runs of whitespace so the same category always lands in the
/// same bucket regardless of display spacing.
fn category_key(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The synthetic bucket for pull requests without a category.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Daily per-category creation counts for the trailing `days` days.
///
/// The series always has exactly `days` contiguous points ending today
/// (UTC), including days with zero activity; every point carries the full
/// category key set.
pub async fn time_series(
    pool: &DbPool,
    organization_id: i64,
    days: i64,
    repository_id: Option<i64>,
) -> Result<Vec<TimeSeriesPoint>, AppError> {
    time_series_at(pool, organization_id, days, repository_id, Utc::now().timestamp()).await
}

/// Time-series variant with an explicit `now` snapshot (Unix seconds).
pub async fn time_series_at(
    pool: &DbPool,
    organization_id: i64,
    days: i64,
    repository_id: Option<i64>,
    now: i64,
) -> Result<Vec<TimeSeriesPoint>, AppError> {
    let days = days.max(1);
    let today = Utc
        .timestamp_opt(now, 0)
        .single()
        .ok_or_else(|| AppError::internal("invalid now timestamp"))?
        .date_naive();
    let start_day = today - Duration::days(days - 1);
    let window_start = start_day
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(now);

    let mut query = String::from(
        r#"
        SELECT date(pr.created_at, 'unixepoch') AS day,
               c.name,
               COUNT(*)
        FROM pull_requests pr
        JOIN repositories r ON r.id = pr.repository_id
        LEFT JOIN categories c ON c.id = pr.category_id
        WHERE r.organization_id = ?
          AND pr.created_at IS NOT NULL
          AND pr.created_at >= ?
        "#,
    );
    if repository_id.is_some() {
        query.push_str(" AND pr.repository_id = ?");
    }
    query.push_str(" GROUP BY day, c.name");

    let mut q = sqlx::query_as::<_, (String, Option<String>, i64)>(&query)
        .bind(organization_id)
        .bind(window_start);
    if let Some(repo_id) = repository_id {
        q = q.bind(repo_id);
    }
    let rows = q.fetch_all(pool).await?;

    // Stable key set across every point
    let mut keys: BTreeSet<String> = BTreeSet::new();
    keys.insert(UNCATEGORIZED.to_string());

    let mut by_day: HashMap<String, BTreeMap<String, i64>> = HashMap::new();
    for (day, category, count) in rows {
        let key = category
            .as_deref()
            .map(category_key)
            .unwrap_or_else(|| UNCATEGORIZED.to_string());
        keys.insert(key.clone());
        *by_day.entry(day).or_default().entry(key).or_insert(0) += count;
    }

    let mut points = Vec::with_capacity(days as usize);
    for offset in 0..days {
        let date = (start_day + Duration::days(offset)).to_string();
        let day_counts = by_day.remove(&date).unwrap_or_default();

        let mut categories = BTreeMap::new();
        let mut total = 0;
        for key in &keys {
            let count = day_counts.get(key).copied().unwrap_or(0);
            total += count;
            categories.insert(key.clone(), count);
        }

        points.push(TimeSeriesPoint {
            date,
            total,
            categories,
        });
    }

    Ok(points)
}

/// Per-contributor statistics, ranked by contribution score, top `limit`.
pub async fn contributor_stats(
    pool: &DbPool,
    organization_id: i64,
    window_days: i64,
    limit: usize,
) -> Result<Vec<ContributorStats>, AppError> {
    contributor_stats_at(
        pool,
        organization_id,
        window_days,
        limit,
        Utc::now().timestamp(),
    )
    .await
}

/// Contributor-stats variant with an explicit `now` snapshot.
pub async fn contributor_stats_at(
    pool: &DbPool,
    organization_id: i64,
    window_days: i64,
    limit: usize,
    now: i64,
) -> Result<Vec<ContributorStats>, AppError> {
    let window_start = now - window_days.max(1) * SECS_PER_DAY;

    // Authored pull requests per contributor
    let authored: Vec<(i64, Option<String>, Option<String>, i64, Option<f64>, Option<f64>)> =
        sqlx::query_as(
            r#"
            SELECT pr.author_id, u.name, u.avatar_url,
                   COUNT(*),
                   AVG(CASE WHEN pr.state = 'merged'
                             AND pr.merged_at IS NOT NULL
                             AND pr.created_at IS NOT NULL
                        THEN (pr.merged_at - pr.created_at) / 3600.0 END),
                   AVG(COALESCE(pr.additions, 0) + COALESCE(pr.deletions, 0))
            FROM pull_requests pr
            JOIN repositories r ON r.id = pr.repository_id
            LEFT JOIN users u ON u.id = pr.author_id
            WHERE r.organization_id = ?
              AND pr.author_id IS NOT NULL
              AND pr.created_at >= ?
            GROUP BY pr.author_id
            "#,
        )
        .bind(organization_id)
        .bind(window_start)
        .fetch_all(pool)
        .await?;

    // Reviews given per contributor
    let reviewed: Vec<(i64, Option<String>, Option<String>, i64)> = sqlx::query_as(
        r#"
        SELECT rv.reviewer_id, u.name, u.avatar_url, COUNT(*)
        FROM reviews rv
        JOIN pull_requests pr ON pr.id = rv.pull_request_id
        JOIN repositories r ON r.id = pr.repository_id
        LEFT JOIN users u ON u.id = rv.reviewer_id
        WHERE r.organization_id = ?
          AND rv.reviewer_id IS NOT NULL
          AND rv.submitted_at >= ?
        GROUP BY rv.reviewer_id
        "#,
    )
    .bind(organization_id)
    .bind(window_start)
    .fetch_all(pool)
    .await?;

    let mut by_user: HashMap<i64, ContributorStats> = HashMap::new();

    for (user_id, name, avatar_url, count, avg_cycle, avg_size) in authored {
        by_user.insert(
            user_id,
            ContributorStats {
                user_id,
                name,
                avatar_url,
                prs_created: count,
                reviews_given: 0,
                avg_cycle_time_hours: round1(avg_cycle.unwrap_or(0.0)),
                avg_pr_size: avg_size.unwrap_or(0.0).round() as i64,
                review_thoroughness: 0.0,
                contribution_score: 0.0,
            },
        );
    }

    for (user_id, name, avatar_url, count) in reviewed {
        let entry = by_user.entry(user_id).or_insert(ContributorStats {
            user_id,
            name,
            avatar_url,
            prs_created: 0,
            reviews_given: 0,
            avg_cycle_time_hours: 0.0,
            avg_pr_size: 0,
            review_thoroughness: 0.0,
            contribution_score: 0.0,
        });
        entry.reviews_given = count;
    }

    let mut contributors: Vec<ContributorStats> = by_user
        .into_values()
        .map(|mut c| {
            c.review_thoroughness = percentage(c.reviews_given, c.prs_created);
            c.contribution_score = c.prs_created as f64 * CONTRIBUTION_PR_WEIGHT
                + c.reviews_given as f64 * CONTRIBUTION_REVIEW_WEIGHT;
            c
        })
        .collect();

    // Score descending, then authored count, then id for stable output
    contributors.sort_by(|a, b| {
        b.contribution_score
            .partial_cmp(&a.contribution_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.prs_created.cmp(&a.prs_created))
            .then(a.user_id.cmp(&b.user_id))
    });
    contributors.truncate(limit);

    Ok(contributors)
}
