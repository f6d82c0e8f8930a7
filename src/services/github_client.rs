//! GitHub API client.
//!
//! Read-only HTTP client for the GitHub REST API v3 with authentication,
//! Link-header pagination and typed failure mapping. The client owns no
//! local state; everything it returns is a remote snapshot.

use crate::error::AppError;
use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// GitHub API client configuration.
#[derive(Debug, Clone)]
pub struct GithubClientConfig {
    /// Base URL of the API (e.g., `https://api.github.com`).
    pub base_url: String,

    /// Access token (user or installation scoped). Opaque to the core.
    pub token: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Page size for list endpoints (max 100).
    pub per_page: u32,
}

impl Default for GithubClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            token: String::new(),
            timeout_secs: 30,
            per_page: 100,
        }
    }
}

/// One page of a remote collection.
#[derive(Debug)]
pub struct Page<T> {
    /// The records on this page.
    pub items: Vec<T>,

    /// Cursor for the following page, if the source reports one.
    pub next_page: Option<u32>,
}

impl<T> Page<T> {
    /// An empty terminal page.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_page: None,
        }
    }
}

/// GitHub organization from API.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteOrganization {
    pub id: i64,
    pub login: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// GitHub repository from API.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteRepository {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
}

/// GitHub user from API.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteUser {
    pub id: i64,
    pub login: String,
    pub avatar_url: Option<String>,
}

/// GitHub pull request from API.
///
/// The list endpoint omits the diff counters; they arrive as `None` and
/// the detail endpoint fills them when needed.
#[derive(Debug, Clone, Deserialize)]
pub struct RemotePullRequest {
    pub id: i64,
    pub number: i64,
    pub title: String,
    pub user: Option<RemoteUser>,
    /// `open` or `closed`; a closed PR with `merged_at` set was merged.
    pub state: String,
    #[serde(default)]
    pub draft: bool,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub closed_at: Option<String>,
    pub merged_at: Option<String>,
    pub additions: Option<i64>,
    pub deletions: Option<i64>,
    pub changed_files: Option<i64>,
}

/// GitHub pull request review from API.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteReview {
    pub id: i64,
    pub user: Option<RemoteUser>,
    /// `APPROVED`, `CHANGES_REQUESTED`, `COMMENTED`, `DISMISSED`.
    pub state: String,
    pub submitted_at: Option<String>,
}

/// Capability set of the remote source, as seen by the orchestrator.
///
/// Implemented by [`GithubClient`] for production and by scripted
/// fixtures in tests; the implementation is chosen once by the embedder
/// and injected, never looked up.
#[async_trait]
pub trait SourceApi: Send + Sync {
    /// Fetch one organization by login.
    async fn get_organization(&self, login: &str) -> Result<RemoteOrganization, AppError>;

    /// Fetch one page of an organization's repositories.
    async fn list_repositories(
        &self,
        org_login: &str,
        page: u32,
    ) -> Result<Page<RemoteRepository>, AppError>;

    /// Fetch one page of a repository's pull requests, all states,
    /// descending update time.
    async fn list_pull_requests(
        &self,
        full_name: &str,
        page: u32,
    ) -> Result<Page<RemotePullRequest>, AppError>;

    /// Fetch one page of a pull request's reviews.
    async fn list_reviews(
        &self,
        full_name: &str,
        number: i64,
        page: u32,
    ) -> Result<Page<RemoteReview>, AppError>;
}

/// GitHub API client.
#[derive(Debug, Clone)]
pub struct GithubClient {
    client: Client,
    config: GithubClientConfig,
}

impl GithubClient {
    /// Create a new GitHub client.
    pub fn new(config: GithubClientConfig) -> Result<Self, AppError> {
        let mut headers = header::HeaderMap::new();

        let token_value = header::HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| AppError::unauthorized("Invalid token format"))?;
        headers.insert(header::AUTHORIZATION, token_value);
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static("gitpulse"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Get the full URL for an API path.
    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Handle API response errors, mapping HTTP statuses to the failure
    /// taxonomy.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        endpoint: &str,
    ) -> Result<T, AppError> {
        let status = response.status();

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| AppError::validation(format!("Failed to parse response: {}", e)));
        }

        if status == StatusCode::UNAUTHORIZED {
            return Err(AppError::unauthorized(
                "Access token invalid or expired. Re-authorization required.",
            ));
        }

        if status == StatusCode::TOO_MANY_REQUESTS || is_rate_limit_forbidden(&response) {
            return Err(AppError::rate_limited(parse_retry_after(&response)));
        }

        if status == StatusCode::NOT_FOUND {
            return Err(AppError::not_found(endpoint.to_string()));
        }

        if status.is_server_error() {
            return Err(AppError::transient(format!(
                "Server error {} on {}",
                status.as_u16(),
                endpoint
            )));
        }

        let body = response.text().await.unwrap_or_default();
        Err(AppError::validation(format!(
            "Request failed ({}) on {}: {}",
            status.as_u16(),
            endpoint,
            body
        )))
    }

    /// Make a GET request for one page of a list endpoint.
    async fn get_page<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        page: u32,
        extra_query: &[(&str, &str)],
    ) -> Result<Page<T>, AppError> {
        let url = self.api_url(endpoint);
        let per_page = self.config.per_page.to_string();
        let page_str = page.to_string();

        let mut request = self
            .client
            .get(&url)
            .query(&[("per_page", per_page.as_str()), ("page", page_str.as_str())]);
        for (key, value) in extra_query {
            request = request.query(&[(*key, *value)]);
        }

        let response = request.send().await?;
        let next_page = parse_link_next(
            response
                .headers()
                .get(header::LINK)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(""),
        );
        let items = self.handle_response::<Vec<T>>(response, endpoint).await?;

        Ok(Page { items, next_page })
    }
}

#[async_trait]
impl SourceApi for GithubClient {
    async fn get_organization(&self, login: &str) -> Result<RemoteOrganization, AppError> {
        let endpoint = format!("/orgs/{}", urlencoding::encode(login));
        let url = self.api_url(&endpoint);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response, &endpoint).await
    }

    async fn list_repositories(
        &self,
        org_login: &str,
        page: u32,
    ) -> Result<Page<RemoteRepository>, AppError> {
        let endpoint = format!("/orgs/{}/repos", urlencoding::encode(org_login));
        self.get_page(&endpoint, page, &[("sort", "full_name")]).await
    }

    async fn list_pull_requests(
        &self,
        full_name: &str,
        page: u32,
    ) -> Result<Page<RemotePullRequest>, AppError> {
        let endpoint = format!("/repos/{}/pulls", full_name);
        self.get_page(
            &endpoint,
            page,
            &[
                ("state", "all"),
                ("sort", "updated"),
                ("direction", "desc"),
            ],
        )
        .await
    }

    async fn list_reviews(
        &self,
        full_name: &str,
        number: i64,
        page: u32,
    ) -> Result<Page<RemoteReview>, AppError> {
        let endpoint = format!("/repos/{}/pulls/{}/reviews", full_name, number);
        self.get_page(&endpoint, page, &[]).await
    }
}

/// Whether a 403 response is rate limiting rather than plain denial.
fn is_rate_limit_forbidden(response: &Response) -> bool {
    if response.status() != StatusCode::FORBIDDEN {
        return false;
    }
    response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|s| s == "0")
        .unwrap_or(false)
}

/// Extract the retry hint in seconds from rate-limit response headers.
///
/// Prefers `Retry-After`; falls back to `x-ratelimit-reset` (epoch
/// seconds); defaults to 60 when neither is usable.
fn parse_retry_after(response: &Response) -> u64 {
    let headers = response.headers();

    if let Some(secs) = headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
    {
        return secs;
    }

    if let Some(reset) = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<i64>().ok())
    {
        let now = chrono::Utc::now().timestamp();
        if reset > now {
            return (reset - now) as u64;
        }
    }

    60
}

/// Extract the next page number from a `Link` response header.
///
/// GitHub paginates with `<url?page=N>; rel="next"` segments; absence of
/// a `next` relation means the current page is the last one.
pub fn parse_link_next(link: &str) -> Option<u32> {
    for segment in link.split(',') {
        let mut parts = segment.split(';');
        let url_part = parts.next()?.trim();
        let is_next = parts.any(|p| p.trim() == "rel=\"next\"");
        if !is_next {
            continue;
        }

        let url = url_part.trim_start_matches('<').trim_end_matches('>');
        let query = url.split('?').nth(1)?;
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("page=") {
                return value.parse().ok();
            }
        }
    }
    None
}

/// Parse an RFC 3339 timestamp to Unix seconds.
///
/// Returns `None` for an unparsable value so a missing timestamp is never
/// confused with the epoch.
pub fn parse_timestamp(s: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_construction() {
        let config = GithubClientConfig {
            base_url: "https://api.github.com/".to_string(),
            token: "test-token".to_string(),
            ..Default::default()
        };

        let client = GithubClient::new(config).unwrap();
        assert_eq!(
            client.api_url("/orgs/acme/repos"),
            "https://api.github.com/orgs/acme/repos"
        );
    }

    #[test]
    fn test_parse_link_next() {
        let link = "<https://api.github.com/orgs/acme/repos?per_page=100&page=3>; rel=\"next\", \
                    <https://api.github.com/orgs/acme/repos?per_page=100&page=7>; rel=\"last\"";
        assert_eq!(parse_link_next(link), Some(3));
    }

    #[test]
    fn test_parse_link_next_last_page() {
        let link = "<https://api.github.com/orgs/acme/repos?page=1>; rel=\"first\", \
                    <https://api.github.com/orgs/acme/repos?page=6>; rel=\"prev\"";
        assert_eq!(parse_link_next(link), None);
        assert_eq!(parse_link_next(""), None);
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("2026-01-15T10:30:00Z").unwrap();
        assert!(ts > 0);

        let ts2 = parse_timestamp("2026-01-15T10:30:00+00:00").unwrap();
        assert_eq!(ts, ts2);

        // Invalid timestamps are None, not zero
        assert_eq!(parse_timestamp("not-a-date"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_remote_pull_request_deserialization() {
        let json = r#"{
            "id": 9001,
            "number": 42,
            "title": "Add pooling",
            "user": {"id": 7, "login": "octocat", "avatar_url": null},
            "state": "closed",
            "draft": false,
            "created_at": "2026-01-10T08:00:00Z",
            "updated_at": "2026-01-12T09:00:00Z",
            "closed_at": "2026-01-12T09:00:00Z",
            "merged_at": "2026-01-12T09:00:00Z"
        }"#;

        let pr: RemotePullRequest = serde_json::from_str(json).unwrap();
        assert_eq!(pr.number, 42);
        assert_eq!(pr.user.as_ref().unwrap().login, "octocat");
        // List payloads omit the diff counters entirely
        assert!(pr.additions.is_none());
    }
}
