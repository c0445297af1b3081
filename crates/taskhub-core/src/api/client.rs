//! API client for the taskhub user, team and task services.
//!
//! Every request made through `ApiClient` carries the bearer token currently
//! held by the shared `TokenStore`, so the client follows login and logout
//! without being rebuilt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, multipart, Client, Method, RequestBuilder, Url};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use super::ApiError;
use crate::auth::{Authenticator, IdentityClient, TokenStore};
use crate::models::{
    Attachment, Comment, NewTask, NewTeam, NewUser, Role, Task, TaskFilter, TaskStatus,
    TaskUpdate, Team, TeamUpdate, TokenResponse, User,
};

// ============================================================================
// Constants
// ============================================================================

pub const DEFAULT_USER_SERVICE_URL: &str = "http://localhost:8001";
pub const DEFAULT_TEAM_SERVICE_URL: &str = "http://localhost:8002";
pub const DEFAULT_TASK_SERVICE_URL: &str = "http://localhost:8003";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) GET requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Base URLs of the three services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUrls {
    pub users: String,
    pub teams: String,
    pub tasks: String,
}

impl ServiceUrls {
    pub fn new(users: &str, teams: &str, tasks: &str) -> Self {
        Self {
            users: users.trim_end_matches('/').to_string(),
            teams: teams.trim_end_matches('/').to_string(),
            tasks: tasks.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for ServiceUrls {
    fn default() -> Self {
        Self::new(
            DEFAULT_USER_SERVICE_URL,
            DEFAULT_TEAM_SERVICE_URL,
            DEFAULT_TASK_SERVICE_URL,
        )
    }
}

/// Parsed service base URLs that endpoint paths are appended to
#[derive(Debug, Clone)]
struct Bases {
    users: Url,
    teams: Url,
    tasks: Url,
}

impl Bases {
    fn parse(urls: &ServiceUrls) -> Result<Self, ApiError> {
        Ok(Self {
            users: parse_base(&urls.users)?,
            teams: parse_base(&urls.teams)?,
            tasks: parse_base(&urls.tasks)?,
        })
    }
}

fn parse_base(raw: &str) -> Result<Url, ApiError> {
    let url = Url::parse(raw).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(ApiError::InvalidUrl(format!("{}: not a base URL", raw)));
    }
    Ok(url)
}

/// Append `segments` to `base`, percent-encoding each one so ids and
/// usernames cannot change the route.
fn endpoint(base: &Url, segments: &[&str]) -> String {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url.into()
}

/// API client for the taskhub services.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    urls: ServiceUrls,
    bases: Bases,
    tokens: Arc<dyn TokenStore>,
}

impl ApiClient {
    /// Create a new API client reading its bearer token from `tokens`
    pub fn new(urls: ServiceUrls, tokens: Arc<dyn TokenStore>) -> Result<Self, ApiError> {
        let bases = Bases::parse(&urls)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            urls,
            bases,
            tokens,
        })
    }

    pub fn urls(&self) -> &ServiceUrls {
        &self.urls
    }

    fn auth_headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = self.tokens.get() {
            match header::HeaderValue::from_str(&format!("Bearer {}", token)) {
                Ok(value) => {
                    headers.insert(header::AUTHORIZATION, value);
                }
                Err(_) => warn!("Stored token is not a valid header value, sending request without it"),
            }
        }
        headers
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(header::ACCEPT, "application/json")
            .headers(self.auth_headers())
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status().as_u16() == 429 {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: reqwest::Response, url: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            debug!(url = url, error = %e, "Unexpected response body");
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self.request(Method::GET, url).query(query).send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => return Self::parse_json(response, url).await,
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.request(method, url).json(body).send().await?;
        let response = Self::check_response(response).await?;
        Self::parse_json(response, url).await
    }

    /// Send a request whose successful response carries no body (204)
    async fn send_empty(&self, method: Method, url: &str) -> Result<(), ApiError> {
        let response = self.request(method, url).send().await?;
        Self::check_response(response).await?;
        Ok(())
    }

    // ===== Users =====

    /// Register a new account. New accounts stay inactive until an admin activates them.
    pub async fn signup(&self, user: &NewUser) -> Result<User, ApiError> {
        let url = endpoint(&self.bases.users, &["users"]);
        self.send_json(Method::POST, &url, user).await
    }

    pub async fn fetch_users(&self) -> Result<Vec<User>, ApiError> {
        let url = endpoint(&self.bases.users, &["users"]);
        self.get(&url, &[]).await
    }

    pub async fn fetch_user(&self, username: &str) -> Result<User, ApiError> {
        let url = endpoint(&self.bases.users, &["users", username]);
        self.get(&url, &[]).await
    }

    pub async fn activate_user(&self, username: &str) -> Result<User, ApiError> {
        let url = endpoint(&self.bases.users, &["users", username, "activate"]);
        let response = self.request(Method::PATCH, &url).send().await?;
        let response = Self::check_response(response).await?;
        Self::parse_json(response, &url).await
    }

    pub async fn deactivate_user(&self, username: &str) -> Result<User, ApiError> {
        let url = endpoint(&self.bases.users, &["users", username, "deactivate"]);
        let response = self.request(Method::PATCH, &url).send().await?;
        let response = Self::check_response(response).await?;
        Self::parse_json(response, &url).await
    }

    pub async fn update_user_role(&self, username: &str, role: Role) -> Result<User, ApiError> {
        let url = endpoint(&self.bases.users, &["users", username, "role"]);
        self.send_json(Method::PATCH, &url, &serde_json::json!({ "role": role }))
            .await
    }

    pub async fn delete_user(&self, username: &str) -> Result<(), ApiError> {
        let url = endpoint(&self.bases.users, &["users", username]);
        self.send_empty(Method::DELETE, &url).await
    }

    // ===== Teams =====

    pub async fn fetch_teams(&self) -> Result<Vec<Team>, ApiError> {
        let url = endpoint(&self.bases.teams, &["teams"]);
        self.get(&url, &[]).await
    }

    pub async fn fetch_team(&self, team_id: &str) -> Result<Team, ApiError> {
        let url = endpoint(&self.bases.teams, &["teams", team_id]);
        self.get(&url, &[]).await
    }

    pub async fn create_team(&self, team: &NewTeam) -> Result<Team, ApiError> {
        let url = endpoint(&self.bases.teams, &["teams"]);
        self.send_json(Method::POST, &url, team).await
    }

    pub async fn update_team(&self, team_id: &str, update: &TeamUpdate) -> Result<Team, ApiError> {
        let url = endpoint(&self.bases.teams, &["teams", team_id]);
        self.send_json(Method::PATCH, &url, update).await
    }

    pub async fn delete_team(&self, team_id: &str) -> Result<(), ApiError> {
        let url = endpoint(&self.bases.teams, &["teams", team_id]);
        self.send_empty(Method::DELETE, &url).await
    }

    pub async fn add_team_member(&self, team_id: &str, username: &str) -> Result<Team, ApiError> {
        let url = endpoint(&self.bases.teams, &["teams", team_id, "members"]);
        self.send_json(Method::POST, &url, &serde_json::json!({ "username": username }))
            .await
    }

    pub async fn remove_team_member(&self, team_id: &str, username: &str) -> Result<Team, ApiError> {
        let url = endpoint(&self.bases.teams, &["teams", team_id, "members", username]);
        let response = self.request(Method::DELETE, &url).send().await?;
        let response = Self::check_response(response).await?;
        Self::parse_json(response, &url).await
    }

    // ===== Tasks =====

    /// Fetch tasks assigned to the current user
    pub async fn fetch_my_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, ApiError> {
        let url = endpoint(&self.bases.tasks, &["tasks", "me"]);
        self.get(&url, &filter.to_query()).await
    }

    pub async fn fetch_team_tasks(&self, team_id: &str, filter: &TaskFilter) -> Result<Vec<Task>, ApiError> {
        let url = endpoint(&self.bases.tasks, &["tasks", "team", team_id]);
        self.get(&url, &filter.to_query()).await
    }

    pub async fn fetch_task(&self, task_id: &str) -> Result<Task, ApiError> {
        let url = endpoint(&self.bases.tasks, &["tasks", task_id]);
        self.get(&url, &[]).await
    }

    pub async fn create_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        let url = endpoint(&self.bases.tasks, &["tasks"]);
        self.send_json(Method::POST, &url, task).await
    }

    pub async fn update_task(&self, task_id: &str, update: &TaskUpdate) -> Result<Task, ApiError> {
        let url = endpoint(&self.bases.tasks, &["tasks", task_id]);
        self.send_json(Method::PATCH, &url, update).await
    }

    /// Change only the status. This is the one edit open to the assignee.
    pub async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<Task, ApiError> {
        let url = endpoint(&self.bases.tasks, &["tasks", task_id, "status"]);
        self.send_json(Method::PATCH, &url, &serde_json::json!({ "status": status }))
            .await
    }

    pub async fn delete_task(&self, task_id: &str) -> Result<(), ApiError> {
        let url = endpoint(&self.bases.tasks, &["tasks", task_id]);
        self.send_empty(Method::DELETE, &url).await
    }

    pub async fn add_comment(&self, task_id: &str, text: &str) -> Result<Comment, ApiError> {
        let url = endpoint(&self.bases.tasks, &["tasks", task_id, "comments"]);
        self.send_json(Method::POST, &url, &serde_json::json!({ "text": text }))
            .await
    }

    pub async fn fetch_comments(&self, task_id: &str) -> Result<Vec<Comment>, ApiError> {
        let url = endpoint(&self.bases.tasks, &["tasks", task_id, "comments"]);
        self.get(&url, &[]).await
    }

    pub async fn delete_comment(&self, task_id: &str, comment_id: &str) -> Result<(), ApiError> {
        let url = endpoint(&self.bases.tasks, &["tasks", task_id, "comments", comment_id]);
        self.send_empty(Method::DELETE, &url).await
    }

    pub async fn fetch_attachments(&self, task_id: &str) -> Result<Vec<Attachment>, ApiError> {
        let url = endpoint(&self.bases.tasks, &["tasks", task_id, "attachments"]);
        self.get(&url, &[]).await
    }

    /// URL an attachment can be downloaded from (requires the bearer token)
    pub fn attachment_url(&self, task_id: &str, attachment_id: &str) -> String {
        endpoint(&self.bases.tasks, &["tasks", task_id, "attachments", attachment_id])
    }

    pub async fn download_attachment(&self, task_id: &str, attachment_id: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.attachment_url(task_id, attachment_id);
        let response = self.request(Method::GET, &url).send().await?;
        let response = Self::check_response(response).await?;
        let bytes = response.bytes().await?;
        debug!(task_id, attachment_id, size = bytes.len(), "Attachment downloaded");
        Ok(bytes.to_vec())
    }

    /// Upload `contents` as a new attachment named `filename`
    pub async fn upload_attachment(
        &self,
        task_id: &str,
        filename: &str,
        contents: Vec<u8>,
    ) -> Result<Attachment, ApiError> {
        let url = endpoint(&self.bases.tasks, &["tasks", task_id, "attachments"]);
        let size = contents.len();
        let part = multipart::Part::bytes(contents).file_name(filename.to_string());
        let form = multipart::Form::new().part("file", part);
        let response = self.request(Method::POST, &url).multipart(form).send().await?;
        let response = Self::check_response(response).await?;
        debug!(task_id, filename, size, "Attachment uploaded");
        Self::parse_json(response, &url).await
    }

    pub async fn delete_attachment(&self, task_id: &str, attachment_id: &str) -> Result<(), ApiError> {
        let url = self.attachment_url(task_id, attachment_id);
        self.send_empty(Method::DELETE, &url).await
    }
}

#[async_trait]
impl IdentityClient for ApiClient {
    async fn fetch_self(&self, token: &str) -> Result<User, ApiError> {
        let url = endpoint(&self.bases.users, &["users", "me"]);
        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(token)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        Self::parse_json(response, &url).await
    }
}

#[async_trait]
impl Authenticator for ApiClient {
    /// Log in with the form-encoded credentials the token endpoint expects
    async fn authenticate(&self, username: &str, password: &str) -> Result<String, ApiError> {
        let url = endpoint(&self.bases.users, &["users", "token"]);
        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let token: TokenResponse = Self::parse_json(response, &url).await?;
        debug!(username = username, "Token issued");
        Ok(token.access_token)
    }
}
