//! GitHub REST API client (contents, commits and blobs endpoints).

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{header, Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use docsync_common::{DocPath, Error, Result, SecretToken};

/// Default GitHub API base URL.
pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// GitHub media type for JSON responses.
const GITHUB_ACCEPT: &str = "application/vnd.github+json";

/// Characters escaped inside one path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// One item of a contents response (file or listing entry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub name: String,
    pub path: String,
    pub sha: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(rename = "type")]
    pub kind: String,
    /// Base64 payload, wrapped at 60 columns. Empty for files over 1 MB.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
}

/// `GET /contents/{path}` returns an array for directories and an object for files.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ContentsResponse {
    Listing(Vec<ContentItem>),
    Item(ContentItem),
}

/// Response of `PUT /contents/{path}`.
#[derive(Debug, Deserialize)]
pub struct WriteResponse {
    pub content: Option<ContentItem>,
    pub commit: CommitRef,
}

#[derive(Debug, Deserialize)]
pub struct CommitRef {
    pub sha: String,
}

/// Response of `GET /git/blobs/{sha}`.
#[derive(Debug, Deserialize)]
pub struct BlobResponse {
    pub sha: String,
    pub content: String,
    pub encoding: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitAuthor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub date: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitCommit {
    pub message: String,
    #[serde(default)]
    pub author: Option<GitAuthor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitFile {
    pub filename: String,
    pub status: String,
    #[serde(default)]
    pub previous_filename: Option<String>,
}

/// Item of `GET /commits` and body of `GET /commits/{sha}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitItem {
    pub sha: String,
    pub commit: GitCommit,
    #[serde(default)]
    pub files: Vec<CommitFile>,
}

/// Body of a non-2xx response.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

/// Low-level GitHub API client bound to one repository.
pub struct GitHubClient {
    http: Client,
    base: Url,
    owner: String,
    repo: String,
    token: SecretToken,
}

impl GitHubClient {
    /// Create a new client.
    ///
    /// # Errors
    /// - `Config` if the base URL is invalid
    /// - `Network` if the HTTP client cannot be built
    pub fn new(
        api_base: &str,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: SecretToken,
        user_agent: &str,
    ) -> Result<Self> {
        let base = Url::parse(api_base)
            .map_err(|e| Error::Config(format!("Invalid API base URL {}: {}", api_base, e)))?;
        let http = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base,
            owner: owner.into(),
            repo: repo.into(),
            token,
        })
    }

    /// Build `/repos/{owner}/{repo}/{suffix}` against the API base.
    fn repo_url(&self, suffix: &str) -> Result<Url> {
        let base = self.base.as_str().trim_end_matches('/');
        let raw = format!(
            "{}/repos/{}/{}/{}",
            base,
            utf8_percent_encode(&self.owner, PATH_SEGMENT),
            utf8_percent_encode(&self.repo, PATH_SEGMENT),
            suffix
        );
        Url::parse(&raw).map_err(|e| Error::InvalidInput(format!("Invalid URL {}: {}", raw, e)))
    }

    /// URL of the contents endpoint for `path`.
    pub fn contents_url(&self, path: &DocPath) -> Result<Url> {
        if path.is_root() {
            return self.repo_url("contents");
        }
        let encoded: Vec<String> = path
            .components()
            .iter()
            .map(|c| utf8_percent_encode(c, PATH_SEGMENT).to_string())
            .collect();
        self.repo_url(&format!("contents/{}", encoded.join("/")))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token.expose()))
            .header(header::ACCEPT, GITHUB_ACCEPT)
    }

    /// `GET /contents/{path}?ref={reference}`.
    pub async fn get_contents(&self, path: &DocPath, reference: &str) -> Result<ContentsResponse> {
        let url = self.contents_url(path)?;
        let response = self
            .request(Method::GET, url)
            .query(&[("ref", reference)])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to get contents of {}: {}", path, e)))?;

        self.handle_response(response).await
    }

    /// `PUT /contents/{path}` with a base64 body.
    pub async fn put_contents(
        &self,
        path: &DocPath,
        message: &str,
        content_b64: &str,
        sha: Option<&str>,
        branch: &str,
    ) -> Result<WriteResponse> {
        let url = self.contents_url(path)?;
        let mut body = serde_json::json!({
            "message": message,
            "content": content_b64,
            "branch": branch,
        });
        if let Some(sha) = sha {
            body["sha"] = serde_json::json!(sha);
        }

        let response = self
            .request(Method::PUT, url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to put {}: {}", path, e)))?;

        self.handle_write_response(response, sha.is_none()).await
    }

    /// `DELETE /contents/{path}`.
    pub async fn delete_contents(
        &self,
        path: &DocPath,
        message: &str,
        sha: &str,
        branch: &str,
    ) -> Result<()> {
        let url = self.contents_url(path)?;
        let body = serde_json::json!({
            "message": message,
            "sha": sha,
            "branch": branch,
        });

        let response = self
            .request(Method::DELETE, url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to delete {}: {}", path, e)))?;

        let _: serde_json::Value = self.handle_response(response).await?;
        Ok(())
    }

    /// `GET /git/blobs/{sha}`, used for files too large for the contents endpoint.
    pub async fn get_blob(&self, sha: &str) -> Result<BlobResponse> {
        let url = self.repo_url(&format!("git/blobs/{}", sha))?;
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to get blob {}: {}", sha, e)))?;

        self.handle_response(response).await
    }

    /// `GET /commits?path=&sha=`.
    pub async fn list_commits(&self, path: &DocPath, branch: &str) -> Result<Vec<CommitItem>> {
        let url = self.repo_url("commits")?;
        let path_str = path.to_string_path();
        let response = self
            .request(Method::GET, url)
            .query(&[("path", path_str.as_str()), ("sha", branch), ("per_page", "100")])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to list commits for {}: {}", path, e)))?;

        self.handle_response(response).await
    }

    /// `GET /commits/{sha}`.
    pub async fn get_commit(&self, sha: &str) -> Result<CommitItem> {
        let url = self.repo_url(&format!("commits/{}", sha))?;
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to get commit {}: {}", sha, e)))?;

        self.handle_response(response).await
    }

    /// Handle a write response; 422 on a creation means the file already exists.
    async fn handle_write_response(
        &self,
        response: reqwest::Response,
        is_creation: bool,
    ) -> Result<WriteResponse> {
        if is_creation && response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let message = Self::error_message(response).await;
            if message.contains("sha") {
                return Err(Error::AlreadyExists(message));
            }
            return Err(Error::from_status(422, message));
        }
        self.handle_response(response).await
    }

    /// Handle API response with error checking.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Decode(format!("Failed to parse response: {}", e)))
        } else {
            let message = Self::error_message(response).await;
            Err(Error::from_status(status.as_u16(), message))
        }
    }

    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(parsed) if !parsed.message.is_empty() => parsed.message,
            _ if body.is_empty() => status.to_string(),
            _ => body,
        }
    }
}
