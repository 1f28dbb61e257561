//! GitHub document store — notes as files in a repository, via the contents API.
//!
//! Every write is a commit on the configured branch. The blob SHA returned by a read
//! is the version token the next update must carry; GitHub rejects stale ones.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use deepnote_core::config::ArchiveSettings;
use deepnote_core::document::{Document, DocumentStore};
use deepnote_core::error::{DeepNoteError, Result};

const GITHUB_API: &str = "https://api.github.com";

/// Repository coordinates and credentials.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub owner: String,
    pub repository: String,
    pub token: String,
    pub branch: String,
    pub api_base: String,
}

impl GitHubConfig {
    /// Build from archive settings. Owner, repository and token are required.
    pub fn from_settings(settings: &ArchiveSettings) -> Result<Self> {
        let required = |value: &Option<String>, name: &str| {
            value
                .clone()
                .ok_or_else(|| DeepNoteError::Config(format!("{} is not set", name)))
        };
        Ok(Self {
            owner: required(&settings.owner, "GITHUB_USERNAME")?,
            repository: required(&settings.repository, "GITHUB_REPOSITORY")?,
            token: required(&settings.token, "GITHUB_ACCESS_TOKEN")?,
            branch: settings.branch.clone(),
            api_base: GITHUB_API.to_string(),
        })
    }
}

pub struct GitHubDocumentStore {
    client: Client,
    config: GitHubConfig,
}

impl GitHubDocumentStore {
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("deepnote/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DeepNoteError::Other(format!("HTTP client error: {}", e)))?;
        Ok(Self { client, config })
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.owner,
            self.config.repository,
            path.trim_start_matches('/')
        )
    }

    async fn put(&self, path: &str, content: &[u8], sha: Option<&str>, message: &str) -> Result<String> {
        let body = PutContents {
            message,
            content: BASE64_STANDARD.encode(content),
            branch: &self.config.branch,
            sha,
        };

        let resp = self
            .client
            .put(self.contents_url(path))
            .bearer_auth(&self.config.token)
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await
            .map_err(upstream)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(DeepNoteError::Archive(format!(
                "Commit to {} failed ({}): {}",
                path,
                status,
                api_message(&text)
            )));
        }

        let written: PutResponse = resp
            .json()
            .await
            .map_err(|e| DeepNoteError::Archive(format!("Unexpected commit response: {}", e)))?;
        info!("Committed {}: {}", path, message);
        Ok(written.content.html_url)
    }
}

#[async_trait]
impl DocumentStore for GitHubDocumentStore {
    async fn get(&self, path: &str) -> Result<Option<Document>> {
        let resp = self
            .client
            .get(self.contents_url(path))
            .query(&[("ref", self.config.branch.as_str())])
            .bearer_auth(&self.config.token)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(upstream)?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!("{} does not exist yet", path);
            return Ok(None);
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(DeepNoteError::Archive(format!(
                "Reading {} failed ({}): {}",
                path,
                status,
                api_message(&text)
            )));
        }

        let file: FileContents = resp
            .json()
            .await
            .map_err(|e| DeepNoteError::Archive(format!("Unexpected contents response: {}", e)))?;
        let content = decode_content(&file.content)?;
        debug!("Read {} ({} bytes, sha {})", path, content.len(), file.sha);

        Ok(Some(Document {
            content,
            version: file.sha,
            url: file.html_url.unwrap_or_default(),
        }))
    }

    async fn create(&self, path: &str, content: &[u8], message: &str) -> Result<String> {
        self.put(path, content, None, message).await
    }

    async fn update(&self, path: &str, content: &[u8], version: &str, message: &str) -> Result<String> {
        self.put(path, content, Some(version), message).await
    }
}

// ─── GitHub API Types ──────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FileContents {
    sha: String,
    #[serde(default)]
    content: String,
    html_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutContents<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: WrittenFile,
}

#[derive(Debug, Deserialize)]
struct WrittenFile {
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

// ─── Helpers ───────────────────────────────────────────────

fn upstream(e: reqwest::Error) -> DeepNoteError {
    DeepNoteError::Archive(format!("GitHub request failed: {}", e))
}

fn api_message(body: &str) -> String {
    serde_json::from_str::<ApiError>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.chars().take(200).collect())
}

/// The API wraps base64 at 60 columns.
fn decode_content(encoded: &str) -> Result<Vec<u8>> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64_STANDARD
        .decode(compact)
        .map_err(|e| DeepNoteError::Archive(format!("Invalid base64 content: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> GitHubDocumentStore {
        GitHubDocumentStore::new(GitHubConfig {
            owner: "alice".into(),
            repository: "notes".into(),
            token: "t".into(),
            branch: "main".into(),
            api_base: "https://api.github.com/".into(),
        })
        .unwrap()
    }

    #[test]
    fn test_contents_url() {
        assert_eq!(
            store().contents_url("seeds/2026/01/0103.md"),
            "https://api.github.com/repos/alice/notes/contents/seeds/2026/01/0103.md"
        );
    }

    #[test]
    fn test_decode_wrapped_content() {
        let encoded = "LSBCdXkg\nbWlsaw==\n";
        assert_eq!(decode_content(encoded).unwrap(), b"- Buy milk");
        assert!(decode_content("!!!").is_err());
    }

    #[test]
    fn test_put_body_omits_sha_on_create() {
        let body = PutContents {
            message: "Add 2026.1.3",
            content: BASE64_STANDARD.encode("- Buy milk"),
            branch: "main",
            sha: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("sha").is_none());
        assert_eq!(value["content"], "LSBCdXkgbWlsaw==");
    }

    #[test]
    fn test_config_requires_credentials() {
        let settings = ArchiveSettings::default();
        assert!(GitHubConfig::from_settings(&settings).is_err());

        let settings = ArchiveSettings {
            owner: Some("alice".into()),
            repository: Some("notes".into()),
            token: Some("t".into()),
            ..Default::default()
        };
        let config = GitHubConfig::from_settings(&settings).unwrap();
        assert_eq!(config.branch, "main");
    }
}
