//! GitLab project source (REST API v4)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::local::write_build_file;
use super::{is_build_file, last_page, scratch_dir, ProjectSource, SourceError, DEFAULT_BRANCH, PAGE_SIZE};
use crate::config::GitlabSourceConfig;
use crate::domain::entities::Project;
use crate::domain::value_objects::{BuildSystem, GitSource};
use crate::infrastructure::projects::ProjectRepository;

/// Project as returned by `GET /api/v4/projects`
#[derive(Debug, Deserialize)]
struct GitlabProject {
    id: i64,
    path: String,
    description: Option<String>,
    http_url_to_repo: Option<String>,
    created_at: Option<DateTime<Utc>>,
    last_activity_at: Option<DateTime<Utc>>,
}

/// Entry of `GET /api/v4/projects/{id}/repository/tree`
#[derive(Debug, Deserialize)]
struct GitlabTreeEntry {
    #[serde(rename = "type")]
    entry_type: String,
    path: String,
    name: String,
}

/// Discovers the token owner's projects and fetches their build files
/// through the GitLab REST API.
pub struct GitlabProjectSource {
    client: Client,
    base_url: String,
    token: Option<String>,
    repository: Arc<dyn ProjectRepository>,
}

impl GitlabProjectSource {
    pub fn from_config(
        config: &GitlabSourceConfig,
        repository: Arc<dyn ProjectRepository>,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SourceError::Configuration(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            token: config.token.clone(),
            repository,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header("PRIVATE-TOKEN", token),
            None => request,
        }
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, SourceError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(classify_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }
        response
            .json()
            .await
            .map_err(|e| SourceError::Api(format!("unexpected response body: {}", e)))
    }

    fn project_from_gitlab(&self, remote: GitlabProject) -> Option<Project> {
        let mut project =
            Project::new(&remote.path, GitSource::Gitlab, BuildSystem::Unknown).ok()?;
        project.internal_id = Some(remote.id);
        project.description = remote.description;
        project.https_url = remote.http_url_to_repo;
        project.created_at = remote.created_at;
        project.last_update = remote.last_activity_at;
        Some(project)
    }
}

#[async_trait]
impl ProjectSource for GitlabProjectSource {
    fn source(&self) -> GitSource {
        GitSource::Gitlab
    }

    #[instrument(skip(self))]
    async fn synchronize(&self) -> Result<(), SourceError> {
        let discovered = self.enumerate().await?;
        self.repository
            .reconcile(GitSource::Gitlab, discovered)
            .await
            .map_err(|e| SourceError::Api(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn enumerate(&self) -> Result<Vec<Project>, SourceError> {
        let url = format!("{}/api/v4/projects", self.base_url);
        let mut projects = Vec::new();
        let mut page = 1u32;
        loop {
            let remotes: Vec<GitlabProject> = self
                .send_json(self.client.get(&url).query(&[
                    ("membership", "true".to_string()),
                    ("per_page", PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                ]))
                .await?;
            let fetched = remotes.len();
            projects.extend(
                remotes
                    .into_iter()
                    .filter_map(|r| self.project_from_gitlab(r)),
            );
            if last_page(fetched) {
                break;
            }
            page += 1;
        }
        debug!(count = projects.len(), "enumerated GitLab projects");
        Ok(projects)
    }

    #[instrument(skip(self), fields(project = %project.qualified_name))]
    async fn materialize(&self, project: &Project) -> Result<PathBuf, SourceError> {
        let id = project.internal_id.ok_or_else(|| {
            SourceError::Configuration(format!(
                "project {} has no GitLab id; enumerate it first",
                project.qualified_name
            ))
        })?;

        let tree_url = format!("{}/api/v4/projects/{}/repository/tree", self.base_url, id);
        let mut entries: Vec<GitlabTreeEntry> = Vec::new();
        let mut page = 1u32;
        loop {
            let batch: Vec<GitlabTreeEntry> = self
                .send_json(self.client.get(&tree_url).query(&[
                    ("recursive", "true".to_string()),
                    ("per_page", PAGE_SIZE.to_string()),
                    ("page", page.to_string()),
                    ("ref", DEFAULT_BRANCH.to_string()),
                ]))
                .await?;
            let fetched = batch.len();
            entries.extend(batch);
            if last_page(fetched) {
                break;
            }
            page += 1;
        }

        let scratch = scratch_dir(&project.name);
        tokio::fs::create_dir_all(&scratch).await?;

        for entry in entries {
            if entry.entry_type != "blob" || !is_build_file(&entry.name) {
                continue;
            }
            let raw_url = format!(
                "{}/api/v4/projects/{}/repository/files/{}/raw",
                self.base_url,
                id,
                encode_path(&entry.path)
            );
            let response = self
                .authorize(self.client.get(&raw_url).query(&[("ref", DEFAULT_BRANCH)]))
                .send()
                .await
                .map_err(classify_reqwest_error)?;
            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let _ = tokio::fs::remove_dir_all(&scratch).await;
                return Err(classify_status(status));
            }
            if !status.is_success() {
                debug!(file = %entry.path, %status, "build file fetch failed");
                continue;
            }
            let bytes = response
                .bytes()
                .await
                .map_err(classify_reqwest_error)?;
            write_build_file(&scratch, &entry.path, &bytes).await?;
        }

        Ok(scratch)
    }

    fn delete_after_scan(&self) -> bool {
        true
    }
}

/// Percent-encodes a repository path for use as a single URL segment.
fn encode_path(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            other => {
                encoded.push('%');
                encoded.push_str(&format!("{:02X}", other));
            }
        }
    }
    encoded
}

fn classify_reqwest_error(e: reqwest::Error) -> SourceError {
    if e.is_timeout() || e.is_connect() {
        SourceError::Network(e.to_string())
    } else {
        SourceError::Api(e.to_string())
    }
}

fn classify_status(status: StatusCode) -> SourceError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            SourceError::Auth(format!("GitLab returned {}", status))
        }
        StatusCode::NOT_FOUND => SourceError::NotFound(format!("GitLab returned {}", status)),
        StatusCode::TOO_MANY_REQUESTS => {
            SourceError::RateLimited(format!("GitLab returned {}", status))
        }
        other => SourceError::Api(format!("GitLab returned {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_path_escapes_separators() {
        assert_eq!(encode_path("sub/dir/pom.xml"), "sub%2Fdir%2Fpom.xml");
        assert_eq!(encode_path("build.gradle"), "build.gradle");
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED),
            SourceError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            SourceError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            SourceError::RateLimited(_)
        ));
    }
}
