//! GitHub project source

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use serde_json::Value;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, instrument, warn};

use super::local::write_build_file;
use super::{is_build_file, last_page, scratch_dir, ProjectSource, SourceError, DEFAULT_BRANCH, PAGE_SIZE};
use crate::config::GithubSourceConfig;
use crate::domain::entities::Project;
use crate::domain::value_objects::{BuildSystem, GitSource};
use crate::infrastructure::projects::ProjectRepository;

/// Discovers a user's repositories and fetches their build files through the
/// GitHub REST API.
pub struct GithubProjectSource {
    octo: Octocrab,
    username: String,
    repository: Arc<dyn ProjectRepository>,
    concurrent_fetches: usize,
}

impl GithubProjectSource {
    pub fn from_config(
        config: &GithubSourceConfig,
        repository: Arc<dyn ProjectRepository>,
    ) -> Result<Self, SourceError> {
        let mut builder = Octocrab::builder();
        if let Some(url) = &config.base_url {
            builder = builder
                .base_uri(url)
                .map_err(|e| SourceError::Configuration(e.to_string()))?;
        }
        if let Some(token) = &config.token {
            if !token.trim().is_empty() {
                builder = builder.personal_token(token.clone());
            }
        }
        let octo = builder
            .build()
            .map_err(|e| SourceError::Configuration(e.to_string()))?;
        Ok(Self {
            octo,
            username: config.username.clone(),
            repository,
            concurrent_fetches: 8,
        })
    }

    fn project_from_repo(&self, repo: &Value) -> Option<Project> {
        let name = repo.get("name")?.as_str()?;
        let mut project = Project::new(name, GitSource::Github, BuildSystem::Unknown).ok()?;
        project.description = repo
            .get("description")
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        project.https_url = repo
            .get("clone_url")
            .or_else(|| repo.get("html_url"))
            .and_then(|v| v.as_str())
            .map(str::to_owned);
        project.created_at = parse_timestamp(repo.get("created_at"));
        project.last_update = parse_timestamp(repo.get("pushed_at"));
        Some(project)
    }

    /// Paths of the build files on the project's default branch.
    async fn list_build_files(&self, project: &Project) -> Result<Vec<String>, SourceError> {
        let path = format!(
            "repos/{}/{}/git/trees/{}",
            self.username, project.name, DEFAULT_BRANCH
        );
        let tree: Value = self
            .octo
            .get(path, Some(&[("recursive", "1")]))
            .await
            .map_err(classify_octocrab_error)?;

        let mut files = Vec::new();
        if let Some(entries) = tree.get("tree").and_then(|t| t.as_array()) {
            for entry in entries {
                if entry.get("type").and_then(|v| v.as_str()) != Some("blob") {
                    continue;
                }
                let Some(file_path) = entry.get("path").and_then(|v| v.as_str()) else {
                    continue;
                };
                let file_name = file_path.rsplit('/').next().unwrap_or(file_path);
                if is_build_file(file_name) {
                    files.push(file_path.to_owned());
                }
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl ProjectSource for GithubProjectSource {
    fn source(&self) -> GitSource {
        GitSource::Github
    }

    #[instrument(skip(self))]
    async fn synchronize(&self) -> Result<(), SourceError> {
        let discovered = self.enumerate().await?;
        self.repository
            .reconcile(GitSource::Github, discovered)
            .await
            .map_err(|e| SourceError::Api(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn enumerate(&self) -> Result<Vec<Project>, SourceError> {
        let mut projects = Vec::new();
        let mut page = 1u32;
        loop {
            let repos: Vec<Value> = self
                .octo
                .get(
                    format!("users/{}/repos", self.username),
                    Some(&[
                        ("per_page", PAGE_SIZE.to_string()),
                        ("page", page.to_string()),
                    ]),
                )
                .await
                .map_err(classify_octocrab_error)?;

            let fetched = repos.len();
            projects.extend(repos.iter().filter_map(|repo| self.project_from_repo(repo)));
            if last_page(fetched) {
                break;
            }
            page += 1;
        }
        debug!(count = projects.len(), "enumerated GitHub repositories");
        Ok(projects)
    }

    #[instrument(skip(self), fields(project = %project.qualified_name))]
    async fn materialize(&self, project: &Project) -> Result<PathBuf, SourceError> {
        let files = self.list_build_files(project).await?;
        let scratch = scratch_dir(&project.name);
        tokio::fs::create_dir_all(&scratch).await?;

        let semaphore = Arc::new(Semaphore::new(self.concurrent_fetches.max(1)));
        let mut join_set: JoinSet<(String, Result<Option<Vec<u8>>, SourceError>)> = JoinSet::new();

        for file_path in files {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let octo = self.octo.clone();
            let req_path = format!(
                "repos/{}/{}/contents/{}?ref={}",
                self.username, project.name, file_path, DEFAULT_BRANCH
            );
            join_set.spawn(async move {
                let _permit = permit;
                let result: Result<Option<Vec<u8>>, SourceError> = async {
                    let content: Value = octo
                        .get(req_path, None::<&()>)
                        .await
                        .map_err(classify_octocrab_error)?;
                    let Some(encoded) = content.get("content").and_then(|v| v.as_str()) else {
                        return Ok(None);
                    };
                    let cleaned: String =
                        encoded.chars().filter(|c| !c.is_whitespace()).collect();
                    let engine = base64::engine::general_purpose::STANDARD;
                    match engine.decode(cleaned.as_bytes()) {
                        Ok(bytes) => Ok(Some(bytes)),
                        Err(e) => {
                            debug!(error = %e, "base64 decode failed");
                            Ok(None)
                        }
                    }
                }
                .await;
                (file_path, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((file_path, Ok(Some(bytes)))) => {
                    write_build_file(&scratch, &file_path, &bytes).await?;
                }
                Ok((_file_path, Ok(None))) => {}
                Ok((file_path, Err(e @ SourceError::RateLimited(_)))) => {
                    warn!(file = %file_path, "rate limited fetching build file");
                    let _ = tokio::fs::remove_dir_all(&scratch).await;
                    return Err(e);
                }
                Ok((file_path, Err(e))) => {
                    debug!(file = %file_path, error = %e, "build file fetch failed");
                }
                Err(join_err) => {
                    debug!(error = %join_err, "join error fetching build file");
                }
            }
        }

        Ok(scratch)
    }

    fn delete_after_scan(&self) -> bool {
        true
    }
}

fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Maps octocrab errors onto the source taxonomy via message heuristics,
/// falling back to a network error.
fn classify_octocrab_error(e: octocrab::Error) -> SourceError {
    let message = e.to_string();
    let lower = message.to_lowercase();
    if lower.contains("rate limit") {
        SourceError::RateLimited(message)
    } else if lower.contains("bad credentials") || lower.contains("unauthorized") {
        SourceError::Auth(message)
    } else if lower.contains("not found") || lower.contains("404") {
        SourceError::NotFound(message)
    } else {
        SourceError::Network(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_project_from_repo_maps_metadata() {
        let config = GithubSourceConfig {
            enabled: true,
            username: "octocat".into(),
            token: None,
            base_url: None,
            timeout_seconds: 30,
        };
        let repo_json: Value = serde_json::json!({
            "name": "widget",
            "description": "a widget",
            "clone_url": "https://github.com/octocat/widget.git",
            "created_at": "2019-05-01T10:00:00Z",
            "pushed_at": "2021-02-03T04:05:06Z",
        });

        let repository = std::sync::Arc::new(NullRepository);
        let source = GithubProjectSource::from_config(&config, repository).unwrap();
        let project = source.project_from_repo(&repo_json).unwrap();
        assert_eq!(project.qualified_name, "github/widget");
        assert_eq!(project.description.as_deref(), Some("a widget"));
        assert!(project.last_update.is_some());
        assert!(source.delete_after_scan());
    }

    struct NullRepository;

    #[async_trait]
    impl ProjectRepository for NullRepository {
        async fn find_by_source(
            &self,
            _source: GitSource,
        ) -> Result<Vec<Project>, crate::infrastructure::projects::PersistenceError> {
            Ok(Vec::new())
        }

        async fn find_by_qualified_name(
            &self,
            _qualified_name: &str,
        ) -> Result<Option<Project>, crate::infrastructure::projects::PersistenceError> {
            Ok(None)
        }

        async fn save(
            &self,
            _project: &Project,
        ) -> Result<(), crate::infrastructure::projects::PersistenceError> {
            Ok(())
        }

        async fn reconcile(
            &self,
            _source: GitSource,
            discovered: Vec<Project>,
        ) -> Result<Vec<Project>, crate::infrastructure::projects::PersistenceError> {
            Ok(discovered)
        }
    }
}
