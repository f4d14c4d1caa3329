//! Local directory project source

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{ProjectSource, SourceError};
use crate::domain::entities::Project;
use crate::domain::value_objects::GitSource;
use crate::infrastructure::extractors::detect_build_system;
use crate::infrastructure::projects::ProjectRepository;

/// Treats every immediate subdirectory of a configured path as a project.
///
/// Projects are scanned in place, so nothing is deleted afterwards.
pub struct LocalProjectSource {
    root: PathBuf,
    repository: Arc<dyn ProjectRepository>,
}

impl LocalProjectSource {
    pub fn new(root: PathBuf, repository: Arc<dyn ProjectRepository>) -> Self {
        Self { root, repository }
    }

    async fn discover(&self) -> Result<Vec<Project>, SourceError> {
        let mut projects = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let build_system = detect_build_system(&entry.path()).await;
            match Project::new(&name, GitSource::Local, build_system) {
                Ok(project) => projects.push(project),
                Err(e) => debug!(directory = %name, error = %e, "skipping directory"),
            }
        }
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }
}

#[async_trait]
impl ProjectSource for LocalProjectSource {
    fn source(&self) -> GitSource {
        GitSource::Local
    }

    #[instrument(skip(self))]
    async fn synchronize(&self) -> Result<(), SourceError> {
        let discovered = self.discover().await?;
        self.repository
            .reconcile(GitSource::Local, discovered)
            .await
            .map_err(|e| SourceError::Api(e.to_string()))?;
        Ok(())
    }

    async fn enumerate(&self) -> Result<Vec<Project>, SourceError> {
        self.discover().await
    }

    async fn materialize(&self, project: &Project) -> Result<PathBuf, SourceError> {
        let dir = self.root.join(&project.name);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(SourceError::NotFound(format!(
                "project directory {} does not exist",
                dir.display()
            )));
        }
        Ok(dir)
    }

    fn delete_after_scan(&self) -> bool {
        false
    }
}

/// Shared by the remote sources: write one fetched build file under the
/// scratch directory, preserving its repository-relative path.
pub(crate) async fn write_build_file(
    scratch: &Path,
    relative_path: &str,
    content: &[u8],
) -> Result<(), SourceError> {
    // reject path traversal out of the scratch dir
    let relative = Path::new(relative_path);
    if relative
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir | std::path::Component::RootDir))
    {
        return Err(SourceError::Api(format!(
            "refusing path outside working directory: {}",
            relative_path
        )));
    }
    let target = scratch.join(relative);
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&target, content).await?;
    Ok(())
}
