//! Project repository persisted as a JSON document

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::entities::Project;
use crate::domain::value_objects::GitSource;

/// Errors reading or writing the project repository
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error accessing project repository: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Storage for the projects known to the scanner
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn find_by_source(&self, source: GitSource) -> Result<Vec<Project>, PersistenceError>;

    async fn find_by_qualified_name(
        &self,
        qualified_name: &str,
    ) -> Result<Option<Project>, PersistenceError>;

    /// Inserts or replaces one project and flushes to disk.
    async fn save(&self, project: &Project) -> Result<(), PersistenceError>;

    /// Reconciles the stored projects of one source against the set the
    /// source currently reports: new names are inserted, names on both sides
    /// refresh their source metadata when `last_update` drifted, and names
    /// the source no longer reports are deleted. Returns the source's
    /// projects after the diff, sorted by name.
    async fn reconcile(
        &self,
        source: GitSource,
        discovered: Vec<Project>,
    ) -> Result<Vec<Project>, PersistenceError>;
}

/// Repository backed by a single JSON file, keyed by qualified name.
///
/// The whole document is rewritten on every change through a temp file and
/// rename, so a crash never leaves a truncated repository behind.
pub struct JsonProjectRepository {
    path: PathBuf,
    projects: RwLock<BTreeMap<String, Project>>,
}

impl JsonProjectRepository {
    pub async fn open(path: &Path) -> Result<Self, PersistenceError> {
        let projects = match tokio::fs::read_to_string(path).await {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        info!(
            projects = projects.len(),
            path = %path.display(),
            "opened project repository"
        );
        Ok(Self {
            path: path.to_path_buf(),
            projects: RwLock::new(projects),
        })
    }

    async fn persist(&self, projects: &BTreeMap<String, Project>) -> Result<(), PersistenceError> {
        let serialized = serde_json::to_vec_pretty(projects)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension(format!("tmp-{}", Uuid::new_v4()));
        tokio::fs::write(&tmp, &serialized).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectRepository for JsonProjectRepository {
    async fn find_by_source(&self, source: GitSource) -> Result<Vec<Project>, PersistenceError> {
        let projects = self.projects.read().await;
        Ok(projects
            .values()
            .filter(|p| p.source == source)
            .cloned()
            .collect())
    }

    async fn find_by_qualified_name(
        &self,
        qualified_name: &str,
    ) -> Result<Option<Project>, PersistenceError> {
        let projects = self.projects.read().await;
        Ok(projects.get(qualified_name).cloned())
    }

    async fn save(&self, project: &Project) -> Result<(), PersistenceError> {
        let mut projects = self.projects.write().await;
        projects.insert(project.qualified_name.clone(), project.clone());
        self.persist(&projects).await
    }

    async fn reconcile(
        &self,
        source: GitSource,
        discovered: Vec<Project>,
    ) -> Result<Vec<Project>, PersistenceError> {
        let mut projects = self.projects.write().await;

        let discovered: BTreeMap<String, Project> = discovered
            .into_iter()
            .map(|p| (p.qualified_name.clone(), p))
            .collect();

        let stored_names: Vec<String> = projects
            .values()
            .filter(|p| p.source == source)
            .map(|p| p.qualified_name.clone())
            .collect();

        let mut inserted = 0usize;
        let mut updated = 0usize;
        let mut deleted = 0usize;

        for name in &stored_names {
            if !discovered.contains_key(name) {
                projects.remove(name);
                deleted += 1;
            }
        }

        for (name, incoming) in discovered {
            match projects.get_mut(&name) {
                Some(existing) => {
                    if existing.last_update != incoming.last_update {
                        existing.refresh_from(&incoming);
                        updated += 1;
                    }
                }
                None => {
                    projects.insert(name, incoming);
                    inserted += 1;
                }
            }
        }

        debug!(%source, inserted, updated, deleted, "reconciled projects");
        self.persist(&projects).await?;

        let mut current: Vec<Project> = projects
            .values()
            .filter(|p| p.source == source)
            .cloned()
            .collect();
        current.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(current)
    }
}
