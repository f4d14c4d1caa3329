//! Project discovery sources

use std::path::PathBuf;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::domain::entities::Project;
use crate::domain::value_objects::GitSource;

pub mod github;
pub mod gitlab;
pub mod local;

pub use github::GithubProjectSource;
pub use gitlab::GitlabProjectSource;
pub use local::LocalProjectSource;

/// Branch remote sources read build files from
pub const DEFAULT_BRANCH: &str = "master";

/// Page size for remote listing endpoints
pub(crate) const PAGE_SIZE: usize = 100;

/// A page shorter than the page size is the last one.
pub(crate) fn last_page(fetched: usize) -> bool {
    fetched < PAGE_SIZE
}

/// Errors raised while talking to a project source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("API error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A place projects are discovered from and fetched for scanning.
///
/// `synchronize` reconciles the stored project set with what the source
/// currently reports, `enumerate` lists the source's projects, and
/// `materialize` produces a directory holding the project's build files. The
/// engine removes that directory after scanning when `delete_after_scan`
/// says so.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    fn source(&self) -> GitSource;

    async fn synchronize(&self) -> Result<(), SourceError>;

    async fn enumerate(&self) -> Result<Vec<Project>, SourceError>;

    async fn materialize(&self, project: &Project) -> Result<PathBuf, SourceError>;

    fn delete_after_scan(&self) -> bool;
}

/// Whether a file name is one of the build files worth fetching: Maven poms,
/// Gradle scripts and wrapper pieces, and properties files.
pub fn is_build_file(file_name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^(pom\.xml|.*\.gradle|.*\.properties|gradlew|gradlew\.bat|gradle-wrapper\.jar)$")
            .expect("build file pattern")
    });
    pattern.is_match(file_name)
}

/// A scratch directory for one materialized project.
pub(crate) fn scratch_dir(project_name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("sourcescan-{}-{}", project_name, uuid::Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_file_pattern() {
        assert!(is_build_file("pom.xml"));
        assert!(is_build_file("build.gradle"));
        assert!(is_build_file("settings.gradle"));
        assert!(is_build_file("gradle.properties"));
        assert!(is_build_file("gradlew"));
        assert!(is_build_file("gradlew.bat"));
        assert!(is_build_file("gradle-wrapper.jar"));

        assert!(!is_build_file("Main.java"));
        assert!(!is_build_file("pom.xml.bak"));
        assert!(!is_build_file("package.json"));
    }

    #[test]
    fn test_last_page_detection() {
        assert!(last_page(0));
        assert!(last_page(PAGE_SIZE - 1));
        assert!(!last_page(PAGE_SIZE));
    }
}
