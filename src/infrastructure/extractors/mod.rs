//! Dependency extraction by invoking the project's own build tooling

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::domain::entities::Dependency;
use crate::domain::value_objects::{
    BuildSystem, Confidence, Evidence, EvidenceKind, Identifier, IdentifierKind,
};

pub mod gradle;
pub mod maven;

pub use gradle::GradleExtractor;
pub use maven::MavenExtractor;

/// Errors invoking or interpreting a build tool
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("build tool '{0}' was not found on this system")]
    ToolNotFound(String),

    #[error("build tool '{tool}' exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("build tool '{tool}' timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("no build file for {0} in the project directory")]
    MissingBuildFile(BuildSystem),

    #[error("no extractor supports the {0} build system")]
    Unsupported(BuildSystem),

    #[error("I/O error during extraction: {0}")]
    Io(#[from] std::io::Error),
}

/// Extracts the dependency coordinates of one project by running its build
/// tool and parsing the dependency tree output.
#[async_trait]
pub trait DependencyExtractor: Send + Sync {
    fn build_system(&self) -> BuildSystem;

    /// Raw coordinate strings, one per resolved dependency.
    async fn dependency_coordinates(
        &self,
        project_dir: &Path,
    ) -> Result<Vec<String>, ExtractionError>;

    /// Coordinates turned into dependencies with their harvested evidence.
    async fn extract(&self, project_dir: &Path) -> Result<Vec<Dependency>, ExtractionError> {
        let coordinates = self.dependency_coordinates(project_dir).await?;
        let dependencies = coordinates
            .iter()
            .filter_map(|c| dependency_from_coordinate(c, self.build_system()))
            .collect();
        Ok(dependencies)
    }
}

/// Looks at the build files present in a directory to pick the build system.
pub async fn detect_build_system(dir: &Path) -> BuildSystem {
    if tokio::fs::try_exists(dir.join("pom.xml")).await.unwrap_or(false) {
        return BuildSystem::Maven;
    }
    for marker in ["build.gradle", "settings.gradle", "gradlew"] {
        if tokio::fs::try_exists(dir.join(marker)).await.unwrap_or(false) {
            return BuildSystem::Gradle;
        }
    }
    BuildSystem::Unknown
}

/// Maven dependency scopes that may trail a coordinate
const SCOPES: [&str; 6] = ["compile", "provided", "runtime", "test", "system", "import"];

/// Builds a dependency from a
/// `group:artifact[:packaging[:classifier]]:version[:scope]` coordinate.
///
/// A trailing scope segment is dropped, then the last segment is the
/// version. Group and artifact lose a leading `org.`/`com.` namespace
/// prefix before becoming evidence, since those rarely appear in database
/// vendor names. Coordinates with fewer than three segments are skipped.
pub fn dependency_from_coordinate(coordinate: &str, build_system: BuildSystem) -> Option<Dependency> {
    let mut segments: Vec<&str> = coordinate.split(':').collect();
    if segments.len() >= 4 && SCOPES.contains(&segments[segments.len() - 1].trim()) {
        segments.pop();
    }
    if segments.len() < 3 {
        debug!(coordinate, "skipping malformed coordinate");
        return None;
    }
    let group = segments[0].trim();
    let artifact = segments[1].trim();
    let version = segments[segments.len() - 1].trim();
    if group.is_empty() || artifact.is_empty() || version.is_empty() {
        return None;
    }

    let group_term = strip_namespace_prefix(group);
    let artifact_term = strip_namespace_prefix(artifact);

    let mut dependency = Dependency::new(coordinate, build_system);
    dependency.add_evidence(Evidence::new(
        EvidenceKind::Vendor,
        "pom",
        "groupid",
        group_term,
        Confidence::Highest,
    ));
    dependency.add_evidence(Evidence::new(
        EvidenceKind::Product,
        "pom",
        "groupid",
        group_term,
        Confidence::Low,
    ));
    dependency.add_evidence(Evidence::new(
        EvidenceKind::Product,
        "pom",
        "artifactid",
        artifact_term,
        Confidence::Highest,
    ));
    dependency.add_evidence(Evidence::new(
        EvidenceKind::Vendor,
        "pom",
        "artifactid",
        artifact_term,
        Confidence::Low,
    ));
    dependency.add_evidence(Evidence::new(
        EvidenceKind::Version,
        "pom",
        "version",
        version,
        Confidence::Highest,
    ));
    dependency.add_identifier(Identifier::new(
        IdentifierKind::Maven,
        format!("{}:{}:{}", group, artifact, version),
        None,
        Confidence::High,
    ));
    Some(dependency)
}

fn strip_namespace_prefix(value: &str) -> &str {
    if value.starts_with("org.") || value.starts_with("com.") {
        &value[4..]
    } else {
        value
    }
}

/// Runs a build tool and returns its stdout, mapping missing binaries,
/// failures and timeouts onto the extraction error taxonomy.
pub(crate) async fn run_build_tool(
    tool: &str,
    args: &[&str],
    workdir: &Path,
    timeout: Duration,
) -> Result<String, ExtractionError> {
    let mut command = Command::new(tool);
    command.args(args).current_dir(workdir).kill_on_drop(true);

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| ExtractionError::Timeout {
            tool: tool.to_owned(),
            seconds: timeout.as_secs(),
        })?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExtractionError::ToolNotFound(tool.to_owned()),
            _ => ExtractionError::Io(e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExtractionError::ToolFailed {
            tool: tool.to_owned(),
            status: output.status.to_string(),
            stderr: stderr.chars().take(500).collect(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_evidence_harvesting() {
        let dep =
            dependency_from_coordinate("org.example:widget:jar:1.4.2", BuildSystem::Maven)
                .unwrap();

        let vendor_highest: Vec<&str> = dep
            .evidence_at(EvidenceKind::Vendor, Confidence::Highest)
            .iter()
            .map(|e| e.value.as_str())
            .collect();
        assert_eq!(vendor_highest, vec!["example"]);

        let product_highest: Vec<&str> = dep
            .evidence_at(EvidenceKind::Product, Confidence::Highest)
            .iter()
            .map(|e| e.value.as_str())
            .collect();
        assert_eq!(product_highest, vec!["widget"]);

        let version: Vec<&str> = dep
            .evidence_at(EvidenceKind::Version, Confidence::Highest)
            .iter()
            .map(|e| e.value.as_str())
            .collect();
        assert_eq!(version, vec!["1.4.2"]);

        // cross-assignments at low confidence
        assert_eq!(
            dep.evidence_at(EvidenceKind::Product, Confidence::Low)[0].value,
            "example"
        );
        assert_eq!(
            dep.evidence_at(EvidenceKind::Vendor, Confidence::Low)[0].value,
            "widget"
        );
    }

    #[test]
    fn test_coordinate_gets_maven_identifier() {
        let dep =
            dependency_from_coordinate("org.example:widget:jar:1.4.2", BuildSystem::Maven)
                .unwrap();
        let maven: Vec<&Identifier> = dep
            .identifiers
            .iter()
            .filter(|i| i.kind == IdentifierKind::Maven)
            .collect();
        assert_eq!(maven.len(), 1);
        assert_eq!(maven[0].value, "org.example:widget:1.4.2");
        assert_eq!(maven[0].confidence, Confidence::High);
    }

    #[test]
    fn test_trailing_scope_is_not_the_version() {
        let dep = dependency_from_coordinate(
            "org.example:widget:jar:1.4.2:compile",
            BuildSystem::Maven,
        )
        .unwrap();
        let version: Vec<&str> = dep
            .evidence_at(EvidenceKind::Version, Confidence::Highest)
            .iter()
            .map(|e| e.value.as_str())
            .collect();
        assert_eq!(version, vec!["1.4.2"]);

        // a bare version segment that happens to spell a scope stays put
        let dep = dependency_from_coordinate("a:b:test", BuildSystem::Maven).unwrap();
        let version: Vec<&str> = dep
            .evidence_at(EvidenceKind::Version, Confidence::Highest)
            .iter()
            .map(|e| e.value.as_str())
            .collect();
        assert_eq!(version, vec!["test"]);
    }

    #[test]
    fn test_namespace_prefix_stripping() {
        assert_eq!(strip_namespace_prefix("org.apache"), "apache");
        assert_eq!(strip_namespace_prefix("com.fasterxml"), "fasterxml");
        assert_eq!(strip_namespace_prefix("junit"), "junit");
    }

    #[test]
    fn test_short_coordinates_are_skipped() {
        assert!(dependency_from_coordinate("broken", BuildSystem::Maven).is_none());
        assert!(dependency_from_coordinate("a:b", BuildSystem::Maven).is_none());
        assert!(dependency_from_coordinate("a:b:1.0", BuildSystem::Gradle).is_some());
    }

    #[tokio::test]
    async fn test_detect_build_system() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_build_system(dir.path()).await, BuildSystem::Unknown);

        tokio::fs::write(dir.path().join("build.gradle"), "").await.unwrap();
        assert_eq!(detect_build_system(dir.path()).await, BuildSystem::Gradle);

        // a pom takes precedence when both are present
        tokio::fs::write(dir.path().join("pom.xml"), "").await.unwrap();
        assert_eq!(detect_build_system(dir.path()).await, BuildSystem::Maven);
    }
}
